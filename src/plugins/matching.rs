use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;
use validator::Validate;

use crate::executor::traits::{Predicate, decode_params};
use crate::pipeline::{Context, PluginError};

#[derive(Debug, Deserialize, Validate)]
struct Params {
    string: String,
    #[validate(length(min = 1))]
    value: Option<String>,
    #[validate(length(min = 1))]
    regexp: Option<String>,
}

/// `match`: compare a string to a fixed value or a regular expression
///
/// On a regex match the result holds every group under `matches` (the
/// whole match first, unmatched groups empty) and the named groups under
/// `named`.
#[derive(Debug, Default)]
pub struct MatchPredicate {
    result: Option<Map<String, Value>>,
}

impl Predicate for MatchPredicate {
    fn name(&self) -> &str {
        "match"
    }

    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "string": {"type": "string"},
                "value": {"type": "string", "minLength": 1},
                "regexp": {"type": "string", "minLength": 1},
            },
            "required": ["string"],
            "oneOf": [
                {"required": ["value"]},
                {"required": ["regexp"]},
            ],
        })
    }

    fn call(&mut self, params: &Map<String, Value>, _ctx: &mut Context) -> Result<bool, PluginError> {
        let params: Params = decode_params(params)?;

        match (&params.value, &params.regexp) {
            (Some(value), None) => {
                debug!(value = %value, "Matching fixed value");
                Ok(*value == params.string)
            }
            (None, Some(pattern)) => {
                debug!(regexp = %pattern, "Matching regexp");
                let regex = Regex::new(pattern)
                    .map_err(|e| PluginError::InvalidParams(format!("invalid 'regexp': {}", e)))?;
                let Some(captures) = regex.captures(&params.string) else {
                    return Ok(false);
                };

                let matches: Vec<Value> = captures
                    .iter()
                    .map(|group| json!(group.map(|m| m.as_str()).unwrap_or_default()))
                    .collect();
                let named: Map<String, Value> = regex
                    .capture_names()
                    .flatten()
                    .filter_map(|name| captures.name(name).map(|m| (name.to_string(), json!(m.as_str()))))
                    .collect();
                debug!(matches = ?matches, "Regexp matched");

                let mut result = Map::new();
                result.insert("matches".to_string(), Value::Array(matches));
                result.insert("named".to_string(), Value::Object(named));
                self.result = Some(result);
                Ok(true)
            }
            _ => Err(PluginError::InvalidParams(
                "exactly one of 'value' or 'regexp' is required".to_string(),
            )),
        }
    }

    fn result(&self) -> Option<Map<String, Value>> {
        self.result.clone()
    }
}
