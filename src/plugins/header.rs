use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;
use validator::Validate;

use crate::executor::traits::{Predicate, decode_params};
use crate::pipeline::{Context, PluginError};

#[derive(Debug, Deserialize, Validate)]
struct Params {
    #[validate(length(min = 1))]
    name: String,
    #[serde(default)]
    value: String,
}

/// `header`: read a request header
///
/// The result is `{value}` (empty when the header is absent). With a
/// non-empty `value` parameter the outcome is whether they are equal.
#[derive(Debug, Default)]
pub struct HeaderPredicate {
    value: Option<String>,
}

impl Predicate for HeaderPredicate {
    fn name(&self) -> &str {
        "header"
    }

    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "minLength": 1},
                "value": {"type": "string"},
            },
            "required": ["name"],
        })
    }

    fn call(&mut self, params: &Map<String, Value>, ctx: &mut Context) -> Result<bool, PluginError> {
        let params: Params = decode_params(params)?;
        let value = ctx.incoming().header(&params.name).unwrap_or_default().to_string();
        debug!(header = %params.name, value = %value);

        let outcome = params.value.is_empty() || value == params.value;
        self.value = Some(value);
        Ok(outcome)
    }

    fn result(&self) -> Option<Map<String, Value>> {
        let value = self.value.as_ref()?;
        let mut result = Map::new();
        result.insert("value".to_string(), json!(value));
        Some(result)
    }
}
