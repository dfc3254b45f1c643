use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use tracing::{debug, error};
use validator::Validate;

use crate::executor::traits::{Predicate, decode_params};
use crate::pipeline::{Context, PluginError};

#[derive(Debug, Deserialize, Validate)]
struct Params {
    #[validate(length(min = 1))]
    json: Option<String>,
    #[validate(length(min = 1))]
    yaml: Option<String>,
}

/// `readfile`: load a JSON or YAML file and expose it as `content`
#[derive(Debug, Default)]
pub struct ReadFilePredicate {
    content: Option<Value>,
}

impl Predicate for ReadFilePredicate {
    fn name(&self) -> &str {
        "readfile"
    }

    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "json": {"type": "string", "minLength": 1},
                "yaml": {"type": "string", "minLength": 1},
            },
            "oneOf": [
                {"required": ["json"]},
                {"required": ["yaml"]},
            ],
        })
    }

    fn call(&mut self, params: &Map<String, Value>, _ctx: &mut Context) -> Result<bool, PluginError> {
        let params: Params = decode_params(params)?;

        let content = match (&params.json, &params.yaml) {
            (Some(path), None) => {
                let text = read(path)?;
                serde_json::from_str(&text).map_err(|e| {
                    error!(path = %path, error = %e, "Invalid JSON");
                    PluginError::failed(format!("invalid JSON in '{}': {}", path, e))
                })?
            }
            (None, Some(path)) => {
                let text = read(path)?;
                serde_yaml::from_str(&text).map_err(|e| {
                    error!(path = %path, error = %e, "Invalid YAML");
                    PluginError::failed(format!("invalid YAML in '{}': {}", path, e))
                })?
            }
            _ => {
                return Err(PluginError::InvalidParams(
                    "exactly one of 'json' or 'yaml' is required".to_string(),
                ));
            }
        };
        self.content = Some(content);
        Ok(true)
    }

    fn result(&self) -> Option<Map<String, Value>> {
        let content = self.content.as_ref()?;
        let mut result = Map::new();
        result.insert("content".to_string(), content.clone());
        Some(result)
    }
}

fn read(path: &str) -> Result<String, PluginError> {
    let path = expand_home(path);
    debug!(path = %path.display(), "Reading file");
    Ok(std::fs::read_to_string(path)?)
}

/// `~/x` -> `$HOME/x`
pub(crate) fn expand_home(path: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (path, home) {
        ("~", Some(home)) => home,
        (p, Some(home)) if p.starts_with("~/") => home.join(&p[2..]),
        (p, _) => PathBuf::from(p),
    }
}
