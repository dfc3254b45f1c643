use serde_json::{Map, Value, json};
use tracing::info;

use crate::executor::traits::Predicate;
use crate::expression::value::display;
use crate::pipeline::{Context, PluginError};

/// `log`: write `msg` (any value) to the log at info level
#[derive(Debug, Default)]
pub struct LogPredicate;

impl Predicate for LogPredicate {
    fn name(&self) -> &str {
        "log"
    }

    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"msg": {}},
            "required": ["msg"],
        })
    }

    fn call(&mut self, params: &Map<String, Value>, _ctx: &mut Context) -> Result<bool, PluginError> {
        let msg = params.get("msg").map(display).unwrap_or_default();
        info!(log = %msg);
        Ok(true)
    }
}
