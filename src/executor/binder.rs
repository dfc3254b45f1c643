use serde_json::{Map, Value};

use crate::expression::evaluate;
use crate::pipeline::{ConfigError, Context, EvalError};

/// Replace every expression string inside a configuration value
///
/// Maps keep their keys, lists keep their order, non-string scalars pass
/// through. A string may turn into a value of any shape.
pub fn convert(raw: &Value, ctx: &Context) -> Result<Value, EvalError> {
    match raw {
        Value::String(s) => evaluate(s, ctx),
        Value::Array(items) => items
            .iter()
            .map(|item| convert(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut converted = Map::with_capacity(map.len());
            for (key, value) in map {
                converted.insert(key.clone(), convert(value, ctx)?);
            }
            Ok(Value::Object(converted))
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(raw.clone()),
    }
}

/// Bind the parameters of one plugin invocation
///
/// The plugin's current defaults are taken first, the step's own fields
/// overwrite them one by one, then the result goes through [`convert`].
pub fn bind_params(plugin: &str, raw: &Value, ctx: &Context) -> Result<Map<String, Value>, ConfigError> {
    let mut merged = ctx.defaults_for(plugin).cloned().unwrap_or_default();
    match raw {
        Value::Object(fields) => {
            for (field, value) in fields {
                merged.insert(field.clone(), value.clone());
            }
        }
        Value::Null => {}
        other => {
            return Err(ConfigError::invalid_directive(
                plugin,
                format!("parameters must be a mapping, got {}", other),
            ));
        }
    }

    match convert(&Value::Object(merged), ctx) {
        Ok(Value::Object(bound)) => Ok(bound),
        Ok(_) => Err(ConfigError::invalid_directive(plugin, "parameters did not bind to a mapping")),
        Err(e) => Err(ConfigError::binding(plugin, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_literal_strings_are_untouched() {
        let ctx = Context::new();
        assert_eq!(convert(&json!("plain"), &ctx).unwrap(), json!("plain"));
    }

    #[test]
    fn test_convert_recurses() {
        let ctx = Context::new().with_var("n", json!(2)).with_var("list", json!([1, 2]));
        let raw = json!({
            "count": "=V.n + 1",
            "nested": {"items": ["=V.list", "x", 3, null, true]},
        });
        assert_eq!(
            convert(&raw, &ctx).unwrap(),
            json!({
                "count": 3,
                "nested": {"items": [[1, 2], "x", 3, null, true]},
            })
        );
    }

    #[test]
    fn test_convert_keeps_keys() {
        let ctx = Context::new();
        assert_eq!(convert(&json!({"=key": "v"}), &ctx).unwrap(), json!({"=key": "v"}));
    }

    #[test]
    fn test_convert_error() {
        let ctx = Context::new();
        assert_eq!(
            convert(&json!(["=V.missing"]), &ctx),
            Err(EvalError::path_not_found("V.missing"))
        );
    }

    #[test]
    fn test_bind_params_merges_defaults() {
        let mut ctx = Context::new().with_var("who", json!("bob"));
        ctx.merge_defaults("match", object(json!({"string": "=V.who", "value": "alice"})));

        let bound = bind_params("match", &json!({"value": "bob"}), &ctx).unwrap();
        assert_eq!(Value::Object(bound), json!({"string": "bob", "value": "bob"}));
    }

    #[test]
    fn test_bind_params_without_fields() {
        let mut ctx = Context::new();
        ctx.merge_defaults("log", object(json!({"msg": "hi"})));
        let bound = bind_params("log", &Value::Null, &ctx).unwrap();
        assert_eq!(Value::Object(bound), json!({"msg": "hi"}));
    }

    #[test]
    fn test_bind_params_rejects_scalars() {
        assert!(matches!(
            bind_params("log", &json!("msg"), &Context::new()),
            Err(ConfigError::InvalidDirective { .. })
        ));
    }

    #[test]
    fn test_bind_params_binding_error() {
        assert!(matches!(
            bind_params("log", &json!({"msg": "=nope"}), &Context::new()),
            Err(ConfigError::Binding { .. })
        ));
    }
}
