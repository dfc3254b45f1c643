use jsonpath_rust::JsonPath;
use serde_json::Value;

use crate::pipeline::EvalError;

/// Run a JSONPath query over `data`
///
/// A definite path (plain member and index steps) yields the single
/// matching value and fails when nothing matches. Any other path yields
/// the list of matches, possibly empty.
pub fn query(path: &str, data: &Value) -> Result<Value, EvalError> {
    let results = data
        .query(path)
        .map_err(|e| EvalError::jsonpath(path, e.to_string()))?;

    if is_definite(path) {
        if results.is_empty() {
            return Err(EvalError::jsonpath(path, "no match"));
        }
        if results.len() == 1 {
            return Ok(results[0].clone());
        }
    }
    Ok(Value::Array(results.into_iter().cloned().collect()))
}

/// No wildcard, recursive descent, filter, slice or union outside quotes
fn is_definite(path: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut previous = '\0';
    for c in path.chars() {
        match quote {
            Some(q) if c == q && previous != '\\' => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '*' | '?' | ':' | ',' => return false,
                '.' if previous == '.' => return false,
                _ => {}
            },
        }
        previous = c;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definite_path_returns_value() {
        let data = json!({"name": "value", "list": [1, 2, 3]});
        assert_eq!(query("$.name", &data).unwrap(), json!("value"));
        assert_eq!(query("$.list[1]", &data).unwrap(), json!(2));
        assert_eq!(query("$['name']", &data).unwrap(), json!("value"));
    }

    #[test]
    fn test_definite_path_without_match_fails() {
        let data = json!({"name": "value"});
        assert!(matches!(
            query("$.missing", &data),
            Err(EvalError::JsonPath { .. })
        ));
    }

    #[test]
    fn test_wildcard_returns_list() {
        let data = json!({"items": [{"id": 1}, {"id": 2}]});
        assert_eq!(query("$.items[*].id", &data).unwrap(), json!([1, 2]));
        assert_eq!(query("$..id", &data).unwrap(), json!([1, 2]));
        assert_eq!(query("$.nothing[*]", &data).unwrap(), json!([]));
    }

    #[test]
    fn test_quoted_wildcard_is_definite() {
        let data = json!({"a*b": 1});
        assert_eq!(query("$['a*b']", &data).unwrap(), json!(1));
    }

    #[test]
    fn test_invalid_path() {
        assert!(matches!(
            query("$[", &json!({})),
            Err(EvalError::JsonPath { .. })
        ));
    }
}
