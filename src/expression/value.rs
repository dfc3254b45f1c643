use serde_json::{Number, Value};
use std::cmp::Ordering;

use super::ast::BinaryOp;
use crate::pipeline::EvalError;

/// Get the type name of a value for error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Render a value as text: strings unquoted, everything else as JSON
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Require a boolean, as `when`, `result`, `!`, `&&` and `||` do
pub fn expect_bool(value: &Value, what: &str) -> Result<bool, EvalError> {
    value.as_bool().ok_or_else(|| {
        EvalError::type_error_with_types(format!("{} must be boolean", what), "boolean", type_name(value))
    })
}

/// Equality: numbers compare by value (`1 == 1.0`), everything else structurally
pub fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => l == r,
            _ => l.as_f64() == r.as_f64(),
        },
        _ => left == right,
    }
}

/// Compare two values for ordering operations (>, >=, <, <=)
///
/// Numbers compare numerically and strings lexicographically; any other
/// combination is a TypeError.
pub fn compare(left: &Value, right: &Value) -> Result<Ordering, EvalError> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            if let (Some(l), Some(r)) = (l.as_i64(), r.as_i64()) {
                return Ok(l.cmp(&r));
            }
            let l_f64 = l
                .as_f64()
                .ok_or_else(|| EvalError::type_error("Failed to convert number to f64"))?;
            let r_f64 = r
                .as_f64()
                .ok_or_else(|| EvalError::type_error("Failed to convert number to f64"))?;
            l_f64
                .partial_cmp(&r_f64)
                .ok_or_else(|| EvalError::type_error("Cannot compare NaN values"))
        }
        (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
        _ => Err(EvalError::type_error_with_types(
            "Cannot compare values of different types",
            type_name(left),
            type_name(right),
        )),
    }
}

/// `+ - * / %`
pub fn arithmetic(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match (op, left, right) {
        (BinaryOp::Add, Value::String(l), r) => Ok(Value::String(l + &display(&r))),
        (BinaryOp::Add, l, Value::String(r)) => Ok(Value::String(display(&l) + &r)),
        (BinaryOp::Add, Value::Array(mut l), Value::Array(r)) => {
            l.extend(r);
            Ok(Value::Array(l))
        }
        (op, Value::Number(l), Value::Number(r)) => numeric(op, &l, &r),
        (op, l, r) => Err(EvalError::type_error_with_types(
            format!("Cannot apply '{}' to {} and {}", op.symbol(), type_name(&l), type_name(&r)),
            "number",
            if l.is_number() { type_name(&r) } else { type_name(&l) },
        )),
    }
}

fn numeric(op: BinaryOp, l: &Number, r: &Number) -> Result<Value, EvalError> {
    if let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) {
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div if b == 0 => return Err(EvalError::DivisionByZero),
            BinaryOp::Div if a.checked_rem(b) == Some(0) => a.checked_div(b),
            BinaryOp::Div => None,
            BinaryOp::Mod if b == 0 => return Err(EvalError::DivisionByZero),
            BinaryOp::Mod => a.checked_rem(b),
            _ => None,
        };
        if let Some(n) = exact {
            return Ok(Value::from(n));
        }
    }

    let (a, b) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(EvalError::type_error("Failed to convert number to f64")),
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        other => {
            return Err(EvalError::type_error(format!(
                "'{}' is not an arithmetic operator",
                other.symbol()
            )));
        }
    };
    Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| EvalError::type_error("Arithmetic result is not a finite number"))
}

/// `needle in haystack`: list membership, map key or substring
pub fn contains(needle: &Value, haystack: &Value) -> Result<bool, EvalError> {
    match (needle, haystack) {
        (n, Value::Array(items)) => Ok(items.iter().any(|item| equals(n, item))),
        (Value::String(key), Value::Object(map)) => Ok(map.contains_key(key)),
        (Value::String(part), Value::String(whole)) => Ok(whole.contains(part.as_str())),
        (n, h) => Err(EvalError::type_error_with_types(
            format!("Cannot look for {} in {}", type_name(n), type_name(h)),
            "list",
            type_name(h),
        )),
    }
}
