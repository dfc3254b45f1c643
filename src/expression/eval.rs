use regex::Regex;
use serde_json::{Map, Value, json};
use std::borrow::Cow;
use std::cmp::Ordering;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::value::{arithmetic, compare, contains, equals, expect_bool, type_name};
use super::{functions, jsonpath};
use crate::pipeline::{Context, EvalError};

/// What an expression can see
///
/// Identifiers always resolve against the context. `$` queries the subject,
/// which is the left-hand result inside the right side of a `|`.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    ctx: &'a Context,
    subject: Option<&'a Value>,
}

impl<'a> Scope<'a> {
    pub fn root(ctx: &'a Context) -> Self {
        Self { ctx, subject: None }
    }

    fn identifier(&self, name: &str) -> Result<&'a Value, EvalError> {
        match name {
            "In" => Ok(self.ctx.input_value()),
            "V" => Ok(self.ctx.variables_value()),
            "R" => Ok(self.ctx.registered_value()),
            _ => Err(EvalError::unknown_identifier(name)),
        }
    }

    fn query(&self, path: &str) -> Result<Value, EvalError> {
        match self.subject {
            Some(subject) => jsonpath::query(path, subject),
            None => {
                let root = json!({
                    "In": self.ctx.input_value(),
                    "V": self.ctx.variables_value(),
                    "R": self.ctx.registered_value(),
                });
                jsonpath::query(path, &root)
            }
        }
    }
}

/// Evaluate an expression tree
pub fn eval<'a>(expr: &Expr, scope: Scope<'a>) -> Result<Cow<'a, Value>, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(Cow::Owned(value.clone())),

        Expr::Ident(name) => scope.identifier(name).map(Cow::Borrowed),

        Expr::JsonPath(path) => scope.query(path).map(Cow::Owned),

        Expr::List(items) => {
            let values = items
                .iter()
                .map(|item| eval(item, scope).map(Cow::into_owned))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Cow::Owned(Value::Array(values)))
        }

        Expr::Map(entries) => {
            let mut map = Map::new();
            for (key, item) in entries {
                map.insert(key.clone(), eval(item, scope)?.into_owned());
            }
            Ok(Cow::Owned(Value::Object(map)))
        }

        Expr::Field(base, name) => {
            let value = eval(base, scope)?;
            field(value, name).map_err(|e| match e {
                FieldError::Missing => EvalError::path_not_found(render_path(expr)),
                FieldError::NotAMap(actual) => EvalError::type_error_with_types(
                    format!("Cannot access field '{}' of {}", name, render_path(base)),
                    "map",
                    actual,
                ),
            })
        }

        Expr::Index(base, index) => {
            let value = eval(base, scope)?;
            let index = eval(index, scope)?;
            subscript(value, &index, || render_path(expr))
        }

        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|arg| eval(arg, scope).map(Cow::into_owned))
                .collect::<Result<Vec<_>, _>>()?;
            functions::call(name, &args).map(Cow::Owned)
        }

        Expr::Unary(op, operand) => {
            let value = eval(operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Cow::Owned(Value::Bool(!expect_bool(&value, "operand of '!'")?))),
                UnaryOp::Neg => arithmetic(BinaryOp::Sub, json!(0), value.into_owned()).map(Cow::Owned),
            }
        }

        Expr::Binary(op, left, right) => binary(*op, left, right, scope),

        Expr::Ternary(cond, then, otherwise) => {
            let cond = eval(cond, scope)?;
            if expect_bool(&cond, "condition of '?:'")? {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }

        Expr::Pipe(left, right) => {
            let subject = eval(left, scope)?;
            let inner = Scope {
                ctx: scope.ctx,
                subject: Some(&subject),
            };
            eval(right, inner).map(|v| Cow::Owned(v.into_owned()))
        }
    }
}

fn binary<'a>(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    scope: Scope<'a>,
) -> Result<Cow<'a, Value>, EvalError> {
    let boolean = |b: bool| Ok(Cow::Owned(Value::Bool(b)));
    match op {
        BinaryOp::And => {
            let what = "operand of '&&'";
            if !expect_bool(&*eval(left, scope)?, what)? {
                return boolean(false);
            }
            boolean(expect_bool(&*eval(right, scope)?, what)?)
        }
        BinaryOp::Or => {
            let what = "operand of '||'";
            if expect_bool(&*eval(left, scope)?, what)? {
                return boolean(true);
            }
            boolean(expect_bool(&*eval(right, scope)?, what)?)
        }
        BinaryOp::Coalesce => match eval(left, scope) {
            Ok(value) if !value.is_null() => Ok(value),
            Ok(_) => eval(right, scope),
            Err(e) if e.is_missing() => eval(right, scope),
            Err(e) => Err(e),
        },
        _ => {
            let l = eval(left, scope)?;
            let r = eval(right, scope)?;
            match op {
                BinaryOp::Eq => boolean(equals(&l, &r)),
                BinaryOp::Ne => boolean(!equals(&l, &r)),
                BinaryOp::Lt => boolean(compare(&l, &r)? == Ordering::Less),
                BinaryOp::Le => boolean(compare(&l, &r)? != Ordering::Greater),
                BinaryOp::Gt => boolean(compare(&l, &r)? == Ordering::Greater),
                BinaryOp::Ge => boolean(compare(&l, &r)? != Ordering::Less),
                BinaryOp::In => boolean(contains(&l, &r)?),
                BinaryOp::Matches => boolean(matches_regex(&l, &r)?),
                _ => arithmetic(op, l.into_owned(), r.into_owned()).map(Cow::Owned),
            }
        }
    }
}

fn matches_regex(text: &Value, pattern: &Value) -> Result<bool, EvalError> {
    let (Value::String(text), Value::String(pattern)) = (text, pattern) else {
        return Err(EvalError::type_error_with_types(
            "'=~' needs a string and a pattern",
            "string",
            format!("{} and {}", type_name(text), type_name(pattern)),
        ));
    };
    let regex = Regex::new(pattern)
        .map_err(|e| EvalError::type_error(format!("Invalid pattern '{}': {}", pattern, e)))?;
    Ok(regex.is_match(text))
}

enum FieldError {
    Missing,
    NotAMap(&'static str),
}

fn field<'a>(value: Cow<'a, Value>, name: &str) -> Result<Cow<'a, Value>, FieldError> {
    match value {
        Cow::Borrowed(Value::Object(map)) => map.get(name).map(Cow::Borrowed).ok_or(FieldError::Missing),
        Cow::Owned(Value::Object(mut map)) => map.remove(name).map(Cow::Owned).ok_or(FieldError::Missing),
        other => Err(FieldError::NotAMap(type_name(&other))),
    }
}

fn subscript<'a>(
    value: Cow<'a, Value>,
    index: &Value,
    path: impl Fn() -> String,
) -> Result<Cow<'a, Value>, EvalError> {
    match (&*value, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n.as_i64().ok_or_else(|| {
                EvalError::type_error_with_types("List index must be an integer", "integer", "float")
            })?;
            let length = items.len();
            let position = usize::try_from(i).ok().filter(|p| *p < length);
            let Some(position) = position else {
                return Err(EvalError::IndexOutOfBounds { index: i, length });
            };
            Ok(match value {
                Cow::Borrowed(list) => Cow::Borrowed(&list[position]),
                Cow::Owned(mut list) => Cow::Owned(list[position].take()),
            })
        }
        (Value::Object(_), Value::String(key)) => field(value, key).map_err(|_| EvalError::path_not_found(path())),
        (Value::Array(_), other) | (Value::Object(_), other) => Err(EvalError::type_error_with_types(
            "Invalid index type",
            if value.is_array() { "integer" } else { "string" },
            type_name(other),
        )),
        (other, _) => Err(EvalError::type_error_with_types(
            format!("Cannot index into {}", type_name(other)),
            "list or map",
            type_name(other),
        )),
    }
}

/// Dotted rendering of an access path for diagnostics (`V.list[1].name`)
fn render_path(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::JsonPath(path) => path.clone(),
        Expr::Field(base, name) => format!("{}.{}", render_path(base), name),
        Expr::Index(base, index) => match &**index {
            Expr::Literal(Value::String(key)) => format!("{}[{:?}]", render_path(base), key),
            Expr::Literal(value) => format!("{}[{}]", render_path(base), value),
            _ => format!("{}[...]", render_path(base)),
        },
        Expr::Call(name, _) => format!("{}(...)", name),
        _ => "(...)".to_string(),
    }
}
