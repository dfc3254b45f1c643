/// The `=` expression mini-language
///
/// A string whose first character is `=` is an expression; anything else is
/// a literal and comes back unchanged. Expressions see three roots: `In`
/// (request facts), `V` (variables) and `R` (registered results).
///
/// ```
/// use broker::expression::evaluate;
/// use broker::pipeline::Context;
/// use serde_json::json;
///
/// let ctx = Context::new().with_var("list", json!(["a", "b"]));
/// assert_eq!(evaluate("=V.list[1]", &ctx).unwrap(), json!("b"));
/// assert_eq!(evaluate("plain text", &ctx).unwrap(), json!("plain text"));
/// ```
pub mod ast;
pub mod eval;
pub mod functions;
pub mod jsonpath;
pub mod lexer;
pub mod parser;
pub mod value;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use eval::Scope;
pub use parser::parse;

use serde_json::Value;
use std::borrow::Cow;

use crate::pipeline::{Context, EvalError};

/// Marks a string as an expression
pub const SIGIL: char = '=';

/// Evaluate a raw string against a context
pub fn evaluate(raw: &str, ctx: &Context) -> Result<Value, EvalError> {
    match raw.strip_prefix(SIGIL) {
        Some(src) => {
            let expr = parse(src)?;
            eval::eval(&expr, Scope::root(ctx)).map(Cow::into_owned)
        }
        None => Ok(Value::String(raw.to_string())),
    }
}
