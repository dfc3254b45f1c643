use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;
use validator::Validate;

use crate::executor::traits::{Predicate, decode_params};
use crate::pipeline::{Context, PluginError};

/// Bytes of body read at most, unless `limit` says otherwise
pub const DEFAULT_LIMIT: u64 = 1_232_896;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BodyType {
    Json,
    String,
}

#[derive(Debug, Deserialize, Validate)]
struct Params {
    #[serde(rename = "type")]
    kind: Option<BodyType>,
    #[validate(length(min = 1))]
    mime: Option<String>,
    #[serde(default = "default_limit")]
    limit: u64,
}

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

/// `body`: check and decode the request body
///
/// Always `false` for GET, HEAD and DELETE. With `mime`, the media type of
/// the `Content-Type` header must be equal. With `type`, the body (cut at
/// `limit` bytes) is exposed as `payload`, decoded as JSON or taken as text.
#[derive(Debug, Default)]
pub struct BodyPredicate {
    payload: Option<Value>,
}

impl Predicate for BodyPredicate {
    fn name(&self) -> &str {
        "body"
    }

    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "type": {"enum": ["json", "string"]},
                "mime": {"type": "string"},
                "limit": {"type": "integer", "minimum": 0},
            },
        })
    }

    fn call(&mut self, params: &Map<String, Value>, ctx: &mut Context) -> Result<bool, PluginError> {
        let params: Params = decode_params(params)?;
        let incoming = ctx.incoming();

        if matches!(incoming.method.as_str(), "GET" | "HEAD" | "DELETE") {
            debug!(method = %incoming.method, "No body expected");
            return Ok(false);
        }

        if let Some(expected) = &params.mime {
            let Some(actual) = incoming.header("content-type").map(media_type) else {
                debug!(mime = %expected, "No Content-Type");
                return Ok(false);
            };
            if actual != expected.to_ascii_lowercase() {
                debug!(mime = %expected, content_type = %actual, "Content-Type does not match");
                return Ok(false);
            }
        }

        let Some(kind) = params.kind else {
            return Ok(true);
        };
        let limit = usize::try_from(params.limit).unwrap_or(usize::MAX);
        let body = &incoming.body[..incoming.body.len().min(limit)];
        let payload = match kind {
            BodyType::String => Value::String(String::from_utf8_lossy(body).into_owned()),
            BodyType::Json => match serde_json::from_slice(body) {
                Ok(payload) => payload,
                Err(e) => {
                    debug!(error = %e, "Invalid JSON");
                    return Ok(false);
                }
            },
        };
        self.payload = Some(payload);
        Ok(true)
    }

    fn result(&self) -> Option<Map<String, Value>> {
        let payload = self.payload.as_ref()?;
        let mut result = Map::new();
        result.insert("payload".to_string(), payload.clone());
        Some(result)
    }
}

/// `text/html; charset=utf-8` -> `text/html`
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
