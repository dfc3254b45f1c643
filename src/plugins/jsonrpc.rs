use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use validator::Validate;

use super::http::{BasicAuth, client};
use crate::executor::traits::{Predicate, decode_params};
use crate::pipeline::{Context, PluginError};

#[derive(Debug, Deserialize, Validate)]
struct Params {
    #[validate(length(min = 1))]
    url: String,
    #[validate(length(min = 1))]
    procedure: String,
    params: Option<Value>,
    #[validate(nested)]
    basic_auth: Option<BasicAuth>,
}

/// `jsonrpc`: call a JSON-RPC 2.0 procedure
///
/// `params` is sent as given when it is a list or a mapping, and wrapped
/// in a list otherwise. The outcome is `false` when the server answers
/// with an error; the result holds the server's `response`.
#[derive(Debug, Default)]
pub struct JsonRpcPredicate {
    response: Option<Value>,
}

impl Predicate for JsonRpcPredicate {
    fn name(&self) -> &str {
        "jsonrpc"
    }

    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "minLength": 1},
                "procedure": {"type": "string", "minLength": 1},
                "params": {},
                "basic_auth": {
                    "type": "object",
                    "properties": {
                        "username": {"type": "string"},
                        "password": {"type": "string"},
                    },
                },
            },
            "required": ["url", "procedure"],
        })
    }

    fn call(&mut self, params: &Map<String, Value>, _ctx: &mut Context) -> Result<bool, PluginError> {
        let params: Params = decode_params(params)?;

        let mut payload = json!({
            "jsonrpc": "2.0",
            "method": params.procedure,
            "id": 0,
        });
        match params.params {
            None | Some(Value::Null) => {}
            Some(p @ (Value::Array(_) | Value::Object(_))) => payload["params"] = p,
            Some(p) => payload["params"] = json!([p]),
        }
        debug!(url = %params.url, request = %payload, "Calling procedure");

        let mut request = client()?
            .post(&params.url)
            .header(ACCEPT, "application/json")
            .json(&payload);
        if let Some(auth) = &params.basic_auth {
            debug!("Enabling basic auth");
            request = auth.apply(request);
        }

        let reply: Value = request
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json())
            .map_err(|e| PluginError::failed(format!("jsonrpc call failed: {}", e)))?;

        if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
            warn!(error = %error, "jsonrpc call error");
            return Ok(false);
        }
        let response = reply.get("result").cloned().unwrap_or(Value::Null);
        debug!(response = %response, "Server response");
        self.response = Some(response);
        Ok(true)
    }

    fn result(&self) -> Option<Map<String, Value>> {
        let response = self.response.as_ref()?;
        let mut result = Map::new();
        result.insert("response".to_string(), response.clone());
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn call(params: Value) -> Result<(bool, Option<Map<String, Value>>), PluginError> {
        let mut plugin = JsonRpcPredicate::default();
        let outcome = plugin.call(params.as_object().unwrap(), &mut Context::new())?;
        Ok((outcome, plugin.result()))
    }

    #[test]
    fn test_named_params() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/rpc")
            .match_body(Matcher::PartialJson(json!({
                "jsonrpc": "2.0",
                "method": "test1",
                "params": {"param1": "value1"},
            })))
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc": "2.0", "id": 0, "result": {"done": true}}"#)
            .create();

        let (outcome, result) = call(json!({
            "url": format!("{}/rpc", server.url()),
            "procedure": "test1",
            "params": {"param1": "value1"},
        }))
        .unwrap();
        mock.assert();
        assert!(outcome);
        assert_eq!(result.unwrap()["response"], json!({"done": true}));
    }

    #[test]
    fn test_scalar_param_is_wrapped() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/")
            .match_header("authorization", "Basic dXNlcjpwYXNz")
            .match_body(Matcher::PartialJson(json!({"method": "ping", "params": [42]})))
            .with_body(r#"{"jsonrpc": "2.0", "id": 0, "result": "pong"}"#)
            .create();

        let (outcome, result) = call(json!({
            "url": server.url(),
            "procedure": "ping",
            "params": 42,
            "basic_auth": {"username": "user", "password": "pass"},
        }))
        .unwrap();
        mock.assert();
        assert!(outcome);
        assert_eq!(result.unwrap()["response"], json!("pong"));
    }

    #[test]
    fn test_server_error() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/")
            .with_body(r#"{"jsonrpc": "2.0", "id": 0, "error": {"code": -32601, "message": "Method not found"}}"#)
            .create();

        let (outcome, result) = call(json!({"url": server.url(), "procedure": "nope"})).unwrap();
        assert!(!outcome);
        assert!(result.is_none());
    }
}
