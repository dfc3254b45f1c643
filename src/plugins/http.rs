use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::{debug, error, warn};
use validator::Validate;

use crate::executor::traits::{Predicate, decode_params};
use crate::pipeline::{Context, PluginError};

const METHODS: &[&str] = &["GET", "HEAD", "OPTIONS", "POST", "PUT", "DELETE", "PATCH"];

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct BasicAuth {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl BasicAuth {
    pub(crate) fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Body {
    Json(Value),
    String(String),
}

#[derive(Debug, Deserialize, Validate)]
struct Params {
    #[validate(length(min = 1))]
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    params: BTreeMap<String, String>,
    body: Option<Body>,
    #[serde(default = "default_response")]
    response: String,
    #[validate(nested)]
    basic_auth: Option<BasicAuth>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_response() -> String {
    "STRING".to_string()
}

/// `http`: send a request to a remote server
///
/// The outcome is `true` once a response has been read, whatever its
/// status. The result holds `code`, the response `type` (its
/// `Content-Type`) and `response`, decoded as JSON or kept as text.
#[derive(Debug, Default)]
pub struct HttpPredicate {
    result: Option<Map<String, Value>>,
}

impl Predicate for HttpPredicate {
    fn name(&self) -> &str {
        "http"
    }

    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "minLength": 1},
                "method": {"type": "string"},
                "headers": {
                    "type": "object",
                    "propertyNames": {"minLength": 1},
                    "additionalProperties": {"type": "string"},
                },
                "params": {
                    "type": "object",
                    "propertyNames": {"minLength": 1},
                    "additionalProperties": {"type": "string"},
                },
                "body": {
                    "type": "object",
                    "properties": {
                        "json": {},
                        "string": {"type": "string"},
                    },
                    "oneOf": [
                        {"required": ["json"]},
                        {"required": ["string"]},
                    ],
                    "additionalProperties": false,
                },
                "response": {"type": "string"},
                "basic_auth": {
                    "type": "object",
                    "properties": {
                        "username": {"type": "string"},
                        "password": {"type": "string"},
                    },
                },
            },
            "required": ["url"],
        })
    }

    fn call(&mut self, params: &Map<String, Value>, _ctx: &mut Context) -> Result<bool, PluginError> {
        let params: Params = decode_params(params)?;

        let method = params.method.to_ascii_uppercase();
        if !METHODS.contains(&method.as_str()) {
            return Err(PluginError::InvalidParams(format!("unsupported method '{}'", params.method)));
        }
        let json_response = match params.response.to_ascii_uppercase().as_str() {
            "JSON" => true,
            "STRING" => false,
            other => {
                return Err(PluginError::InvalidParams(format!(
                    "'response' must be JSON or STRING, not '{}'",
                    other
                )));
            }
        };
        let mut url = Url::parse(&params.url)
            .map_err(|e| PluginError::InvalidParams(format!("bad URL '{}': {}", params.url, e)))?;
        if !params.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&params.params);
        }
        debug!(method = %method, url = %url, "Sending request");

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| PluginError::InvalidParams(e.to_string()))?;
        let has_body = matches!(method.as_str(), "POST" | "PUT" | "PATCH");
        let mut request = client()?
            .request(method.clone(), url)
            .header(ACCEPT, if json_response { "application/json" } else { "*/*" });

        match (&params.body, has_body) {
            (Some(Body::Json(body)), true) => {
                request = request.header(CONTENT_TYPE, "application/json").body(body.to_string());
            }
            (Some(Body::String(body)), true) => {
                request = request.header(CONTENT_TYPE, "text/plain").body(body.clone());
            }
            (None, true) => warn!(method = %method, "Method should have a body"),
            (_, false) => {}
        }
        if let Some(auth) = &params.basic_auth {
            request = auth.apply(request);
        }
        for (name, value) in &params.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().map_err(|e| {
            error!(error = %e, "HTTP request failed");
            PluginError::failed(format!("request failed: {}", e))
        })?;
        let code = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = response
            .text()
            .map_err(|e| PluginError::failed(format!("cannot read response body: {}", e)))?;
        debug!(code, content_type = %content_type, "Response received");

        let body = if json_response {
            match serde_json::from_str(&text) {
                Ok(body) => body,
                Err(e) => {
                    error!(error = %e, "Response is not JSON");
                    return Ok(false);
                }
            }
        } else {
            Value::String(text)
        };

        let mut result = Map::new();
        result.insert("response".to_string(), body);
        result.insert("type".to_string(), json!(content_type));
        result.insert("code".to_string(), json!(code));
        self.result = Some(result);
        Ok(true)
    }

    fn result(&self) -> Option<Map<String, Value>> {
        self.result.clone()
    }
}

pub(crate) fn client() -> Result<Client, PluginError> {
    Client::builder()
        .build()
        .map_err(|e| PluginError::failed(format!("cannot create HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn call(params: Value) -> Result<(bool, Option<Map<String, Value>>), PluginError> {
        let mut plugin = HttpPredicate::default();
        let outcome = plugin.call(params.as_object().unwrap(), &mut Context::new())?;
        Ok((outcome, plugin.result()))
    }

    #[test]
    fn test_get_with_params_and_headers() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "rust lang".into()),
                Matcher::UrlEncoded("page".into(), "2".into()),
            ]))
            .match_header("x-api-key", "secret")
            .match_header("accept", "*/*")
            .with_status(201)
            .with_header("content-type", "text/plain")
            .with_body("found")
            .create();

        let (outcome, result) = call(json!({
            "url": format!("{}/search", server.url()),
            "params": {"q": "rust lang", "page": "2"},
            "headers": {"X-Api-Key": "secret"},
        }))
        .unwrap();
        mock.assert();
        assert!(outcome);
        assert_eq!(
            Value::Object(result.unwrap()),
            json!({"response": "found", "type": "text/plain", "code": 201})
        );
    }

    #[test]
    fn test_post_json_with_basic_auth() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_header("accept", "application/json")
            .match_header("authorization", "Basic dXNlcjpwYXNz")
            .match_body(Matcher::Json(json!({"event": "push"})))
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true}"#)
            .create();

        let (outcome, result) = call(json!({
            "url": format!("{}/hook", server.url()),
            "method": "post",
            "body": {"json": {"event": "push"}},
            "response": "json",
            "basic_auth": {"username": "user", "password": "pass"},
        }))
        .unwrap();
        mock.assert();
        assert!(outcome);
        assert_eq!(result.unwrap()["response"], json!({"ok": true}));
    }

    #[test]
    fn test_string_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("PUT", "/text")
            .match_header("content-type", "text/plain")
            .match_body("hello")
            .create();

        let (outcome, _) = call(json!({
            "url": format!("{}/text", server.url()),
            "method": "PUT",
            "body": {"string": "hello"},
        }))
        .unwrap();
        mock.assert();
        assert!(outcome);
    }

    #[test]
    fn test_json_expected_but_not_received() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/").with_body("<html>").create();

        let (outcome, result) = call(json!({"url": server.url(), "response": "JSON"})).unwrap();
        assert!(!outcome);
        assert!(result.is_none());
    }

    #[test]
    fn test_invalid_params() {
        assert!(matches!(
            call(json!({"url": "http://localhost/", "method": "FETCH"})),
            Err(PluginError::InvalidParams(_))
        ));
        assert!(matches!(
            call(json!({"url": "http://localhost/", "response": "XML"})),
            Err(PluginError::InvalidParams(_))
        ));
        assert!(matches!(
            call(json!({"url": "not a url"})),
            Err(PluginError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_unreachable_server() {
        assert!(matches!(
            call(json!({"url": "http://127.0.0.1:1/"})),
            Err(PluginError::Failed(_))
        ));
    }
}
