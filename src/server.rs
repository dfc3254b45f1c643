//! HTTP front end
//!
//! Every request, whatever its method or path, runs all top-level pipes
//! against its own copy of the seed context.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::executor::Executor;
use crate::executor::traits::PluginRegistry;
use crate::pipeline::{Context, Incoming};

/// Shared, read-only state of the server
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PipelineConfig>,
    pub registry: Arc<PluginRegistry>,
    /// Context left by `init`; copied for every request, never mutated
    pub seed: Arc<Context>,
}

impl AppState {
    /// Run `init` once and keep its context as the seed
    pub fn initialize(config: PipelineConfig, registry: PluginRegistry) -> Self {
        let mut seed = Context::new();
        if let Some(init) = &config.init {
            let executor = Executor::new(&registry);
            if !executor.run_init(init, &mut seed) {
                warn!("Init did not complete; serving with the state it reached");
            }
        }
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            seed: Arc::new(seed),
        }
    }
}

/// Create the router: a single catch-all handler
pub fn create_router(state: AppState) -> Router {
    Router::new().fallback(handle_request).with_state(state)
}

/// Listen on all interfaces and serve until the process stops
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Listening");
    axum::serve(listener, create_router(state)).await
}

async fn handle_request(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let incoming = incoming(&method, &uri, &headers, body);
    let path = incoming.path.clone();

    // The engine is synchronous and plugins may block.
    let worker = tokio::task::spawn_blocking(move || {
        let mut ctx = Context::from_seed(&state.seed, incoming);
        Executor::new(&state.registry).run_request(&state.config, &mut ctx)
    });

    match worker.await {
        Ok(outcome) => {
            debug!(method = %method, path = %path, result = outcome, "Request processed");
            StatusCode::OK
        }
        Err(e) => {
            error!(method = %method, path = %path, error = %e, "Request worker failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Request facts as seen by expressions and plugins
pub fn incoming(method: &Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> Incoming {
    let mut incoming = Incoming::new(method.as_str(), uri.path())
        .with_query_string(uri.query().unwrap_or_default())
        .with_body(body.to_vec());
    for (name, value) in headers {
        incoming = incoming.with_header(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }
    incoming
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_incoming_from_parts() {
        let mut headers = HeaderMap::new();
        headers.insert("x-token", HeaderValue::from_static("abc"));
        headers.append("x-token", HeaderValue::from_static("second"));
        let uri: Uri = "/hook?a=1&a=2&b=x%2By".parse().unwrap();

        let incoming = incoming(&Method::POST, &uri, &headers, Bytes::from_static(b"{}"));
        assert_eq!(incoming.method, "POST");
        assert_eq!(incoming.path, "/hook");
        assert_eq!(incoming.header("x-token"), Some("abc"));
        assert_eq!(incoming.query["a"], vec!["1", "2"]);
        assert_eq!(incoming.query["b"], vec!["x+y"]);
        assert_eq!(incoming.body, b"{}");
    }

    #[test]
    fn test_initialize_runs_init() {
        let registry = PluginRegistry::with_builtins().unwrap();
        let config = crate::config::load_str(
            "api.yml",
            "- init:\n    - variable: {token: abc}\n- pipe:\n    - log: {msg: hi}\n",
            std::path::Path::new("."),
            &registry,
        )
        .unwrap();
        let state = AppState::initialize(config, registry);
        assert_eq!(state.seed.var("token"), Some(&serde_json::json!("abc")));
    }
}
