/// broker - A webhook broker driven by YAML pipes
///
/// This library provides the configuration loader, the `=` expression
/// language, the pipe executor and the built-in plugins behind the
/// `broker` server. Every HTTP request runs each top-level pipe in turn;
/// a pipe is a list of steps that bind parameters, call predicate plugins
/// and record their results for the steps that follow.

pub mod config;
pub mod executor;
pub mod expression;
pub mod pipeline;
pub mod plugins;
pub mod server;

// Re-export commonly used types
pub use config::{PipelineConfig, load_file, load_str};
pub use executor::Executor;
pub use executor::traits::{PluginRegistry, Predicate};
pub use pipeline::{ConfigError, Context, EvalError, Incoming, LoadError, PluginError};
