/// Evaluation state and error types
///
/// This module contains the Context shared by the steps of one
/// evaluation lifetime, and the errors each layer can raise.

mod context;
mod error;

pub use context::{Context, DefaultParams, Defaults, Incoming};
pub use error::{ConfigError, EvalError, LoadError, PluginError};
