use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while evaluating an `=` expression
///
/// These never abort the process: the caller decides whether an error
/// means "guard false", "abort this step" or "keep going".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// The expression text could not be parsed
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// A bare identifier did not resolve in the current scope
    #[error("Unknown identifier: {name}")]
    UnknownIdentifier { name: String },

    /// A field or key was not found
    #[error("Path not found: {path}")]
    PathNotFound { path: String },

    /// Type mismatch or invalid type operation
    #[error("Type error: {message}{}", describe_types(.expected, .actual))]
    TypeError {
        message: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Division or modulo by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// List index out of bounds
    #[error("Index out of bounds: {index} (length: {length})")]
    IndexOutOfBounds { index: i64, length: usize },

    /// Call to a function outside the built-in table
    #[error("Unknown function: {name}()")]
    UnknownFunction { name: String },

    /// A built-in function rejected its arguments
    #[error("{name}(): {message}")]
    Function { name: String, message: String },

    /// A JSONPath query failed
    #[error("JSONPath '{path}': {message}")]
    JsonPath { path: String, message: String },
}

fn describe_types(expected: &Option<String>, actual: &Option<String>) -> String {
    match (expected, actual) {
        (Some(exp), Some(act)) => format!(" (expected {}, got {})", exp, act),
        _ => String::new(),
    }
}

impl EvalError {
    /// Create a Syntax error
    pub fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }

    /// Create an UnknownIdentifier error
    pub fn unknown_identifier(name: impl Into<String>) -> Self {
        Self::UnknownIdentifier { name: name.into() }
    }

    /// Create a PathNotFound error
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound { path: path.into() }
    }

    /// Create a TypeError error
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError {
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    /// Create a TypeError error with expected and actual types
    pub fn type_error_with_types(
        message: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::TypeError {
            message: message.into(),
            expected: Some(expected.into()),
            actual: Some(actual.into()),
        }
    }

    /// Create a Function error
    pub fn function(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Function {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a JsonPath error
    pub fn jsonpath(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JsonPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the error only says that something was absent
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            EvalError::UnknownIdentifier { .. } | EvalError::PathNotFound { .. }
        )
    }
}

/// A configuration problem local to one step
///
/// The offending step evaluates to `false`; the process keeps serving.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Two content directives in the same step
    #[error("'{second}' declared with '{first}' in the same step")]
    ConflictingDirectives { first: String, second: String },

    /// A key that is neither a control directive nor a registered plugin
    #[error("Unknown predicate '{name}'")]
    UnknownPredicate { name: String },

    /// A control directive with a value of the wrong shape
    #[error("Invalid '{directive}': {message}")]
    InvalidDirective { directive: String, message: String },

    /// A step with control directives only
    #[error("No predicate found")]
    MissingContent,

    /// `register` on a sub-pipe step
    #[error("Cannot set 'register' on a 'pipe'")]
    RegisterOnPipe,

    /// A directive's value could not be bound
    #[error("Cannot bind '{directive}': {source}")]
    Binding {
        directive: String,
        #[source]
        source: EvalError,
    },

    /// `when` or `result` did not produce a boolean
    #[error("'{directive}' is not boolean (got {actual})")]
    NotBoolean { directive: String, actual: String },

    /// Bound parameters rejected by the plugin's schema
    #[error("Invalid params for '{plugin}': {}", .errors.join("; "))]
    InvalidParams { plugin: String, errors: Vec<String> },
}

impl ConfigError {
    /// Create a ConflictingDirectives error
    pub fn conflicting(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self::ConflictingDirectives {
            first: first.into(),
            second: second.into(),
        }
    }

    /// Create an InvalidDirective error
    pub fn invalid_directive(directive: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDirective {
            directive: directive.into(),
            message: message.into(),
        }
    }

    /// Create a Binding error
    pub fn binding(directive: impl Into<String>, source: EvalError) -> Self {
        Self::Binding {
            directive: directive.into(),
            source,
        }
    }
}

/// Failures while loading the configuration; fatal at startup
#[derive(Debug, Error)]
pub enum LoadError {
    /// The document could not be read
    #[error("Cannot read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML
    #[error("Invalid YAML in '{source_name}': {source}")]
    Yaml {
        source_name: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// The document does not have the expected shape
    #[error("{position}: {message}")]
    Structure { position: String, message: String },

    /// A file includes itself, directly or not
    #[error("Include cycle on '{}'", .path.display())]
    IncludeCycle { path: PathBuf },

    /// A plugin declared a parameter schema that does not compile
    #[error("Invalid parameter schema for plugin '{plugin}': {message}")]
    InvalidSchema { plugin: String, message: String },
}

impl LoadError {
    /// Create a Structure error
    pub fn structure(position: impl ToString, message: impl Into<String>) -> Self {
        Self::Structure {
            position: position.to_string(),
            message: message.into(),
        }
    }
}

/// Raised by a plugin's own logic; the step then evaluates to `false`
#[derive(Debug, Error)]
pub enum PluginError {
    /// Parameters passed the schema but not the plugin's own checks
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// I/O failure inside the plugin
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Anything else the plugin wants to report
    #[error("{0}")]
    Failed(String),
}

impl PluginError {
    /// Create a Failed error
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
