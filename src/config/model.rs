use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::pipeline::ConfigError;

/// Where a configuration entry comes from: file plus pointer into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub source: Arc<str>,
    pub pointer: String,
}

impl Position {
    pub fn new(source: impl Into<Arc<str>>, pointer: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            pointer: pointer.into(),
        }
    }

    /// Position of a child entry (`/0` + `pipe` -> `/0/pipe`)
    pub fn child(&self, segment: impl fmt::Display) -> Self {
        Self {
            source: Arc::clone(&self.source),
            pointer: format!("{}/{}", self.pointer, segment),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pointer.is_empty() {
            write!(f, "{}:/", self.source)
        } else {
            write!(f, "{}:{}", self.source, self.pointer)
        }
    }
}

/// A loaded configuration document, includes already expanded
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Steps run once at startup against the seed context
    pub init: Option<Vec<Step>>,

    /// Top-level pipes, run in order for every request
    pub pipes: Vec<Pipe>,
}

/// A named, ordered list of steps
#[derive(Debug, Clone)]
pub struct Pipe {
    pub name: Option<String>,
    pub position: Position,

    /// Pipe-level `default`, applied when the pipe is entered
    pub defaults: Vec<(String, Value)>,

    pub steps: Vec<Step>,
}

impl Pipe {
    /// Name for diagnostics
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.position.to_string(),
        }
    }
}

/// One configuration entry
///
/// Directives are classified once when the document is loaded. A step
/// whose directives do not make sense keeps the error and evaluates to
/// `false` every time it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub position: Position,
    pub directives: Result<Directives, ConfigError>,
}

impl Step {
    /// Name for diagnostics
    pub fn label(&self) -> String {
        match &self.directives {
            Ok(Directives {
                name: Some(name), ..
            }) => name.clone(),
            _ => self.position.to_string(),
        }
    }
}

/// Control directives plus exactly one content directive
#[derive(Debug, Clone, PartialEq)]
pub struct Directives {
    /// `name`: human label
    pub name: Option<String>,
    /// `when`: guard, must bind to a boolean
    pub when: Option<Value>,
    /// `result`: outcome override, must bind to a boolean
    pub result: Option<Value>,
    /// `register`: key under `R` for the plugin's result
    pub register: Option<String>,
    pub content: Content,
}

/// The part of a step that does something
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// A plugin invocation, parameters still raw
    Plugin { name: String, params: Value },
    /// `variable`: assignments in document order
    Variables(Vec<(String, Value)>),
    /// `default`: predicate name -> raw field mapping
    Defaults(Vec<(String, Value)>),
    /// `pipe`: a nested pipe
    Pipe(Vec<Step>),
}

impl Content {
    /// Directive key for diagnostics
    pub fn kind(&self) -> &str {
        match self {
            Content::Plugin { name, .. } => name,
            Content::Variables(_) => "variable",
            Content::Defaults(_) => "default",
            Content::Pipe(_) => "pipe",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_position_display() {
        let root = Position::new("api.yml", "");
        assert_eq!(root.to_string(), "api.yml:/");
        assert_eq!(root.child(0).child("pipe").child(2).to_string(), "api.yml:/0/pipe/2");
    }

    #[test]
    fn test_step_label() {
        let position = Position::new("api.yml", "/1");
        let named = Step {
            position: position.clone(),
            directives: Ok(Directives {
                name: Some("check token".to_string()),
                when: None,
                result: None,
                register: None,
                content: Content::Plugin {
                    name: "match".to_string(),
                    params: json!({}),
                },
            }),
        };
        assert_eq!(named.label(), "check token");

        let invalid = Step {
            position,
            directives: Err(ConfigError::MissingContent),
        };
        assert_eq!(invalid.label(), "api.yml:/1");
    }
}
