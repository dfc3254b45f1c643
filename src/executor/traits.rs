use jsonschema::Validator;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use validator::Validate;

use crate::pipeline::{ConfigError, Context, LoadError, PluginError};

/// Trait for predicate plugins
///
/// A plugin is looked up by name, receives its bound parameters and the
/// current context, and answers `true` or `false`. Whatever it wants to
/// expose through `register` is returned by [`Predicate::result`] after
/// the call.
///
/// A fresh instance is created for every invocation, so implementations
/// can keep per-call state in `self`.
pub trait Predicate: Send {
    /// Directive key naming this plugin in configuration
    fn name(&self) -> &str;

    /// JSON Schema of the bound parameters
    fn params_schema(&self) -> Value;

    /// Run the predicate
    fn call(&mut self, params: &Map<String, Value>, ctx: &mut Context) -> Result<bool, PluginError>;

    /// Data to expose under `R.<register>` after [`Predicate::call`]
    fn result(&self) -> Option<Map<String, Value>> {
        None
    }
}

/// Creates a fresh plugin instance
pub type Factory = Arc<dyn Fn() -> Box<dyn Predicate> + Send + Sync>;

struct Entry {
    factory: Factory,
    schema: Validator,
}

/// Plugins available to configuration, by name
///
/// Populated once at startup and only read afterwards; share it behind an
/// `Arc` across request workers.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Entry>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every built-in plugin
    pub fn with_builtins() -> Result<Self, LoadError> {
        let mut registry = Self::new();
        crate::plugins::register_builtins(&mut registry)?;
        Ok(registry)
    }

    /// Add a plugin; its parameter schema is compiled here
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register<F>(&mut self, factory: F) -> Result<(), LoadError>
    where
        F: Fn() -> Box<dyn Predicate> + Send + Sync + 'static,
    {
        let probe = factory();
        let name = probe.name().to_string();
        let schema = jsonschema::validator_for(&probe.params_schema()).map_err(|e| {
            LoadError::InvalidSchema {
                plugin: name.clone(),
                message: e.to_string(),
            }
        })?;
        self.plugins.insert(
            name,
            Entry {
                factory: Arc::new(factory),
                schema,
            },
        );
        Ok(())
    }

    /// Whether a plugin of that name exists
    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Registered plugin names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    /// Check bound parameters against a plugin's schema and build an instance
    ///
    /// Returns `Ok(None)` when no plugin has that name.
    pub fn instantiate(
        &self,
        name: &str,
        params: &Map<String, Value>,
    ) -> Result<Option<Box<dyn Predicate>>, ConfigError> {
        let Some(entry) = self.plugins.get(name) else {
            return Ok(None);
        };
        let instance = Value::Object(params.clone());
        if !entry.schema.is_valid(&instance) {
            let errors: Vec<String> = entry
                .schema
                .iter_errors(&instance)
                .map(|e| e.to_string())
                .collect();
            return Err(ConfigError::InvalidParams {
                plugin: name.to_string(),
                errors,
            });
        }
        Ok(Some((entry.factory)()))
    }
}

/// Decode bound parameters into a plugin's typed parameter struct
pub fn decode_params<T>(params: &Map<String, Value>) -> Result<T, PluginError>
where
    T: DeserializeOwned + Validate,
{
    let decoded: T = serde_json::from_value(Value::Object(params.clone()))
        .map_err(|e| PluginError::InvalidParams(e.to_string()))?;
    decoded
        .validate()
        .map_err(|e| PluginError::InvalidParams(e.to_string()))?;
    Ok(decoded)
}
