use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::model::{Content, Directives, Pipe, PipelineConfig, Position, Step};
use crate::executor::traits::PluginRegistry;
use crate::pipeline::{ConfigError, LoadError};

const INCLUDE: &str = "include";

/// Load a configuration file, expanding includes
pub fn load_file(path: impl AsRef<Path>, registry: &PluginRegistry) -> Result<PipelineConfig, LoadError> {
    Loader::new(registry).load_file(path.as_ref())
}

/// Load configuration text; relative includes resolve against `base_dir`
pub fn load_str(
    source_name: &str,
    text: &str,
    base_dir: &Path,
    registry: &PluginRegistry,
) -> Result<PipelineConfig, LoadError> {
    let document = parse_yaml(source_name, text)?;
    let origin = Origin {
        root: Position::new(source_name, ""),
        dir: base_dir.to_path_buf(),
    };
    Loader::new(registry).document(document, &origin)
}

fn parse_yaml(source_name: &str, text: &str) -> Result<Value, LoadError> {
    serde_yaml::from_str(text).map_err(|source| LoadError::Yaml {
        source_name: source_name.to_string(),
        source,
    })
}

/// The file an entry was read from
struct Origin {
    root: Position,
    /// Directory relative includes are resolved against
    dir: PathBuf,
}

/// Turns YAML documents into a [`PipelineConfig`]
///
/// Includes are spliced in place while reading; the files currently being
/// read are kept on a stack so that cycles are reported instead of followed.
struct Loader<'a> {
    registry: &'a PluginRegistry,
    stack: Vec<PathBuf>,
}

impl<'a> Loader<'a> {
    fn new(registry: &'a PluginRegistry) -> Self {
        Self {
            registry,
            stack: Vec::new(),
        }
    }

    fn load_file(&mut self, path: &Path) -> Result<PipelineConfig, LoadError> {
        let (document, origin) = self.open(path)?;
        let config = self.document(document, &origin);
        self.stack.pop();
        config
    }

    /// Read and parse a file, pushing it on the include stack
    fn open(&mut self, path: &Path) -> Result<(Value, Origin), LoadError> {
        let io_error = |source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        };
        let canonical = std::fs::canonicalize(path).map_err(io_error)?;
        if self.stack.contains(&canonical) {
            return Err(LoadError::IncludeCycle { path: canonical });
        }
        let text = std::fs::read_to_string(&canonical).map_err(io_error)?;
        let name = path.display().to_string();
        let document = parse_yaml(&name, &text)?;

        debug!(path = %canonical.display(), depth = self.stack.len(), "Loaded configuration file");
        let origin = Origin {
            root: Position::new(name, ""),
            dir: canonical.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        self.stack.push(canonical);
        Ok((document, origin))
    }

    /// Resolve an include entry and return the list it contains
    fn include(&mut self, target: &Value, position: &Position, origin: &Origin) -> Result<(Vec<Value>, Origin), LoadError> {
        let Some(target) = target.as_str() else {
            return Err(LoadError::structure(position, "'include' must be a file path"));
        };
        let (document, included) = self.open(&origin.dir.join(target))?;
        match document {
            Value::Array(entries) => Ok((entries, included)),
            _ => {
                self.stack.pop();
                Err(LoadError::structure(&included.root, "included document must be a list"))
            }
        }
    }

    fn document(&mut self, document: Value, origin: &Origin) -> Result<PipelineConfig, LoadError> {
        let Value::Array(entries) = document else {
            return Err(LoadError::structure(&origin.root, "top level must be a list"));
        };
        let mut config = PipelineConfig::default();
        self.entries(entries, origin, true, &mut config)?;
        Ok(config)
    }

    /// Top-level entries: the `init` block, pipes and includes of pipes
    fn entries(
        &mut self,
        entries: Vec<Value>,
        origin: &Origin,
        allow_init: bool,
        config: &mut PipelineConfig,
    ) -> Result<(), LoadError> {
        for (index, entry) in entries.into_iter().enumerate() {
            let position = origin.root.child(index);
            let Value::Object(map) = entry else {
                return Err(LoadError::structure(&position, "entry must be a mapping"));
            };

            if let Some(target) = map.get(INCLUDE) {
                only_key(&map, INCLUDE, &position)?;
                let (included, included_origin) = self.include(target, &position, origin)?;
                self.entries(included, &included_origin, false, config)?;
                self.stack.pop();
            } else if let Some(init) = map.get("init") {
                only_key(&map, "init", &position)?;
                if !(allow_init && index == 0) {
                    return Err(LoadError::structure(&position, "'init' must be the first entry"));
                }
                let position = position.child("init");
                let Value::Array(steps) = init else {
                    return Err(LoadError::structure(&position, "'init' must be a list"));
                };
                config.init = Some(self.steps(steps, &position, origin)?);
            } else {
                config.pipes.push(self.pipe(&map, position, origin)?);
            }
        }
        Ok(())
    }

    fn pipe(&mut self, map: &Map<String, Value>, position: Position, origin: &Origin) -> Result<Pipe, LoadError> {
        let mut name = None;
        let mut defaults = Vec::new();
        let mut steps = None;
        for (key, value) in map {
            match key.as_str() {
                "name" => match value.as_str() {
                    Some(s) => name = Some(s.to_string()),
                    None => return Err(LoadError::structure(&position, "'name' must be a string")),
                },
                "default" => {
                    defaults = default_fields(value)
                        .map_err(|e| LoadError::structure(position.child("default"), e.to_string()))?;
                }
                "pipe" => {
                    let position = position.child("pipe");
                    let Value::Array(list) = value else {
                        return Err(LoadError::structure(&position, "'pipe' must be a list"));
                    };
                    steps = Some(self.steps(list, &position, origin)?);
                }
                other => {
                    return Err(LoadError::structure(
                        &position,
                        format!("unexpected key '{}' in pipe entry", other),
                    ));
                }
            }
        }
        let Some(steps) = steps else {
            return Err(LoadError::structure(&position, "entry has no 'pipe'"));
        };
        Ok(Pipe {
            name,
            position,
            defaults,
            steps,
        })
    }

    /// A list of steps, includes spliced in place
    fn steps(&mut self, list: &[Value], position: &Position, origin: &Origin) -> Result<Vec<Step>, LoadError> {
        let mut steps = Vec::with_capacity(list.len());
        for (index, entry) in list.iter().enumerate() {
            let position = position.child(index);
            let Value::Object(map) = entry else {
                return Err(LoadError::structure(&position, "step must be a mapping"));
            };
            if let Some(target) = map.get(INCLUDE) {
                only_key(map, INCLUDE, &position)?;
                let (included, included_origin) = self.include(target, &position, origin)?;
                let root = included_origin.root.clone();
                let spliced = self.steps(&included, &root, &included_origin);
                self.stack.pop();
                steps.extend(spliced?);
            } else {
                steps.push(self.step(map, position, origin)?);
            }
        }
        Ok(steps)
    }

    /// Classify the directives of one step
    ///
    /// Only structural problems are load errors. Anything else is kept on
    /// the step and makes it evaluate to `false`.
    fn step(&mut self, map: &Map<String, Value>, position: Position, origin: &Origin) -> Result<Step, LoadError> {
        let mut name = None;
        let mut when = None;
        let mut result = None;
        let mut register = None;
        let mut content: Option<Content> = None;
        let mut error: Option<ConfigError> = None;

        for (key, value) in map {
            let found = match key.as_str() {
                "name" => {
                    match value.as_str() {
                        Some(s) => name = Some(s.to_string()),
                        None => {
                            error.get_or_insert(ConfigError::invalid_directive("name", "must be a string"));
                        }
                    }
                    continue;
                }
                "when" | "result" => {
                    if !(value.is_string() || value.is_boolean()) {
                        error.get_or_insert(ConfigError::invalid_directive(
                            key.as_str(),
                            "must be a boolean or an expression",
                        ));
                    } else if key == "when" {
                        when = Some(value.clone());
                    } else {
                        result = Some(value.clone());
                    }
                    continue;
                }
                "register" => {
                    match value.as_str().filter(|s| !s.is_empty()) {
                        Some(s) => register = Some(s.to_string()),
                        None => {
                            error.get_or_insert(ConfigError::invalid_directive(
                                "register",
                                "must be a non-empty string",
                            ));
                        }
                    }
                    continue;
                }
                "variable" => assignments(value).map(Content::Variables),
                "default" => default_fields(value).map(Content::Defaults),
                "pipe" => {
                    let position = position.child("pipe");
                    let Value::Array(list) = value else {
                        return Err(LoadError::structure(&position, "'pipe' must be a list"));
                    };
                    Ok(Content::Pipe(self.steps(list, &position, origin)?))
                }
                plugin if self.registry.contains(plugin) => Ok(Content::Plugin {
                    name: plugin.to_string(),
                    params: value.clone(),
                }),
                unknown => Err(ConfigError::UnknownPredicate {
                    name: unknown.to_string(),
                }),
            };

            match (found, &content) {
                (Err(e), _) => {
                    error.get_or_insert(e);
                }
                (Ok(_), Some(existing)) => {
                    error.get_or_insert(ConfigError::conflicting(existing.kind(), key.as_str()));
                }
                (Ok(found), None) => content = Some(found),
            }
        }

        let directives = match (error, content) {
            (Some(e), _) => Err(e),
            (None, None) => Err(ConfigError::MissingContent),
            (None, Some(Content::Pipe(_))) if register.is_some() => Err(ConfigError::RegisterOnPipe),
            (None, Some(content)) => Ok(Directives {
                name,
                when,
                result,
                register,
                content,
            }),
        };
        Ok(Step { position, directives })
    }
}

fn only_key(map: &Map<String, Value>, key: &str, position: &Position) -> Result<(), LoadError> {
    if map.len() == 1 {
        Ok(())
    } else {
        Err(LoadError::structure(position, format!("'{}' must be the only key of its entry", key)))
    }
}

/// `variable: [{name: value}, ...]`, or a single `{name: value, ...}` mapping
fn assignments(value: &Value) -> Result<Vec<(String, Value)>, ConfigError> {
    match value {
        Value::Array(list) => list
            .iter()
            .enumerate()
            .map(|(index, entry)| match entry {
                Value::Object(map) if map.len() == 1 => {
                    Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<_>>())
                }
                _ => Err(ConfigError::invalid_directive(
                    "variable",
                    format!("entry {} must be a single-key mapping", index),
                )),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|entries| entries.into_iter().flatten().collect()),
        Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        _ => Err(ConfigError::invalid_directive("variable", "must be a list of single-key mappings")),
    }
}

/// `default: {predicate: {field: value, ...}, ...}`
fn default_fields(value: &Value) -> Result<Vec<(String, Value)>, ConfigError> {
    let Value::Object(map) = value else {
        return Err(ConfigError::invalid_directive("default", "must be a mapping"));
    };
    map.iter()
        .map(|(predicate, fields)| match fields {
            Value::Object(_) => Ok((predicate.clone(), fields.clone())),
            Value::Null => Ok((predicate.clone(), Value::Object(Map::new()))),
            _ => Err(ConfigError::invalid_directive(
                "default",
                format!("fields of '{}' must be a mapping", predicate),
            )),
        })
        .collect()
}
