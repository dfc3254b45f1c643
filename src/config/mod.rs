/// Configuration types for the broker
///
/// This module contains the document model (pipes of steps) and the YAML
/// loader that builds it, expanding `include` entries and classifying
/// each step's directives once, before any request is served.

mod loader;
mod model;

pub use loader::{load_file, load_str};
pub use model::{Content, Directives, Pipe, PipelineConfig, Position, Step};
