/// Built-in predicate plugins
///
/// Each plugin declares its parameters twice: as a JSON Schema checked by
/// the registry right after binding, and as a typed struct the plugin
/// decodes for itself.

mod body;
mod command;
mod header;
mod http;
mod jsonrpc;
mod log;
mod matching;
mod readfile;

pub use body::BodyPredicate;
pub use command::CommandPredicate;
pub use header::HeaderPredicate;
pub use http::HttpPredicate;
pub use jsonrpc::JsonRpcPredicate;
pub use log::LogPredicate;
pub use matching::MatchPredicate;
pub use readfile::ReadFilePredicate;

use crate::executor::traits::PluginRegistry;
use crate::pipeline::LoadError;

/// Add every built-in plugin to a registry
pub fn register_builtins(registry: &mut PluginRegistry) -> Result<(), LoadError> {
    registry.register(|| Box::new(MatchPredicate::default()))?;
    registry.register(|| Box::new(LogPredicate))?;
    registry.register(|| Box::new(HeaderPredicate::default()))?;
    registry.register(|| Box::new(BodyPredicate::default()))?;
    registry.register(|| Box::new(ReadFilePredicate::default()))?;
    registry.register(|| Box::new(CommandPredicate::default()))?;
    registry.register(|| Box::new(HttpPredicate::default()))?;
    registry.register(|| Box::new(JsonRpcPredicate::default()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_register() {
        let registry = PluginRegistry::with_builtins().unwrap();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["body", "command", "header", "http", "jsonrpc", "log", "match", "readfile"]
        );
    }
}
