/// Built-in node types
///
/// A small set of nodes for demos and tests. Provider-backed nodes (embedding,
/// vector search, hosted LLMs) plug into the same registry from outside.

mod file_loader;
mod mock_llm;
mod script;
mod text;

pub use file_loader::FileLoader;
pub use mock_llm::MockLlm;
pub use script::Script;
pub use text::{render_template, HtmlOutput, Summarize, Template, TextInput, Uppercase};

use crate::nodes::NodeRegistry;
use std::sync::Arc;

/// Register every built-in node type into `registry`
pub fn register_builtins(registry: &NodeRegistry) {
    registry.register("text_input", Arc::new(TextInput), TextInput::metadata());
    registry.register("file_loader", Arc::new(FileLoader), FileLoader::metadata());
    registry.register("uppercase", Arc::new(Uppercase), Uppercase::metadata());
    registry.register("template", Arc::new(Template), Template::metadata());
    registry.register("script", Arc::new(Script), Script::metadata());
    registry.register("summarize", Arc::new(Summarize), Summarize::metadata());
    registry.register("mock_llm", Arc::new(MockLlm), MockLlm::metadata());
    registry.register("html_output", Arc::new(HtmlOutput), HtmlOutput::metadata());
}

/// Fresh registry holding the built-in node types
pub fn bootstrap_registry() -> NodeRegistry {
    let registry = NodeRegistry::new();
    register_builtins(&registry);
    tracing::info!(node_types = registry.len(), "node registry bootstrapped");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_registers_every_builtin() {
        let registry = bootstrap_registry();
        let keys: Vec<_> = registry.list_all().iter().map(|m| m.type_key.clone()).collect();
        assert_eq!(
            keys,
            vec!["file_loader", "html_output", "mock_llm", "script", "summarize", "template", "text_input", "uppercase"]
        );
    }
}
