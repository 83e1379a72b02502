/// Node type registry using ArcSwap
///
/// Maps a node type key to its handler and palette metadata. Reads are
/// lock-free; a registration swaps the whole map pointer, so an execution that
/// already resolved its handlers keeps running against the entries it saw.
/// Handler and metadata live in one `Arc` and are always swapped together.

use crate::error::RegistryError;
use crate::nodes::{NodeHandler, NodeMetadata};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// A registered node type
pub struct RegisteredNode {
    pub handler: Arc<dyn NodeHandler>,
    pub metadata: Arc<NodeMetadata>,
}

impl std::fmt::Debug for RegisteredNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredNode")
            .field("type_key", &self.metadata.type_key)
            .finish_non_exhaustive()
    }
}

/// Process-wide catalog of node types
///
/// Populated by an explicit bootstrap at startup (see
/// `nodes::builtin::bootstrap_registry`).
#[derive(Debug, Default)]
pub struct NodeRegistry {
    /// Key: node type, Value: handler + metadata
    nodes: ArcSwap<HashMap<String, Arc<RegisteredNode>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type. Re-registering a key replaces the previous entry.
    pub fn register(&self, type_key: &str, handler: Arc<dyn NodeHandler>, mut metadata: NodeMetadata) {
        metadata.type_key = type_key.to_string();
        let entry = Arc::new(RegisteredNode { handler, metadata: Arc::new(metadata) });

        let previous = self.nodes.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(type_key.to_string(), entry.clone());
            next
        });

        if previous.contains_key(type_key) {
            tracing::debug!(node_type = type_key, "replaced node type registration");
        } else {
            tracing::debug!(node_type = type_key, "registered node type");
        }
    }

    /// Resolve a node type (lock-free read)
    pub fn get(&self, type_key: &str) -> Result<Arc<RegisteredNode>, RegistryError> {
        self.nodes
            .load()
            .get(type_key)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownNodeType(type_key.to_string()))
    }

    pub fn contains(&self, type_key: &str) -> bool {
        self.nodes.load().contains_key(type_key)
    }

    /// Metadata of every registered type, sorted by type key
    pub fn list_all(&self) -> Vec<Arc<NodeMetadata>> {
        let nodes = self.nodes.load();
        let mut all: Vec<_> = nodes.values().map(|entry| entry.metadata.clone()).collect();
        all.sort_by(|a, b| a.type_key.cmp(&b.type_key));
        all
    }

    pub fn len(&self) -> usize {
        self.nodes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.load().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{NodeContext, NodeOutput, NodeSchema};
    use async_trait::async_trait;
    use serde_json::{Map, Value};

    struct Fixed(&'static str);

    #[async_trait]
    impl NodeHandler for Fixed {
        fn schema(&self) -> NodeSchema {
            NodeSchema::new()
        }

        async fn execute(
            &self,
            _ctx: &NodeContext,
            _inputs: Map<String, Value>,
            _config: Map<String, Value>,
        ) -> anyhow::Result<NodeOutput> {
            Ok(NodeOutput::text(self.0))
        }
    }

    #[test]
    fn test_unknown_type() {
        let registry = NodeRegistry::new();
        let err = registry.get("does_not_exist").unwrap_err();
        assert_eq!(err, RegistryError::UnknownNodeType("does_not_exist".into()));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = NodeRegistry::new();
        registry.register("echo", Arc::new(Fixed("one")), NodeMetadata::new("ignored", "Echo v1", "test"));
        registry.register("echo", Arc::new(Fixed("two")), NodeMetadata::new("echo", "Echo v2", "test"));

        let entry = registry.get("echo").unwrap();
        assert_eq!(entry.metadata.name, "Echo v2");
        assert_eq!(entry.metadata.type_key, "echo");
        let out = entry
            .handler
            .execute(&NodeContext::detached("n"), Map::new(), Map::new())
            .await
            .unwrap();
        assert_eq!(out.data["text"], "two");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolved_entry_survives_reregistration() {
        let registry = NodeRegistry::new();
        registry.register("echo", Arc::new(Fixed("one")), NodeMetadata::new("echo", "v1", "test"));
        let held = registry.get("echo").unwrap();
        registry.register("echo", Arc::new(Fixed("two")), NodeMetadata::new("echo", "v2", "test"));
        assert_eq!(held.metadata.name, "v1");
        assert_eq!(registry.get("echo").unwrap().metadata.name, "v2");
    }

    #[test]
    fn test_list_all_sorted() {
        let registry = NodeRegistry::new();
        for key in ["zeta", "alpha", "mid"] {
            registry.register(key, Arc::new(Fixed("x")), NodeMetadata::new(key, key, "test"));
        }
        let keys: Vec<_> = registry.list_all().iter().map(|m| m.type_key.clone()).collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
    }
}
