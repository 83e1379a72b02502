/// Pre-run workflow validation
///
/// Collects every structural problem at once so the caller can fix them in a
/// single pass. Errors make the workflow unrunnable; warnings do not.

use crate::error::ValidationError;
use crate::nodes::{NodeRegistry, EXECUTION_ID_KEY, NODE_ID_KEY};
use crate::workflow::graph::ExecutionPlan;
use crate::workflow::types::Workflow;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    #[serde(serialize_with = "serialize_errors")]
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

fn serialize_errors<S: serde::Serializer>(errors: &[ValidationError], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(ToString::to_string))
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

/// Validate a workflow against the registry
///
/// Cycle detection only runs once the graph is otherwise well formed.
pub fn validate(workflow: &Workflow, registry: &NodeRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();

    if workflow.nodes.is_empty() {
        report.errors.push(ValidationError::EmptyWorkflow);
        return report;
    }

    let mut ids = HashSet::new();
    for node in &workflow.nodes {
        if !ids.insert(node.id.as_str()) {
            report.errors.push(ValidationError::DuplicateNode(node.id.clone()));
        }
    }

    for edge in &workflow.edges {
        if edge.source == edge.target {
            report.errors.push(ValidationError::SelfLoop { edge_id: edge.id.clone(), node_id: edge.source.clone() });
            continue;
        }
        for endpoint in [&edge.source, &edge.target] {
            if !ids.contains(endpoint.as_str()) {
                report.errors.push(ValidationError::DanglingEdge { edge_id: edge.id.clone(), node_id: endpoint.clone() });
            }
        }
    }

    for node in &workflow.nodes {
        match registry.get(&node.node_type) {
            Ok(entry) => {
                let mut config = node.config.clone();
                config.remove(NODE_ID_KEY);
                config.remove(EXECUTION_ID_KEY);
                if let Err(errors) = entry.handler.validate(&config) {
                    report.errors.push(ValidationError::InvalidConfig { node_id: node.id.clone(), errors });
                }
            }
            Err(source) => report.errors.push(ValidationError::UnknownNodeType { node_id: node.id.clone(), source }),
        }
    }

    let structural = report.errors.iter().any(|err| {
        matches!(
            err,
            ValidationError::DuplicateNode(_) | ValidationError::SelfLoop { .. } | ValidationError::DanglingEdge { .. }
        )
    });
    if !structural {
        if let Err(err) = ExecutionPlan::build(&workflow.nodes, &workflow.edges) {
            report.errors.push(err);
        }
    }

    if workflow.nodes.len() > 1 {
        let connected: HashSet<&str> = workflow
            .edges
            .iter()
            .flat_map(|edge| [edge.source.as_str(), edge.target.as_str()])
            .collect();
        for node in &workflow.nodes {
            if !connected.contains(node.id.as_str()) {
                report.warnings.push(format!("node '{}' is not connected to any other node", node.id));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::nodes::builtin::bootstrap_registry;
    use crate::workflow::types::Node;

    fn make_graph(nodes: &[(&str, &str)], edges: &[(&str, &str)]) -> Workflow {
        let mut workflow = Workflow::new("wf", "test");
        for (id, node_type) in nodes {
            workflow = workflow.with_node(Node::new(*id, *node_type).with_config("text", "x"));
        }
        for (from, to) in edges {
            workflow = workflow.with_edge(*from, *to);
        }
        workflow
    }

    #[test]
    fn test_valid_workflow() {
        let registry = bootstrap_registry();
        let wf = make_graph(&[("A", "text_input"), ("B", "uppercase")], &[("A", "B")]);
        let report = validate(&wf, &registry);
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_unknown_type_names_node() {
        let registry = bootstrap_registry();
        let wf = make_graph(&[("n1", "does_not_exist")], &[]);
        let report = validate(&wf, &registry);
        assert_eq!(
            report.errors,
            vec![ValidationError::UnknownNodeType {
                node_id: "n1".into(),
                source: RegistryError::UnknownNodeType("does_not_exist".into()),
            }]
        );
    }

    #[test]
    fn test_cycle_detected() {
        let registry = bootstrap_registry();
        let wf = make_graph(&[("A", "uppercase"), ("B", "uppercase")], &[("A", "B"), ("B", "A")]);
        let report = validate(&wf, &registry);
        assert_eq!(report.errors, vec![ValidationError::Cycle { node_ids: vec!["A".into(), "B".into()] }]);
    }

    #[test]
    fn test_collects_every_error() {
        let registry = bootstrap_registry();
        let mut wf = make_graph(&[("A", "text_input"), ("B", "nope")], &[("A", "ghost"), ("A", "A")]);
        wf.nodes[0].config.clear();
        let report = validate(&wf, &registry);
        assert_eq!(report.errors.len(), 4, "{:?}", report.messages());
    }

    #[test]
    fn test_orphan_is_warning() {
        let registry = bootstrap_registry();
        let wf = make_graph(&[("A", "text_input"), ("B", "uppercase"), ("lonely", "text_input")], &[("A", "B")]);
        let report = validate(&wf, &registry);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("lonely"));
    }

    #[test]
    fn test_empty_workflow() {
        let report = validate(&Workflow::new("wf", "empty"), &bootstrap_registry());
        assert_eq!(report.errors, vec![ValidationError::EmptyWorkflow]);
    }
}
