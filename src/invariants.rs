use std::collections::HashSet;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::error::{LibError, Result};
use crate::models::{Event, Link, Node};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TwigletInvariantViolation {
    EmptyId,
    DuplicateNodeId { node_id: String },
    DuplicateLinkId { link_id: String },
    UnknownNodeReference {
        link_id: String,
        missing_node_id: String,
    },
}

impl TwigletInvariantViolation {
    pub const fn error_code(&self) -> &'static str {
        match self {
            TwigletInvariantViolation::EmptyId => "twiglet_empty_id",
            TwigletInvariantViolation::DuplicateNodeId { .. } => "twiglet_duplicate_node_id",
            TwigletInvariantViolation::DuplicateLinkId { .. } => "twiglet_duplicate_link_id",
            TwigletInvariantViolation::UnknownNodeReference { .. } => {
                "twiglet_unknown_node_reference"
            }
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            TwigletInvariantViolation::EmptyId => "Node and link ids must not be empty",
            TwigletInvariantViolation::DuplicateNodeId { .. } => {
                "Node ids must be unique within a twiglet"
            }
            TwigletInvariantViolation::DuplicateLinkId { .. } => {
                "Link ids must be unique within a twiglet"
            }
            TwigletInvariantViolation::UnknownNodeReference { .. } => {
                "Link references a node that does not exist"
            }
        }
    }
}

pub fn twiglet_invariant_violations(
    nodes: &[Node],
    links: &[Link],
) -> Vec<TwigletInvariantViolation> {
    let mut violations = Vec::new();

    let mut node_ids: HashSet<&str> = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if node.id.trim().is_empty() {
            violations.push(TwigletInvariantViolation::EmptyId);
            continue;
        }
        if !node_ids.insert(node.id.as_str()) {
            violations.push(TwigletInvariantViolation::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }

    let mut link_ids: HashSet<&str> = HashSet::with_capacity(links.len());
    for link in links {
        if link.id.trim().is_empty() {
            violations.push(TwigletInvariantViolation::EmptyId);
            continue;
        }
        if !link_ids.insert(link.id.as_str()) {
            violations.push(TwigletInvariantViolation::DuplicateLinkId {
                link_id: link.id.clone(),
            });
        }
        for endpoint in [&link.source, &link.target] {
            if !node_ids.contains(endpoint.as_str()) {
                violations.push(TwigletInvariantViolation::UnknownNodeReference {
                    link_id: link.id.clone(),
                    missing_node_id: endpoint.clone(),
                });
            }
        }
    }

    violations
}

pub fn ensure_twiglet_invariants(nodes: &[Node], links: &[Link]) -> Result<()> {
    let violations = twiglet_invariant_violations(nodes, links);
    if let Some(first) = violations.first() {
        return Err(LibError::invalid_with_code(
            first.error_code(),
            first.public_message(),
            anyhow!("twiglet invariant violations: {:?}", violations),
        ));
    }
    Ok(())
}

/// Every event a sequence names must exist in the twiglet.
pub fn ensure_sequence_events(event_ids: &[String], events: &[Event]) -> Result<()> {
    let known: HashSet<&str> = events.iter().map(|event| event.id.as_str()).collect();
    if let Some(missing) = event_ids.iter().find(|id| !known.contains(id.as_str())) {
        return Err(LibError::invalid_with_code(
            "sequence_unknown_event",
            "Sequence references an event that does not exist",
            anyhow!("unknown event id {}", missing),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{TwigletInvariantViolation, ensure_twiglet_invariants, twiglet_invariant_violations};
    use crate::models::{Link, Node};

    fn node(id: &str) -> Node {
        serde_json::from_value(json!({ "id": id, "name": id, "type": "ent1" }))
            .expect("node should deserialize")
    }

    fn link(id: &str, source: &str, target: &str) -> Link {
        serde_json::from_value(json!({ "id": id, "source": source, "target": target }))
            .expect("link should deserialize")
    }

    #[test]
    fn valid_twiglet_has_no_violations() {
        let nodes = vec![node("a"), node("b")];
        let links = vec![link("l1", "a", "b"), link("l2", "b", "a")];
        assert!(twiglet_invariant_violations(&nodes, &links).is_empty());
    }

    #[test]
    fn reports_duplicates_and_dangling_links() {
        let nodes = vec![node("a"), node("a")];
        let links = vec![link("l1", "a", "ghost"), link("l1", "a", "a")];
        let violations = twiglet_invariant_violations(&nodes, &links);
        assert_eq!(
            violations,
            vec![
                TwigletInvariantViolation::DuplicateNodeId {
                    node_id: "a".to_string()
                },
                TwigletInvariantViolation::UnknownNodeReference {
                    link_id: "l1".to_string(),
                    missing_node_id: "ghost".to_string()
                },
                TwigletInvariantViolation::DuplicateLinkId {
                    link_id: "l1".to_string()
                },
            ]
        );
    }

    #[test]
    fn first_violation_becomes_error_code() {
        let err = ensure_twiglet_invariants(&[node("a")], &[link("l1", "a", "b")])
            .expect_err("dangling link");
        assert_eq!(err.code, "twiglet_unknown_node_reference");
    }
}
