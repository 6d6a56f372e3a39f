//! Flat, storable form of a [`ConversationGraph`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chat_core::{IdGenerator, Validate, ValidationErrors};
use serde::{Deserialize, Serialize};

use super::{ConversationGraph, Vertex, breadth_first};
use crate::error::GraphError;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    /// Root vertex id
    pub id: String,
    pub vertices: Vec<Vertex>,
    #[serde(default)]
    pub terminal_vertices: BTreeMap<String, String>,
    pub active_vertex: String,
}

impl ConversationGraph {
    /// Vertices are emitted breadth-first from the root in children order.
    pub fn save(&self) -> GraphSnapshot {
        GraphSnapshot {
            id: self.id.clone(),
            vertices: breadth_first(&self.vertices, &self.id)
                .into_iter()
                .cloned()
                .collect(),
            terminal_vertices: self.terminal.clone(),
            active_vertex: self.active_vertex.clone(),
        }
    }

    /// Rebuild a graph from a snapshot. The snapshot is validated as a whole
    /// first; nothing is restored when any check fails.
    pub fn restore(
        snapshot: GraphSnapshot,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, GraphError> {
        snapshot.validate().map_err(GraphError::InvalidSnapshot)?;

        let GraphSnapshot {
            id,
            vertices,
            terminal_vertices,
            active_vertex,
        } = snapshot;
        tracing::debug!(graph_id = %id, vertices = vertices.len(), "restoring graph");

        Ok(Self {
            id,
            vertices: vertices
                .into_iter()
                .map(|vertex| (vertex.id.clone(), vertex))
                .collect(),
            active_vertex,
            terminal: terminal_vertices,
            ids,
        })
    }
}

impl Validate for GraphSnapshot {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let mut by_id: HashMap<&str, &Vertex> = HashMap::new();

        for (index, vertex) in self.vertices.iter().enumerate() {
            if vertex.id.is_empty() {
                errors.push(format!("vertices[{index}].id"), "must not be empty");
            } else if by_id.insert(vertex.id.as_str(), vertex).is_some() {
                errors.push(
                    format!("vertices[{index}].id"),
                    format!("duplicate vertex id {}", vertex.id),
                );
            }
        }

        match by_id.get(self.id.as_str()) {
            None => errors.push("id", format!("root vertex {} is missing", self.id)),
            Some(root) if !root.parents.is_empty() => {
                errors.push("id", format!("root vertex {} has a parent", self.id))
            }
            Some(_) => {}
        }

        let mut message_ids = HashSet::new();
        for (index, vertex) in self.vertices.iter().enumerate() {
            let path = format!("vertices[{index}]");

            if vertex.id != self.id {
                match vertex.parents.as_slice() {
                    [parent] => match by_id.get(parent.as_str()) {
                        None => errors.push(
                            format!("{path}.parents"),
                            format!("parent {parent} does not exist"),
                        ),
                        Some(parent) if !parent.children.contains(&vertex.id) => errors.push(
                            format!("{path}.parents"),
                            format!("parent {} does not list {} as a child", parent.id, vertex.id),
                        ),
                        Some(_) => {}
                    },
                    parents => errors.push(
                        format!("{path}.parents"),
                        format!("expected exactly one parent, found {}", parents.len()),
                    ),
                }
            }

            let mut seen_children = HashSet::new();
            for child in &vertex.children {
                if !seen_children.insert(child.as_str()) {
                    errors.push(format!("{path}.children"), format!("child {child} listed twice"));
                    continue;
                }
                match by_id.get(child.as_str()) {
                    None => errors.push(
                        format!("{path}.children"),
                        format!("child {child} does not exist"),
                    ),
                    Some(child) if child.parents.len() != 1 || child.parent() != Some(vertex.id.as_str()) => errors.push(
                        format!("{path}.children"),
                        format!("child {} does not point back to {}", child.id, vertex.id),
                    ),
                    Some(_) => {}
                }
            }

            for message in &vertex.messages {
                if message.id.is_empty() {
                    errors.push(format!("{path}.messages"), "message id must not be empty");
                } else if !message_ids.insert(message.id.as_str()) {
                    errors.push(
                        format!("{path}.messages"),
                        format!("duplicate message id {}", message.id),
                    );
                }
            }
        }

        // Reachability also catches cycles: a cycle can never hang off the root
        // without some vertex on it having two parents.
        if by_id.contains_key(self.id.as_str()) {
            let mut reached = HashSet::new();
            let mut queue = VecDeque::from([self.id.as_str()]);
            while let Some(id) = queue.pop_front() {
                if !reached.insert(id) {
                    continue;
                }
                if let Some(vertex) = by_id.get(id) {
                    queue.extend(vertex.children.iter().map(String::as_str));
                }
            }
            let mut unreachable: Vec<&str> = by_id
                .keys()
                .copied()
                .filter(|id| !reached.contains(id))
                .collect();
            unreachable.sort_unstable();
            for id in unreachable {
                errors.push("vertices", format!("vertex {id} is not reachable from the root"));
            }
        }

        if !by_id.contains_key(self.active_vertex.as_str()) {
            errors.push(
                "activeVertex",
                format!("active vertex {} does not exist", self.active_vertex),
            );
        }

        for (parent, child) in &self.terminal_vertices {
            let valid = by_id
                .get(parent.as_str())
                .is_some_and(|vertex| vertex.children.contains(child));
            if !valid {
                errors.push(
                    format!("terminalVertices.{parent}"),
                    format!("{child} is not a child of {parent}"),
                );
            }
        }

        errors.into_result()
    }
}
