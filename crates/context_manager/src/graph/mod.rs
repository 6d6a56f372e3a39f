//! Conversation Graph
//!
//! A chat is stored as a tree of vertices. Each vertex holds an ordered batch
//! of messages; its children are alternative continuations in insertion
//! order. The active path runs from the root down to the active vertex and is
//! what gets flattened into the transcript.
//!
//! ```text
//!            root (character definitions)
//!           /    \
//!     greeting-1  greeting-2        <- siblings, cycled by the UI
//!         |
//!       user
//!       /  \
//!  reply-a  reply-b                 <- regenerate adds reply-b
//! ```
//!
//! At every branch point the graph records which child was last chosen, so
//! switching back into a subtree lands on the leaf the user was viewing.

mod snapshot;

pub use snapshot::GraphSnapshot;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chat_core::{IdGenerator, Message, UuidGenerator};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// A node in the conversation tree.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Vertex {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Zero entries for the root, exactly one otherwise.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Ordered; list position is the branch order.
    #[serde(default)]
    pub children: Vec<String>,
}

impl Vertex {
    fn new(id: String, messages: Vec<Message>, parent: Option<&str>) -> Self {
        Self {
            id,
            messages,
            parents: parent.map(|p| vec![p.to_string()]).unwrap_or_default(),
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<&str> {
        self.parents.first().map(String::as_str)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Branching chat history with an active path.
#[derive(Clone)]
pub struct ConversationGraph {
    id: String,
    vertices: HashMap<String, Vertex>,
    active_vertex: String,
    /// parent id -> child last chosen under it
    terminal: BTreeMap<String, String>,
    ids: Arc<dyn IdGenerator>,
}

impl ConversationGraph {
    /// Empty graph: a root vertex with no messages.
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        let id = ids.next_id();
        let root = Vertex::new(id.clone(), Vec::new(), None);
        Self {
            vertices: HashMap::from([(id.clone(), root)]),
            active_vertex: id.clone(),
            id,
            terminal: BTreeMap::new(),
            ids,
        }
    }

    /// A new chat: the root carries `root_messages`, each greeting becomes
    /// its own child of the root, and the first greeting is active.
    pub fn seeded(
        ids: Arc<dyn IdGenerator>,
        root_messages: Vec<Message>,
        greetings: Vec<Message>,
    ) -> Self {
        let mut graph = Self::new(ids);
        let root_id = graph.id.clone();
        if let Some(root) = graph.vertices.get_mut(&root_id) {
            root.messages = root_messages;
        }

        let mut first = None;
        for greeting in greetings {
            let vertex_id = graph.insert_child(&root_id, vec![greeting]);
            first.get_or_insert(vertex_id);
        }
        if let Some(first) = first {
            graph.activate(&first);
        }
        graph
    }

    /// Graph id, which is also the root vertex id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Vertex {
        // The root is never removed, and `restore` rejects snapshots without one.
        &self.vertices[&self.id]
    }

    pub fn active_vertex(&self) -> &str {
        &self.active_vertex
    }

    pub fn vertex(&self, id: &str) -> Option<&Vertex> {
        self.vertices.get(id)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.len() <= 1 && self.root().messages.is_empty()
    }

    /// Recorded child choice at each branch point.
    pub fn terminal_choices(&self) -> &BTreeMap<String, String> {
        &self.terminal
    }

    pub fn id_generator(&self) -> Arc<dyn IdGenerator> {
        Arc::clone(&self.ids)
    }

    /// Create a vertex under `parent_id` holding `messages`. The active vertex
    /// is left unchanged.
    pub fn branch_from(
        &mut self,
        parent_id: &str,
        messages: Vec<Message>,
    ) -> Result<String, GraphError> {
        if !self.vertices.contains_key(parent_id) {
            return Err(GraphError::ParentNotFound(parent_id.to_string()));
        }
        let vertex_id = self.insert_child(parent_id, messages);
        tracing::debug!(graph_id = %self.id, parent_id, vertex_id = %vertex_id, "branched vertex");
        Ok(vertex_id)
    }

    fn insert_child(&mut self, parent_id: &str, messages: Vec<Message>) -> String {
        // A restored graph may already hold ids the generator hands out.
        let mut vertex_id = self.ids.next_id();
        while self.vertices.contains_key(&vertex_id) {
            vertex_id = self.ids.next_id();
        }
        let vertex = Vertex::new(vertex_id.clone(), messages, Some(parent_id));
        if let Some(parent) = self.vertices.get_mut(parent_id) {
            parent.children.push(vertex_id.clone());
        }
        self.vertices.insert(vertex_id.clone(), vertex);
        vertex_id
    }

    /// Make `vertex_id` the tip of the active path and remember the choice
    /// at every branch point above it.
    pub fn set_active(&mut self, vertex_id: &str) -> Result<(), GraphError> {
        if !self.vertices.contains_key(vertex_id) {
            return Err(GraphError::VertexNotFound(vertex_id.to_string()));
        }
        self.activate(vertex_id);
        tracing::debug!(graph_id = %self.id, vertex_id, "active vertex changed");
        Ok(())
    }

    fn activate(&mut self, vertex_id: &str) {
        let path = self.path_ids(vertex_id);
        for pair in path.windows(2) {
            self.terminal.insert(pair[0].clone(), pair[1].clone());
        }
        self.active_vertex = vertex_id.to_string();
    }

    /// Descend from `vertex_id` to a leaf, following the recorded choice at
    /// each level and falling back to the most recently added child.
    pub fn dive_from(&self, vertex_id: &str) -> Result<String, GraphError> {
        let mut current = self
            .vertices
            .get(vertex_id)
            .ok_or_else(|| GraphError::VertexNotFound(vertex_id.to_string()))?;

        while let Some(last) = current.children.last() {
            let next = self
                .terminal
                .get(&current.id)
                .filter(|chosen| current.children.contains(*chosen))
                .unwrap_or(last);
            match self.vertices.get(next) {
                Some(vertex) => current = vertex,
                None => break,
            }
        }
        Ok(current.id.clone())
    }

    fn path_ids(&self, vertex_id: &str) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = self.vertices.get(vertex_id);
        while let Some(vertex) = current {
            path.push(vertex.id.clone());
            current = vertex.parent().and_then(|parent| self.vertices.get(parent));
        }
        path.reverse();
        path
    }

    /// Vertices from the root down to `vertex_id`, inclusive.
    pub fn path_to(&self, vertex_id: &str) -> Result<Vec<&Vertex>, GraphError> {
        if !self.vertices.contains_key(vertex_id) {
            return Err(GraphError::VertexNotFound(vertex_id.to_string()));
        }
        Ok(self
            .path_ids(vertex_id)
            .iter()
            .filter_map(|id| self.vertices.get(id))
            .collect())
    }

    /// The active path's messages in root-to-tip order.
    pub fn flatten(&self) -> Vec<Message> {
        self.path_ids(&self.active_vertex)
            .iter()
            .filter_map(|id| self.vertices.get(id))
            .flat_map(|vertex| vertex.messages.iter().cloned())
            .collect()
    }

    /// Every vertex below `vertex_id`, depth-first in children order.
    pub fn descendants(&self, vertex_id: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut stack: Vec<&str> = self
            .vertices
            .get(vertex_id)
            .map(|vertex| vertex.children.iter().rev().map(String::as_str).collect())
            .unwrap_or_default();

        while let Some(id) = stack.pop() {
            result.push(id.to_string());
            if let Some(vertex) = self.vertices.get(id) {
                stack.extend(vertex.children.iter().rev().map(String::as_str));
            }
        }
        result
    }

    /// The children list `vertex_id` belongs to; empty for the root.
    pub fn siblings(&self, vertex_id: &str) -> &[String] {
        self.vertices
            .get(vertex_id)
            .and_then(Vertex::parent)
            .and_then(|parent| self.vertices.get(parent))
            .map(|parent| parent.children.as_slice())
            .unwrap_or(&[])
    }

    /// Move `offset` places along the sibling list with wraparound. Returns
    /// the sibling and the leaf to activate beneath it, or `None` when the
    /// vertex has no siblings.
    pub fn target_sibling(&self, vertex_id: &str, offset: isize) -> Option<(String, String)> {
        let siblings = self.siblings(vertex_id);
        if siblings.len() < 2 {
            return None;
        }
        let current = siblings.iter().position(|id| id == vertex_id)?;
        let len = siblings.len() as isize;
        let index = (current as isize + offset).rem_euclid(len) as usize;
        let sibling = siblings[index].clone();
        let leaf = self.dive_from(&sibling).ok()?;
        Some((sibling, leaf))
    }

    /// Vertex holding the message with `message_id`.
    pub fn find_message(&self, message_id: &str) -> Option<&str> {
        self.vertices
            .values()
            .find(|vertex| vertex.messages.iter().any(|m| m.id == message_id))
            .map(|vertex| vertex.id.as_str())
    }

    /// Mutable access to one message, for in-place edits.
    pub fn message_mut(&mut self, vertex_id: &str, message_id: &str) -> Option<&mut Message> {
        self.vertices
            .get_mut(vertex_id)?
            .messages
            .iter_mut()
            .find(|message| message.id == message_id)
    }

    /// Drop a single message from its vertex. The vertex itself stays.
    pub fn remove_message(&mut self, vertex_id: &str, message_id: &str) -> Option<Message> {
        let messages = &mut self.vertices.get_mut(vertex_id)?.messages;
        let index = messages.iter().position(|message| message.id == message_id)?;
        Some(messages.remove(index))
    }

    /// Remove a vertex. A leaf is pruned; an inner vertex is spliced out and
    /// its children take its place in the parent's children list. When the
    /// active vertex is removed its parent becomes active.
    pub fn delete_vertex(&mut self, vertex_id: &str) -> Result<(), GraphError> {
        if vertex_id == self.id {
            return Err(GraphError::CannotDeleteRoot(vertex_id.to_string()));
        }
        let vertex = self
            .vertices
            .remove(vertex_id)
            .ok_or_else(|| GraphError::VertexNotFound(vertex_id.to_string()))?;
        let parent_id = vertex
            .parent()
            .map(str::to_string)
            .unwrap_or_else(|| self.id.clone());

        for child_id in &vertex.children {
            if let Some(child) = self.vertices.get_mut(child_id) {
                child.parents = vec![parent_id.clone()];
            }
        }
        if let Some(parent) = self.vertices.get_mut(&parent_id) {
            let position = parent
                .children
                .iter()
                .position(|id| id == vertex_id)
                .unwrap_or(parent.children.len());
            let end = (position + 1).min(parent.children.len());
            parent
                .children
                .splice(position..end, vertex.children.iter().cloned());
        }

        let inherited = self.terminal.remove(vertex_id);
        if self.terminal.get(&parent_id).is_some_and(|chosen| chosen == vertex_id) {
            match inherited.or_else(|| vertex.children.last().cloned()) {
                Some(child) => {
                    self.terminal.insert(parent_id.clone(), child);
                }
                None => {
                    self.terminal.remove(&parent_id);
                }
            }
        }

        let active = if self.active_vertex == vertex_id {
            parent_id
        } else {
            self.active_vertex.clone()
        };
        self.activate(&active);

        tracing::debug!(
            graph_id = %self.id,
            vertex_id,
            reparented = vertex.children.len(),
            active_vertex = %self.active_vertex,
            "deleted vertex"
        );
        Ok(())
    }
}

impl Default for ConversationGraph {
    fn default() -> Self {
        Self::new(Arc::new(UuidGenerator))
    }
}

impl PartialEq for ConversationGraph {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.active_vertex == other.active_vertex
            && self.terminal == other.terminal
            && self.vertices == other.vertices
    }
}

impl fmt::Debug for ConversationGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationGraph")
            .field("id", &self.id)
            .field("vertices", &self.vertices.len())
            .field("active_vertex", &self.active_vertex)
            .field("terminal", &self.terminal)
            .finish()
    }
}

/// Breadth-first vertex order following children order.
fn breadth_first<'a>(vertices: &'a HashMap<String, Vertex>, root: &str) -> Vec<&'a Vertex> {
    let mut order = Vec::with_capacity(vertices.len());
    let mut queue = VecDeque::from([root]);
    while let Some(id) = queue.pop_front() {
        if let Some(vertex) = vertices.get(id) {
            order.push(vertex);
            queue.extend(vertex.children.iter().map(String::as_str));
        }
    }
    order
}
