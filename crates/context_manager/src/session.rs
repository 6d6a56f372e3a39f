//! Chat Session
//!
//! Owns one chat's graph together with the state that goes with it: the
//! message-id to vertex-id index, the pending branch point set by
//! `regenerate`, and the chat's lore match memory. One session owns one
//! graph; callers serialize access to it.

use std::collections::HashMap;
use std::sync::Arc;

use chat_core::{Character, IdGenerator, Message, Persona, Preset, Role};
use chrono::{DateTime, Utc};

use crate::error::{GraphError, SessionError, StorageError};
use crate::graph::ConversationGraph;
use crate::lorebook::LoreMatcher;
use crate::macros::{MacroContext, replace_macros};
use crate::pipeline::{BuildOutput, BuildRequest, ContextBuilder};
use crate::storage::{ChatRecord, ChatStore};

/// Id of the root message holding the character definitions.
pub const CHARACTER_DEFINITIONS_ID: &str = "character_definitions";

/// Position of a message's vertex among its siblings, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiblingPosition {
    pub current: usize,
    pub total: usize,
}

pub struct ChatSession {
    graph: ConversationGraph,
    character_ids: Vec<String>,
    title: String,
    created_at: DateTime<Utc>,
    /// message id -> vertex id
    vertex_map: HashMap<String, String>,
    /// Branch point for the next commit, set by `regenerate`
    working_vertex: Option<String>,
    matcher: LoreMatcher,
    store: Arc<dyn ChatStore>,
}

fn index_messages(graph: &ConversationGraph) -> HashMap<String, String> {
    graph
        .save()
        .vertices
        .into_iter()
        .flat_map(|vertex| {
            let vertex_id = vertex.id;
            vertex
                .messages
                .into_iter()
                .map(move |message| (message.id, vertex_id.clone()))
        })
        .collect()
}

impl ChatSession {
    /// Start a new chat with `character`.
    ///
    /// The root vertex holds the character description as a system message;
    /// the first message and every alternate greeting become sibling
    /// vertices under it, the first one active. The chat is persisted
    /// before it is returned.
    pub async fn start(
        store: Arc<dyn ChatStore>,
        character: &Character,
        persona: Option<&Persona>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, SessionError> {
        let now = Utc::now();
        let mut macros = MacroContext::new(Some(character), persona);

        let definitions = Message::text(
            CHARACTER_DEFINITIONS_ID,
            Role::System,
            replace_macros(&character.data.description, &mut macros),
        )
        .with_created_at(now);
        let greetings = character
            .data
            .greetings()
            .into_iter()
            .enumerate()
            .map(|(index, greeting)| {
                Message::text(
                    format!("greeting-{}", index + 1),
                    Role::Assistant,
                    replace_macros(greeting, &mut macros),
                )
                .with_created_at(now)
            })
            .collect();

        let graph = ConversationGraph::seeded(ids, vec![definitions], greetings);
        let mut session = Self {
            vertex_map: index_messages(&graph),
            graph,
            character_ids: vec![character.id.clone()],
            title: String::new(),
            created_at: now,
            working_vertex: None,
            matcher: LoreMatcher::new(),
            store,
        };
        session.save().await?;

        tracing::info!(chat_id = %session.id(), character_id = %character.id, "chat started");
        Ok(session)
    }

    /// Load a stored chat. The snapshot is validated before use.
    pub async fn load(
        store: Arc<dyn ChatStore>,
        chat_id: &str,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, SessionError> {
        let record = store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| StorageError::not_found("chat", chat_id))?;
        let graph = ConversationGraph::restore(record.graph, ids)?;

        Ok(Self {
            vertex_map: index_messages(&graph),
            graph,
            character_ids: record.character_ids,
            title: record.title,
            created_at: record.created_at,
            working_vertex: None,
            matcher: LoreMatcher::new(),
            store,
        })
    }

    /// Persist the current graph and metadata.
    pub async fn save(&mut self) -> Result<(), SessionError> {
        let now = Utc::now().max(self.created_at);
        let mut record = ChatRecord::new(
            self.graph.id(),
            self.character_ids.clone(),
            self.graph.save(),
            self.created_at,
        );
        record.title = self.title.clone();
        record.updated_at = now;
        self.store.put_chat(&record).await?;
        Ok(())
    }

    /// Chat id, which is the graph's root vertex id.
    pub fn id(&self) -> &str {
        self.graph.id()
    }

    pub fn graph(&self) -> &ConversationGraph {
        &self.graph
    }

    pub fn character_ids(&self) -> &[String] {
        &self.character_ids
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn matcher(&self) -> &LoreMatcher {
        &self.matcher
    }

    /// The active path as a flat transcript.
    pub fn transcript(&self) -> Vec<Message> {
        self.graph.flatten()
    }

    /// Vertex holding `message_id`.
    pub fn vertex_of(&self, message_id: &str) -> Option<&str> {
        self.vertex_map.get(message_id).map(String::as_str)
    }

    fn vertex_for(&self, message_id: &str) -> Result<String, SessionError> {
        self.vertex_map
            .get(message_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownMessage(message_id.to_string()))
    }

    /// Append the uncommitted tail of `messages`.
    ///
    /// Messages up to the last one already in the graph are skipped; each
    /// remaining message gets its own vertex, chained from the branch point
    /// left by `regenerate` or else from the active vertex. Messages with no
    /// parts are ignored. Returns the new vertex ids.
    pub async fn commit(&mut self, messages: &[Message]) -> Result<Vec<String>, SessionError> {
        let pending: Vec<&Message> = messages.iter().filter(|m| !m.parts.is_empty()).collect();
        let start = pending
            .iter()
            .rposition(|message| self.vertex_map.contains_key(&message.id))
            .map_or(0, |index| index + 1);
        let unsaved = &pending[start..];

        if unsaved.is_empty() && self.working_vertex.is_none() {
            return Ok(Vec::new());
        }

        let mut current = self
            .working_vertex
            .take()
            .unwrap_or_else(|| self.graph.active_vertex().to_string());
        let mut created = Vec::with_capacity(unsaved.len());
        for message in unsaved {
            current = self.graph.branch_from(&current, vec![(*message).clone()])?;
            self.vertex_map.insert(message.id.clone(), current.clone());
            created.push(current.clone());
        }
        self.graph.set_active(&current)?;

        tracing::debug!(chat_id = %self.id(), committed = created.len(), "messages committed");
        self.save().await?;
        Ok(created)
    }

    /// Prepare to regenerate `message_id`: its parent vertex becomes both
    /// active and the branch point for the next commit, so the replacement
    /// lands as a new sibling. Returns the transcript to resend.
    pub fn regenerate(&mut self, message_id: &str) -> Result<Vec<Message>, SessionError> {
        let vertex_id = self.vertex_for(message_id)?;
        let parent = self
            .graph
            .vertex(&vertex_id)
            .and_then(|vertex| vertex.parent())
            .map(str::to_string)
            .ok_or(GraphError::ParentNotFound(vertex_id))?;

        self.graph.set_active(&parent)?;
        self.working_vertex = Some(parent);
        Ok(self.graph.flatten())
    }

    /// Show the next alternative for `message_id`, wrapping around.
    /// Returns the new transcript, or `None` when there is no alternative.
    pub fn go_to_next_sibling(&mut self, message_id: &str) -> Result<Option<Vec<Message>>, SessionError> {
        self.select_branch(message_id, 1)
    }

    /// Show the previous alternative for `message_id`, wrapping around.
    pub fn go_to_previous_sibling(
        &mut self,
        message_id: &str,
    ) -> Result<Option<Vec<Message>>, SessionError> {
        self.select_branch(message_id, -1)
    }

    fn select_branch(
        &mut self,
        message_id: &str,
        offset: isize,
    ) -> Result<Option<Vec<Message>>, SessionError> {
        let vertex_id = self.vertex_for(message_id)?;
        let Some((sibling, leaf)) = self.graph.target_sibling(&vertex_id, offset) else {
            return Ok(None);
        };
        self.graph.set_active(&leaf)?;
        tracing::debug!(chat_id = %self.id(), sibling = %sibling, leaf = %leaf, "switched branch");
        Ok(Some(self.graph.flatten()))
    }

    /// Where the vertex of `message_id` sits among its siblings; `1 of 1`
    /// for unknown messages and the root.
    pub fn sibling_position(&self, message_id: &str) -> SiblingPosition {
        let fallback = SiblingPosition { current: 1, total: 1 };
        let Some(vertex_id) = self.vertex_map.get(message_id) else {
            return fallback;
        };
        let siblings = self.graph.siblings(vertex_id);
        match siblings.iter().position(|id| id == vertex_id) {
            Some(index) => SiblingPosition {
                current: index + 1,
                total: siblings.len(),
            },
            None => fallback,
        }
    }

    /// Replace a stored message, matched by id.
    pub async fn update_message(&mut self, mut message: Message) -> Result<(), SessionError> {
        let vertex_id = self.vertex_for(&message.id)?;
        let slot = self
            .graph
            .message_mut(&vertex_id, &message.id)
            .ok_or_else(|| SessionError::UnknownMessage(message.id.clone()))?;
        message.metadata.updated_at = Some(Utc::now());
        *slot = message;
        self.save().await
    }

    /// Remove a message. A vertex left without messages is deleted, its
    /// children moving up to its parent.
    pub async fn delete_message(&mut self, message_id: &str) -> Result<(), SessionError> {
        let vertex_id = self.vertex_for(message_id)?;
        let only_message = self
            .graph
            .vertex(&vertex_id)
            .is_some_and(|vertex| vertex.messages.len() == 1);

        if only_message && vertex_id != self.graph.id() {
            self.graph.delete_vertex(&vertex_id)?;
        } else {
            self.graph.remove_message(&vertex_id, message_id);
        }
        self.vertex_map.remove(message_id);
        self.save().await
    }

    /// Delete a vertex, re-parenting its children.
    pub async fn delete_vertex(&mut self, vertex_id: &str) -> Result<(), SessionError> {
        self.graph.delete_vertex(vertex_id)?;
        self.vertex_map.retain(|_, owner| owner != vertex_id);
        if self.working_vertex.as_deref() == Some(vertex_id) {
            self.working_vertex = None;
        }
        self.save().await
    }

    pub async fn set_character_ids(&mut self, ids: Vec<String>) -> Result<(), SessionError> {
        self.character_ids = ids;
        self.save().await
    }

    pub async fn set_title(&mut self, title: impl Into<String>) -> Result<(), SessionError> {
        self.title = title.into();
        self.save().await
    }

    /// Index of the greeting the active path starts from.
    pub fn greeting_index(&self) -> Option<usize> {
        let path = self.graph.path_to(self.graph.active_vertex()).ok()?;
        let first = path.get(1)?;
        self.graph.root().children.iter().position(|id| *id == first.id)
    }

    /// Build the model context for the active path.
    pub async fn build_context(
        &mut self,
        builder: &ContextBuilder,
        preset: &Preset,
        character: Option<&Character>,
        persona: Option<&Persona>,
    ) -> Result<BuildOutput, SessionError> {
        let mut request = BuildRequest::new(self.graph.id(), self.graph.flatten(), preset)
            .with_greeting_index(self.greeting_index());
        request.character = character;
        request.persona = persona;

        Ok(builder.build(request, &mut self.matcher).await?)
    }
}
