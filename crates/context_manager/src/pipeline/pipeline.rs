//! Context Builder Implementation
//!
//! This module implements the builder that gathers lorebooks, acquires a
//! tokenizer and runs the registered stages over a transcript.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chat_core::{Character, EngineConfig, Lorebook, Message, Persona, Preset};
use chrono::{DateTime, Utc};

use super::context::{ProcessingContext, ProcessingStats};
use super::error::BuildError;
use super::result::{BuildOutput, ProcessResult};
use super::stages::{LorebookStage, MacroStage, PresetStage, SquashStage};
use super::traits::ContextStage;
use crate::error::StorageError;
use crate::lorebook::LoreMatcher;
use crate::macros::MacroContext;
use crate::storage::LorebookStore;
use crate::tokenizer;

/// Clock used to stamp synthesized messages.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Inputs of one context build.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub chat_id: &'a str,
    /// The flattened active path
    pub messages: Vec<Message>,
    pub preset: &'a Preset,
    pub character: Option<&'a Character>,
    pub persona: Option<&'a Persona>,
    pub greeting_index: Option<usize>,
    pub user_icon: Option<String>,
}

impl<'a> BuildRequest<'a> {
    pub fn new(chat_id: &'a str, messages: Vec<Message>, preset: &'a Preset) -> Self {
        Self {
            chat_id,
            messages,
            preset,
            character: None,
            persona: None,
            greeting_index: None,
            user_icon: None,
        }
    }

    pub fn with_character(mut self, character: &'a Character) -> Self {
        self.character = Some(character);
        self
    }

    pub fn with_persona(mut self, persona: &'a Persona) -> Self {
        self.persona = Some(persona);
        self
    }

    pub fn with_greeting_index(mut self, index: Option<usize>) -> Self {
        self.greeting_index = index;
        self
    }

    pub fn with_user_icon(mut self, icon: impl Into<String>) -> Self {
        self.user_icon = Some(icon.into());
        self
    }
}

/// Context Builder
///
/// Orchestrates context assembly through a series of stages. Nothing is
/// cached between builds: every call assembles the context from scratch.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use chat_core::{EngineConfig, Preset};
/// use context_manager::pipeline::{BuildRequest, ContextBuilder};
/// use context_manager::lorebook::LoreMatcher;
/// use context_manager::storage::MemoryStore;
///
/// async fn preview() {
///     let builder = ContextBuilder::with_default_stages(
///         Arc::new(MemoryStore::new()),
///         EngineConfig::default(),
///     );
///     let preset = Preset::default();
///     let mut matcher = LoreMatcher::new();
///     let request = BuildRequest::new("chat-1", Vec::new(), &preset);
///     // let output = builder.build(request, &mut matcher).await?;
/// }
/// ```
pub struct ContextBuilder {
    /// Registered stages (executed in order)
    stages: Vec<Box<dyn ContextStage>>,

    lorebooks: Arc<dyn LorebookStore>,

    config: EngineConfig,

    clock: Clock,
}

impl ContextBuilder {
    /// Create a builder with no stages
    pub fn new(lorebooks: Arc<dyn LorebookStore>, config: EngineConfig) -> Self {
        Self {
            stages: Vec::new(),
            lorebooks,
            config,
            clock: Arc::new(Utc::now),
        }
    }

    /// Preset layering, lore injection, macro resolution, system squash
    pub fn with_default_stages(lorebooks: Arc<dyn LorebookStore>, config: EngineConfig) -> Self {
        Self::new(lorebooks, config)
            .register(Box::new(PresetStage))
            .register(Box::new(LorebookStage))
            .register(Box::new(MacroStage))
            .register(Box::new(SquashStage))
    }

    /// Register a stage (chainable)
    ///
    /// Stages are executed in the order they are registered.
    pub fn register(mut self, stage: Box<dyn ContextStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Replace the clock used to stamp synthesized messages
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Enabled lorebooks applicable to `character`: embedded in it, linked to
    /// it, and global. The three lookups run concurrently; a lorebook
    /// reachable through more than one of them is kept once.
    pub async fn applicable_lorebooks(
        &self,
        character: Option<&Character>,
    ) -> Result<Vec<Lorebook>, StorageError> {
        let character_id = character.map(|character| character.id.as_str());
        let store = self.lorebooks.as_ref();

        let (embedded, linked, global) = tokio::try_join!(
            async {
                match character_id {
                    Some(id) => store.embedded_for(id).await,
                    None => Ok(Vec::new()),
                }
            },
            async {
                match character_id {
                    Some(id) => store.linked_to(id).await,
                    None => Ok(Vec::new()),
                }
            },
            store.global_lorebooks(),
        )?;

        let mut seen = HashSet::new();
        Ok(embedded
            .into_iter()
            .chain(linked)
            .chain(global)
            .filter(|book| book.enabled && seen.insert(book.id.clone()))
            .collect())
    }

    /// Build the context for one request
    ///
    /// # Arguments
    ///
    /// * `request` - Transcript and library data for the build
    /// * `matcher` - The chat's lore match memory
    ///
    /// # Returns
    ///
    /// - `Ok(BuildOutput)` - The assembled messages and build statistics
    /// - `Err(BuildError)` - Lorebook lookup, tokenizer or stage failure
    pub async fn build(
        &self,
        request: BuildRequest<'_>,
        matcher: &mut LoreMatcher,
    ) -> Result<BuildOutput, BuildError> {
        if self.stages.is_empty() {
            return Err(BuildError::NoStages);
        }

        let build_start = Instant::now();
        let lorebooks = self.applicable_lorebooks(request.character).await?;
        let token_counter = tokenizer::acquire(self.config.tokenizer)?;
        let input_len = request.messages.len();

        let mut ctx = ProcessingContext {
            chat_id: request.chat_id,
            messages: request.messages,
            preset: request.preset,
            character: request.character,
            persona: request.persona,
            lorebooks,
            token_counter,
            matcher,
            macros: MacroContext::new(request.character, request.persona),
            config: &self.config,
            now: (self.clock)(),
            greeting_index: request.greeting_index,
            user_icon: request.user_icon,
            stats: ProcessingStats::default(),
        };

        for stage in &self.stages {
            if !stage.should_run(&ctx) {
                tracing::debug!(stage = stage.name(), "skipping stage");
                continue;
            }

            let start = Instant::now();
            tracing::debug!(stage = stage.name(), messages = ctx.messages.len(), "running stage");

            let result = stage
                .process(&mut ctx)
                .map_err(|error| BuildError::StageFailed {
                    stage: stage.name().to_string(),
                    error,
                })?;

            ctx.stats
                .record_stage(stage.name().to_string(), start.elapsed().as_millis() as u64);

            if let ProcessResult::Transform(messages) = result {
                ctx.messages = messages;
            }
        }

        let ProcessingContext {
            messages,
            mut stats,
            ..
        } = ctx;
        stats.total_duration_ms = build_start.elapsed().as_millis() as u64;

        tracing::info!(
            chat_id = %request.chat_id,
            input_messages = input_len,
            output_messages = messages.len(),
            lorebooks = stats.lorebooks_scanned,
            lore_injected = stats.lore_injected,
            duration_ms = stats.total_duration_ms,
            "context built"
        );

        Ok(BuildOutput { messages, stats })
    }
}
