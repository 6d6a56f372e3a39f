use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chat_core::{EngineConfig, Lorebook, Message, Preset, Role, UuidGenerator};
use clap::{Parser, Subcommand};
use colored::Colorize;
use context_manager::graph::ConversationGraph;
use context_manager::pipeline::ContextBuilder;
use context_manager::session::ChatSession;
use context_manager::storage::{JsonFileStore, LibraryStore};
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "monogatari")]
#[command(about = "Inspect stored character chats")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the context that would be sent for a chat's active branch
    Preview {
        /// Store directory
        #[arg(long, env = "MONOGATARI_STORE")]
        store: PathBuf,
        #[arg(long)]
        chat: String,
        /// Preset id; the built-in default preset when omitted
        #[arg(long)]
        preset: Option<String>,
        #[arg(long)]
        persona: Option<String>,
    },
    /// Print a chat's branch tree with the active path marked
    Tree {
        #[arg(long, env = "MONOGATARI_STORE")]
        store: PathBuf,
        #[arg(long)]
        chat: String,
    },
    /// Check that a lorebook file imports cleanly
    ValidateLorebook {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Preview {
            store,
            chat,
            preset,
            persona,
        } => preview(&store, &chat, preset.as_deref(), persona.as_deref()).await,
        Commands::Tree { store, chat } => tree(&store, &chat).await,
        Commands::ValidateLorebook { file } => validate_lorebook(&file).await,
    }
}

async fn open_session(store: &Arc<JsonFileStore>, chat: &str) -> anyhow::Result<ChatSession> {
    debug!(chat, store = %store.root().display(), "loading chat");
    let session = ChatSession::load(store.clone(), chat, Arc::new(UuidGenerator))
        .await
        .with_context(|| format!("failed to load chat {chat} from {}", store.root().display()))?;
    debug!(chat, vertices = session.graph().len(), "chat loaded");
    Ok(session)
}

async fn preview(
    dir: &Path,
    chat: &str,
    preset_id: Option<&str>,
    persona_id: Option<&str>,
) -> anyhow::Result<()> {
    let store = Arc::new(JsonFileStore::new(dir));
    let mut session = open_session(&store, chat).await?;

    let character = match session.character_ids().first() {
        Some(id) => Some(
            store
                .get_character(id)
                .await?
                .with_context(|| format!("character {id} not found"))?,
        ),
        None => None,
    };
    let persona = match persona_id {
        Some(id) => Some(
            store
                .get_persona(id)
                .await?
                .with_context(|| format!("persona {id} not found"))?,
        ),
        None => None,
    };
    let preset = match preset_id {
        Some(id) => store
            .get_preset(id)
            .await?
            .with_context(|| format!("preset {id} not found"))?,
        None => Preset::default(),
    };

    let config = EngineConfig::load();
    debug!(
        preset = %preset.id,
        character = character.as_ref().map(|c| c.id.as_str()),
        tokenizer = ?config.tokenizer,
        "building preview"
    );
    let builder = ContextBuilder::with_default_stages(store.clone(), config);
    let output = session
        .build_context(&builder, &preset, character.as_ref(), persona.as_ref())
        .await
        .context("context build failed")?;
    info!(
        chat,
        messages = output.messages.len(),
        lore = output.stats.lore_injected,
        "preview built"
    );

    for message in &output.messages {
        print_message(message);
    }
    println!(
        "{}",
        format!(
            "{} messages, {} lore entries from {} lorebooks, {} ms",
            output.messages.len(),
            output.stats.lore_injected,
            output.stats.lorebooks_scanned,
            output.stats.total_duration_ms
        )
        .dimmed()
    );
    Ok(())
}

fn role_label(role: Role) -> colored::ColoredString {
    match role {
        Role::System => role.as_str().yellow(),
        Role::User => role.as_str().cyan(),
        Role::Assistant => role.as_str().green(),
    }
}

fn print_message(message: &Message) {
    println!("{} {}", role_label(message.role).bold(), message.id.dimmed());
    println!("{}", message.joined_text());
    if message.has_media() {
        println!("{}", "[media attached]".dimmed());
    }
    println!();
}

/// First line of the first text part, shortened for the tree view.
fn summary(message: &Message) -> String {
    const WIDTH: usize = 60;
    let line = message.first_text().unwrap_or_default().lines().next().unwrap_or_default();
    if line.chars().count() > WIDTH {
        format!("{}…", line.chars().take(WIDTH).collect::<String>())
    } else {
        line.to_string()
    }
}

fn print_vertex(graph: &ConversationGraph, id: &str, depth: usize, active: &HashSet<&str>) {
    let Some(vertex) = graph.vertex(id) else {
        return;
    };
    let marker = if active.contains(id) { "*".green().bold() } else { " ".normal() };
    let indent = "  ".repeat(depth);
    println!("{marker} {indent}{}", vertex.id.dimmed());
    for message in &vertex.messages {
        println!("  {indent}  {} {}", role_label(message.role), summary(message));
    }
    for child in &vertex.children {
        print_vertex(graph, child, depth + 1, active);
    }
}

async fn tree(dir: &Path, chat: &str) -> anyhow::Result<()> {
    let store = Arc::new(JsonFileStore::new(dir));
    let session = open_session(&store, chat).await?;
    let graph = session.graph();

    let path = graph.path_to(graph.active_vertex())?;
    let active: HashSet<&str> = path.iter().map(|vertex| vertex.id.as_str()).collect();
    print_vertex(graph, graph.id(), 0, &active);
    println!(
        "{}",
        format!("{} vertices, active {}", graph.len(), graph.active_vertex()).dimmed()
    );
    Ok(())
}

async fn validate_lorebook(file: &Path) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;
    debug!(file = %file.display(), bytes = content.len(), "validating lorebook");

    match Lorebook::parse(json) {
        Ok(data) => {
            let name = data.name.as_deref().unwrap_or("(unnamed)");
            println!(
                "{} {} with {} entries",
                "valid".green().bold(),
                name,
                data.entries.len()
            );
            Ok(())
        }
        Err(errors) => {
            for error in &errors.errors {
                println!("{} {}", "error".red().bold(), error);
            }
            bail!("{} has {} problem(s)", file.display(), errors.len())
        }
    }
}
