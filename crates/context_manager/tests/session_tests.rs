use std::sync::Arc;

use chat_core::{
    Character, EngineConfig, Lorebook, LorebookData, LorebookEntry, Message, Persona, Preset, Prompt,
    Role, SequentialIdGenerator, TokenizerKind,
};
use context_manager::error::{GraphError, SessionError};
use context_manager::pipeline::ContextBuilder;
use context_manager::session::{ChatSession, SiblingPosition};
use context_manager::storage::{ChatStore, LorebookStore, MemoryStore};

fn aria() -> Character {
    let mut character = Character::new("aria", "Aria");
    character.data.description = "{{char}} is a bard who met {{user}}.".into();
    character.data.first_mes = "Hello, {{user}}!".into();
    character.data.alternate_greetings = vec!["Welcome back, {{user}}.".into()];
    character
}

fn sam() -> Persona {
    Persona::new("sam", "Sam")
}

fn ids(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.id.as_str()).collect()
}

fn texts(messages: &[Message]) -> Vec<&str> {
    messages
        .iter()
        .map(|m| m.first_text().unwrap_or_default())
        .collect()
}

async fn started(store: Arc<MemoryStore>) -> ChatSession {
    ChatSession::start(
        store,
        &aria(),
        Some(&sam()),
        Arc::new(SequentialIdGenerator::new("v")),
    )
    .await
    .unwrap()
}

/// Started chat with `u1`/`a1` committed under the first greeting and `a2`
/// regenerated as an alternative to `a1`.
async fn with_alternatives(store: Arc<MemoryStore>) -> ChatSession {
    let mut session = started(store).await;
    let mut transcript = session.transcript();
    transcript.push(Message::text("u1", Role::User, "Sing me a song."));
    transcript.push(Message::text("a1", Role::Assistant, "La la la."));
    session.commit(&transcript).await.unwrap();

    let mut transcript = session.regenerate("a1").unwrap();
    transcript.push(Message::text("a2", Role::Assistant, "Do re mi."));
    session.commit(&transcript).await.unwrap();
    session
}

#[tokio::test]
async fn start_seeds_definitions_and_greetings() {
    let store = Arc::new(MemoryStore::new());
    let session = started(store.clone()).await;

    let transcript = session.transcript();
    assert_eq!(ids(&transcript), vec!["character_definitions", "greeting-1"]);
    assert_eq!(texts(&transcript), vec!["Aria is a bard who met Sam.", "Hello, Sam!"]);
    assert_eq!(transcript[0].role, Role::System);
    assert!(transcript.iter().all(|m| m.created_at().is_some()));

    assert_eq!(session.id(), "v-1");
    assert_eq!(session.graph().root().children.len(), 2);
    assert_eq!(session.character_ids(), ["aria".to_string()]);
    assert_eq!(
        session.sibling_position("greeting-1"),
        SiblingPosition { current: 1, total: 2 }
    );
    assert_eq!(session.greeting_index(), Some(0));

    let record = store.get_chat("v-1").await.unwrap().unwrap();
    assert_eq!(record.graph.active_vertex, "v-2");
}

#[tokio::test]
async fn switching_greetings_changes_the_transcript() {
    let store = Arc::new(MemoryStore::new());
    let mut session = started(store).await;

    let transcript = session.go_to_next_sibling("greeting-1").unwrap().unwrap();
    assert_eq!(ids(&transcript), vec!["character_definitions", "greeting-2"]);
    assert_eq!(texts(&transcript)[1], "Welcome back, Sam.");
    assert_eq!(session.greeting_index(), Some(1));

    // Wraps around.
    let transcript = session.go_to_next_sibling("greeting-2").unwrap().unwrap();
    assert_eq!(ids(&transcript)[1], "greeting-1");
}

#[tokio::test]
async fn commit_appends_only_the_unsaved_tail() {
    let store = Arc::new(MemoryStore::new());
    let mut session = started(store).await;

    let mut transcript = session.transcript();
    transcript.push(Message::text("u1", Role::User, "Hi"));
    transcript.push(Message::new("blank", Role::User, Vec::new()));
    transcript.push(Message::text("a1", Role::Assistant, "Hello again"));

    let created = session.commit(&transcript).await.unwrap();
    assert_eq!(created, vec!["v-4", "v-5"]);
    assert_eq!(session.graph().active_vertex(), "v-5");
    assert_eq!(
        ids(&session.transcript()),
        vec!["character_definitions", "greeting-1", "u1", "a1"]
    );
    assert!(session.vertex_of("blank").is_none());

    assert!(session.commit(&transcript).await.unwrap().is_empty());
}

#[tokio::test]
async fn regenerate_adds_a_sibling_reply() {
    let store = Arc::new(MemoryStore::new());
    let mut session = with_alternatives(store).await;

    assert_eq!(
        ids(&session.transcript()),
        vec!["character_definitions", "greeting-1", "u1", "a2"]
    );
    assert_eq!(
        session.sibling_position("a2"),
        SiblingPosition { current: 2, total: 2 }
    );
    assert_eq!(
        session.sibling_position("a1"),
        SiblingPosition { current: 1, total: 2 }
    );

    let transcript = session.go_to_previous_sibling("a2").unwrap().unwrap();
    assert_eq!(ids(&transcript).last(), Some(&"a1"));
    assert!(session.go_to_next_sibling("u1").unwrap().is_none());
}

#[tokio::test]
async fn branch_choice_survives_switching_greetings() {
    let store = Arc::new(MemoryStore::new());
    let mut session = with_alternatives(store).await;
    session.go_to_previous_sibling("a2").unwrap();

    session.go_to_next_sibling("greeting-1").unwrap();
    let transcript = session.go_to_previous_sibling("greeting-2").unwrap().unwrap();

    assert_eq!(
        ids(&transcript),
        vec!["character_definitions", "greeting-1", "u1", "a1"]
    );
}

#[tokio::test]
async fn regenerating_the_root_message_fails() {
    let store = Arc::new(MemoryStore::new());
    let mut session = started(store).await;

    let result = session.regenerate("character_definitions");
    assert!(matches!(
        result,
        Err(SessionError::Graph(GraphError::ParentNotFound(_)))
    ));
    assert!(matches!(
        session.regenerate("missing"),
        Err(SessionError::UnknownMessage(id)) if id == "missing"
    ));
}

#[tokio::test]
async fn load_restores_the_saved_chat() {
    let store = Arc::new(MemoryStore::new());
    let mut session = with_alternatives(store.clone()).await;
    session.set_title("Songs").await.unwrap();

    let mut loaded = ChatSession::load(
        store.clone(),
        session.id(),
        Arc::new(SequentialIdGenerator::new("v")),
    )
    .await
    .unwrap();

    assert_eq!(loaded.transcript(), session.transcript());
    assert_eq!(loaded.graph(), session.graph());
    assert_eq!(loaded.title(), "Songs");

    // New vertices never reuse ids of restored ones.
    let mut transcript = loaded.transcript();
    transcript.push(Message::text("u2", Role::User, "Another!"));
    let created = loaded.commit(&transcript).await.unwrap();
    assert_eq!(created, vec!["v-7"]);
}

#[tokio::test]
async fn loading_a_missing_chat_fails() {
    let store = Arc::new(MemoryStore::new());
    let result = ChatSession::load(store, "nope", Arc::new(SequentialIdGenerator::new("v"))).await;
    assert!(matches!(result, Err(SessionError::Storage(_))));
}

#[tokio::test]
async fn update_message_replaces_it_in_place() {
    let store = Arc::new(MemoryStore::new());
    let mut session = with_alternatives(store.clone()).await;

    session
        .update_message(Message::text("u1", Role::User, "Sing a ballad."))
        .await
        .unwrap();

    let transcript = session.transcript();
    assert_eq!(texts(&transcript)[2], "Sing a ballad.");
    assert!(transcript[2].metadata.updated_at.is_some());

    let stored = store.get_chat(session.id()).await.unwrap().unwrap();
    let edited = stored
        .graph
        .vertices
        .iter()
        .flat_map(|vertex| &vertex.messages)
        .find(|message| message.id == "u1")
        .unwrap();
    assert_eq!(edited.first_text(), Some("Sing a ballad."));

    let result = session
        .update_message(Message::text("ghost", Role::User, "boo"))
        .await;
    assert!(matches!(result, Err(SessionError::UnknownMessage(_))));
}

#[tokio::test]
async fn deleting_a_message_keeps_its_replies() {
    let store = Arc::new(MemoryStore::new());
    let mut session = with_alternatives(store).await;

    session.delete_message("u1").await.unwrap();

    assert!(session.vertex_of("u1").is_none());
    assert_eq!(
        ids(&session.transcript()),
        vec!["character_definitions", "greeting-1", "a2"]
    );
    assert_eq!(
        session.sibling_position("a2"),
        SiblingPosition { current: 2, total: 2 }
    );
}

#[tokio::test]
async fn character_ids_are_persisted() {
    let store = Arc::new(MemoryStore::new());
    let mut session = started(store.clone()).await;

    session
        .set_character_ids(vec!["aria".into(), "bram".into()])
        .await
        .unwrap();

    let record = store.get_chat(session.id()).await.unwrap().unwrap();
    assert_eq!(record.character_ids, vec!["aria", "bram"]);
}

#[tokio::test]
async fn build_context_follows_the_active_greeting() {
    let store = Arc::new(MemoryStore::new());
    let entry = LorebookEntry {
        constant: true,
        ..LorebookEntry::new("returning", &[], "@@is_greeting 1\nSam has visited before.")
    };
    let data = LorebookData {
        entries: vec![entry],
        ..LorebookData::default()
    };
    store
        .put_lorebook(&Lorebook::new("book", data).embedded_in("aria"))
        .await
        .unwrap();

    let config = EngineConfig {
        tokenizer: TokenizerKind::Heuristic,
        ..EngineConfig::default()
    };
    let builder = ContextBuilder::with_default_stages(store.clone(), config);
    let preset = Preset::new(
        "p",
        "P",
        vec![Prompt::new("lore", "Lorebook", "{{lorebook.before}}")],
    );
    let character = aria();
    let persona = sam();
    let mut session = started(store).await;

    let output = session
        .build_context(&builder, &preset, Some(&character), Some(&persona))
        .await
        .unwrap();
    assert_eq!(ids(&output.messages), vec!["character_definitions", "greeting-1"]);
    assert!(!session.matcher().was_matched("returning"));

    session.go_to_next_sibling("greeting-1").unwrap();
    let output = session
        .build_context(&builder, &preset, Some(&character), Some(&persona))
        .await
        .unwrap();
    assert_eq!(ids(&output.messages), vec!["lorebook-returning", "greeting-2"]);
    assert_eq!(
        texts(&output.messages)[0],
        "Sam has visited before.\n\nAria is a bard who met Sam."
    );
    assert!(session.matcher().was_matched("returning"));
}
