use std::sync::Arc;

use chat_core::{
    Character, Lorebook, LorebookData, LorebookEntry, Message, Persona, Preset, Prompt, Role,
    SequentialIdGenerator,
};
use chrono::{Duration, Utc};
use context_manager::error::{SessionError, StorageError};
use context_manager::graph::ConversationGraph;
use context_manager::session::ChatSession;
use context_manager::storage::{ChatRecord, ChatStore, JsonFileStore, LibraryStore, LorebookStore};
use tempfile::TempDir;

async fn store() -> (TempDir, JsonFileStore) {
    let dir = TempDir::new().unwrap();
    let store = JsonFileStore::new(dir.path());
    store.init().await.unwrap();
    (dir, store)
}

fn record(id_prefix: &str, age_minutes: i64) -> ChatRecord {
    let graph = ConversationGraph::seeded(
        Arc::new(SequentialIdGenerator::new(id_prefix)),
        vec![Message::text("defs", Role::System, "Definitions")],
        vec![Message::text("g1", Role::Assistant, "Hello")],
    );
    let now = Utc::now() - Duration::minutes(age_minutes);
    ChatRecord::new(graph.id(), vec!["aria".into()], graph.save(), now)
}

#[tokio::test]
async fn init_creates_the_layout() {
    let (dir, _store) = store().await;
    for kind in ["chats", "lorebooks", "characters", "personas", "presets"] {
        assert!(dir.path().join(kind).is_dir(), "{kind} missing");
    }
}

#[tokio::test]
async fn chats_round_trip_through_files() {
    let (dir, store) = store().await;
    let chat = record("a", 0);

    store.put_chat(&chat).await.unwrap();
    assert!(dir.path().join("chats").join("a-1.json").is_file());

    let loaded = store.get_chat("a-1").await.unwrap().unwrap();
    assert_eq!(loaded, chat);
    assert!(store.get_chat("missing").await.unwrap().is_none());

    assert!(store.delete_chat("a-1").await.unwrap());
    assert!(!store.delete_chat("a-1").await.unwrap());
}

#[tokio::test]
async fn chats_are_listed_most_recent_first() {
    let (dir, store) = store().await;
    store.put_chat(&record("old", 30)).await.unwrap();
    store.put_chat(&record("new", 1)).await.unwrap();
    std::fs::write(dir.path().join("chats").join("broken.json"), "{ not json").unwrap();

    let chats = store.list_chats().await.unwrap();
    let ids: Vec<&str> = chats.iter().map(|chat| chat.id.as_str()).collect();
    assert_eq!(ids, vec!["new-1", "old-1"]);
}

#[tokio::test]
async fn ids_must_be_plain_file_names() {
    let (_dir, store) = store().await;
    for id in ["", "..", "../escape", "a\\b"] {
        let result = store.get_chat(id).await;
        assert!(matches!(result, Err(StorageError::Invalid { .. })), "{id:?}");
    }
}

#[tokio::test]
async fn invalid_records_are_not_written() {
    let (dir, store) = store().await;
    let mut chat = record("bad", 0);
    chat.updated_at = chat.created_at - Duration::hours(1);

    let result = store.put_chat(&chat).await;
    assert!(matches!(result, Err(StorageError::Invalid { kind: "chat", .. })));
    assert!(!dir.path().join("chats").join("bad-1.json").exists());
}

#[tokio::test]
async fn lorebook_lookups_read_from_disk() {
    let (_dir, store) = store().await;
    let data = LorebookData {
        entries: vec![LorebookEntry::new("e1", &["moon"], "The moon is full.")],
        ..LorebookData::default()
    };
    store
        .put_lorebook(&Lorebook::new("embedded", data.clone()).embedded_in("aria"))
        .await
        .unwrap();
    store
        .put_lorebook(&Lorebook::new("shared", data).linked_to("aria").linked_to("bram"))
        .await
        .unwrap();

    let embedded = store.embedded_for("aria").await.unwrap();
    assert_eq!(embedded.len(), 1);
    assert_eq!(embedded[0].id, "embedded");

    let linked = store.linked_to("bram").await.unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id, "shared");

    assert!(store.global_lorebooks().await.unwrap().is_empty());
}

#[tokio::test]
async fn library_records_round_trip() {
    let (_dir, store) = store().await;
    let character = Character::new("aria", "Aria");
    let persona = Persona::new("sam", "Sam").with_description("A traveler.");
    let preset = Preset::default();

    store.put_character(&character).await.unwrap();
    store.put_persona(&persona).await.unwrap();
    store.put_preset(&preset).await.unwrap();

    assert_eq!(store.get_character("aria").await.unwrap(), Some(character));
    assert_eq!(store.get_persona("sam").await.unwrap(), Some(persona));
    assert_eq!(store.get_preset("default").await.unwrap(), Some(preset));
}

#[tokio::test]
async fn corrupt_snapshot_is_rejected_on_load() {
    let (dir, store) = store().await;
    let mut chat = record("c", 0);
    chat.graph.active_vertex = "nowhere".into();
    let json = serde_json::to_string(&chat).unwrap();
    std::fs::write(dir.path().join("chats").join("c-1.json"), json).unwrap();

    let result = ChatSession::load(
        Arc::new(store),
        "c-1",
        Arc::new(SequentialIdGenerator::new("c")),
    )
    .await;
    assert!(matches!(
        result,
        Err(SessionError::Storage(StorageError::Invalid { kind: "chat", .. }))
    ));

    let listed = JsonFileStore::new(dir.path()).list_chats().await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn hand_edited_records_are_validated_on_read() {
    let (dir, store) = store().await;
    let valid = LorebookData {
        entries: vec![LorebookEntry::new("e1", &["moon"], "The moon is full.")],
        ..LorebookData::default()
    };
    store.put_lorebook(&Lorebook::new("good", valid).global()).await.unwrap();

    // A non-constant entry without keys never passes validation.
    let keyless = LorebookData {
        entries: vec![LorebookEntry::new("e2", &[], "Unreachable.")],
        ..LorebookData::default()
    };
    let json = serde_json::to_string(&Lorebook::new("edited", keyless).global()).unwrap();
    std::fs::write(dir.path().join("lorebooks").join("edited.json"), json).unwrap();

    let result = store.get_lorebook("edited").await;
    assert!(matches!(result, Err(StorageError::Invalid { kind: "lorebook", .. })));

    let listed = store.list_lorebooks().await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|book| book.id.as_str()).collect();
    assert_eq!(ids, vec!["good"]);
    assert_eq!(store.global_lorebooks().await.unwrap().len(), 1);

    let duplicated = Preset::new(
        "dup",
        "Dup",
        vec![Prompt::new("a", "A", "a"), Prompt::new("a", "B", "b")],
    );
    let json = serde_json::to_string(&duplicated).unwrap();
    std::fs::write(dir.path().join("presets").join("dup.json"), json).unwrap();
    let result = store.get_preset("dup").await;
    assert!(matches!(result, Err(StorageError::Invalid { kind: "preset", .. })));
}
