use std::collections::HashMap;

use async_trait::async_trait;
use chat_core::{Character, Lorebook, Persona, Preset};
use tokio::sync::RwLock;

use super::{ChatRecord, ChatStore, LibraryStore, LorebookStore, check};
use crate::error::StorageError;

/// Everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    chats: RwLock<HashMap<String, ChatRecord>>,
    lorebooks: RwLock<HashMap<String, Lorebook>>,
    characters: RwLock<HashMap<String, Character>>,
    personas: RwLock<HashMap<String, Persona>>,
    presets: RwLock<HashMap<String, Preset>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn get_chat(&self, id: &str) -> Result<Option<ChatRecord>, StorageError> {
        Ok(self.chats.read().await.get(id).cloned())
    }

    async fn put_chat(&self, record: &ChatRecord) -> Result<(), StorageError> {
        check("chat", &record.id, record)?;
        self.chats
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_chat(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.chats.write().await.remove(id).is_some())
    }

    async fn list_chats(&self) -> Result<Vec<ChatRecord>, StorageError> {
        let mut chats: Vec<ChatRecord> = self.chats.read().await.values().cloned().collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(chats)
    }
}

#[async_trait]
impl LorebookStore for MemoryStore {
    async fn get_lorebook(&self, id: &str) -> Result<Option<Lorebook>, StorageError> {
        Ok(self.lorebooks.read().await.get(id).cloned())
    }

    async fn put_lorebook(&self, lorebook: &Lorebook) -> Result<(), StorageError> {
        check("lorebook", &lorebook.id, lorebook)?;
        self.lorebooks
            .write()
            .await
            .insert(lorebook.id.clone(), lorebook.clone());
        Ok(())
    }

    async fn list_lorebooks(&self) -> Result<Vec<Lorebook>, StorageError> {
        let mut books: Vec<Lorebook> = self.lorebooks.read().await.values().cloned().collect();
        books.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(books)
    }
}

#[async_trait]
impl LibraryStore for MemoryStore {
    async fn get_character(&self, id: &str) -> Result<Option<Character>, StorageError> {
        Ok(self.characters.read().await.get(id).cloned())
    }

    async fn put_character(&self, character: &Character) -> Result<(), StorageError> {
        check("character", &character.id, character)?;
        self.characters
            .write()
            .await
            .insert(character.id.clone(), character.clone());
        Ok(())
    }

    async fn get_persona(&self, id: &str) -> Result<Option<Persona>, StorageError> {
        Ok(self.personas.read().await.get(id).cloned())
    }

    async fn put_persona(&self, persona: &Persona) -> Result<(), StorageError> {
        check("persona", &persona.id, persona)?;
        self.personas
            .write()
            .await
            .insert(persona.id.clone(), persona.clone());
        Ok(())
    }

    async fn get_preset(&self, id: &str) -> Result<Option<Preset>, StorageError> {
        Ok(self.presets.read().await.get(id).cloned())
    }

    async fn put_preset(&self, preset: &Preset) -> Result<(), StorageError> {
        check("preset", &preset.id, preset)?;
        self.presets
            .write()
            .await
            .insert(preset.id.clone(), preset.clone());
        Ok(())
    }
}
