use async_trait::async_trait;
use chat_core::{Character, Lorebook, Persona, Preset};

use super::ChatRecord;
use crate::error::StorageError;

/// Persists chats by id.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_chat(&self, id: &str) -> Result<Option<ChatRecord>, StorageError>;

    async fn put_chat(&self, record: &ChatRecord) -> Result<(), StorageError>;

    /// Returns whether a chat was removed.
    async fn delete_chat(&self, id: &str) -> Result<bool, StorageError>;

    /// All chats, most recently updated first.
    async fn list_chats(&self) -> Result<Vec<ChatRecord>, StorageError>;
}

/// Persists lorebooks and answers the three applicability lookups the
/// context builder issues.
#[async_trait]
pub trait LorebookStore: Send + Sync {
    async fn get_lorebook(&self, id: &str) -> Result<Option<Lorebook>, StorageError>;

    async fn put_lorebook(&self, lorebook: &Lorebook) -> Result<(), StorageError>;

    async fn list_lorebooks(&self) -> Result<Vec<Lorebook>, StorageError>;

    /// Lorebooks embedded in the character card.
    async fn embedded_for(&self, character_id: &str) -> Result<Vec<Lorebook>, StorageError> {
        let mut books = self.list_lorebooks().await?;
        books.retain(|book| book.embedded_character_id.as_deref() == Some(character_id));
        Ok(books)
    }

    /// Lorebooks the user linked to the character.
    async fn linked_to(&self, character_id: &str) -> Result<Vec<Lorebook>, StorageError> {
        let mut books = self.list_lorebooks().await?;
        books.retain(|book| book.linked_character_ids.iter().any(|id| id == character_id));
        Ok(books)
    }

    async fn global_lorebooks(&self) -> Result<Vec<Lorebook>, StorageError> {
        let mut books = self.list_lorebooks().await?;
        books.retain(|book| book.global);
        Ok(books)
    }
}

/// Read-mostly library data: characters, personas and presets.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn get_character(&self, id: &str) -> Result<Option<Character>, StorageError>;

    async fn put_character(&self, character: &Character) -> Result<(), StorageError>;

    async fn get_persona(&self, id: &str) -> Result<Option<Persona>, StorageError>;

    async fn put_persona(&self, persona: &Persona) -> Result<(), StorageError>;

    async fn get_preset(&self, id: &str) -> Result<Option<Preset>, StorageError>;

    async fn put_preset(&self, preset: &Preset) -> Result<(), StorageError>;
}
