use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chat_core::{Character, Lorebook, Persona, Preset, Validate, ValidationErrors};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

use super::{ChatRecord, ChatStore, LibraryStore, LorebookStore, check};
use crate::error::StorageError;

const CHATS: &str = "chats";
const LOREBOOKS: &str = "lorebooks";
const CHARACTERS: &str = "characters";
const PERSONAS: &str = "personas";
const PRESETS: &str = "presets";

/// One pretty-printed JSON file per record, grouped by kind:
///
/// ```text
/// <root>/chats/<id>.json
/// <root>/lorebooks/<id>.json
/// <root>/characters/<id>.json
/// <root>/personas/<id>.json
/// <root>/presets/<id>.json
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory layout.
    pub async fn init(&self) -> Result<(), StorageError> {
        for dir in [CHATS, LOREBOOKS, CHARACTERS, PERSONAS, PRESETS] {
            fs::create_dir_all(self.root.join(dir)).await?;
        }
        Ok(())
    }

    fn record_path(&self, dir: &str, kind: &'static str, id: &str) -> Result<PathBuf, StorageError> {
        let plain = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\']);
        if !plain {
            return Err(StorageError::Invalid {
                kind,
                id: id.to_string(),
                errors: ValidationErrors::single("id", "must be usable as a file name"),
            });
        }
        Ok(self.root.join(dir).join(format!("{id}.json")))
    }

    /// Files may be edited by hand, so records are validated on the way in.
    async fn read<T: DeserializeOwned + Validate>(
        &self,
        dir: &str,
        kind: &'static str,
        id: &str,
    ) -> Result<Option<T>, StorageError> {
        let path = self.record_path(dir, kind, id)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let record: T = serde_json::from_str(&content)?;
        check(kind, id, &record)?;
        Ok(Some(record))
    }

    /// Write through a temporary file so readers never see a partial record.
    async fn write<T: Serialize>(
        &self,
        dir: &str,
        kind: &'static str,
        id: &str,
        record: &T,
    ) -> Result<(), StorageError> {
        let path = self.record_path(dir, kind, id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(record)?;
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, json).await?;
        fs::rename(&temp, &path).await?;
        tracing::debug!(kind, id, path = %path.display(), "record written");
        Ok(())
    }

    async fn remove(&self, dir: &str, kind: &'static str, id: &str) -> Result<bool, StorageError> {
        let path = self.record_path(dir, kind, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    /// Every parsable, valid record in `dir`; other files are logged and skipped.
    async fn read_all<T: DeserializeOwned + Validate>(
        &self,
        dir: &str,
        kind: &'static str,
    ) -> Result<Vec<T>, StorageError> {
        let mut entries = match fs::read_dir(self.root.join(dir)).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = fs::read_to_string(&path)
                .await
                .map_err(StorageError::from)
                .and_then(|content| serde_json::from_str::<T>(&content).map_err(StorageError::from))
                .and_then(|record| {
                    let id = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or_default();
                    check(kind, id, &record).map(|()| record)
                });
            match parsed {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "skipping unusable record")
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl ChatStore for JsonFileStore {
    async fn get_chat(&self, id: &str) -> Result<Option<ChatRecord>, StorageError> {
        self.read(CHATS, "chat", id).await
    }

    async fn put_chat(&self, record: &ChatRecord) -> Result<(), StorageError> {
        check("chat", &record.id, record)?;
        self.write(CHATS, "chat", &record.id, record).await
    }

    async fn delete_chat(&self, id: &str) -> Result<bool, StorageError> {
        self.remove(CHATS, "chat", id).await
    }

    async fn list_chats(&self) -> Result<Vec<ChatRecord>, StorageError> {
        let mut chats: Vec<ChatRecord> = self.read_all(CHATS, "chat").await?;
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(chats)
    }
}

#[async_trait]
impl LorebookStore for JsonFileStore {
    async fn get_lorebook(&self, id: &str) -> Result<Option<Lorebook>, StorageError> {
        self.read(LOREBOOKS, "lorebook", id).await
    }

    async fn put_lorebook(&self, lorebook: &Lorebook) -> Result<(), StorageError> {
        check("lorebook", &lorebook.id, lorebook)?;
        self.write(LOREBOOKS, "lorebook", &lorebook.id, lorebook).await
    }

    async fn list_lorebooks(&self) -> Result<Vec<Lorebook>, StorageError> {
        self.read_all(LOREBOOKS, "lorebook").await
    }
}

#[async_trait]
impl LibraryStore for JsonFileStore {
    async fn get_character(&self, id: &str) -> Result<Option<Character>, StorageError> {
        self.read(CHARACTERS, "character", id).await
    }

    async fn put_character(&self, character: &Character) -> Result<(), StorageError> {
        check("character", &character.id, character)?;
        self.write(CHARACTERS, "character", &character.id, character).await
    }

    async fn get_persona(&self, id: &str) -> Result<Option<Persona>, StorageError> {
        self.read(PERSONAS, "persona", id).await
    }

    async fn put_persona(&self, persona: &Persona) -> Result<(), StorageError> {
        check("persona", &persona.id, persona)?;
        self.write(PERSONAS, "persona", &persona.id, persona).await
    }

    async fn get_preset(&self, id: &str) -> Result<Option<Preset>, StorageError> {
        self.read(PRESETS, "preset", id).await
    }

    async fn put_preset(&self, preset: &Preset) -> Result<(), StorageError> {
        check("preset", &preset.id, preset)?;
        self.write(PRESETS, "preset", &preset.id, preset).await
    }
}
