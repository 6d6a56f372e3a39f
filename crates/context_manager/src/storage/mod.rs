//! Storage collaborators
//!
//! The core reads and writes chats, lorebooks and library data through
//! these traits. Two implementations are provided: an in-memory store for
//! tests and previews, and a JSON-file store with one file per record.

mod json_file;
mod memory;
mod record;
mod traits;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use record::ChatRecord;
pub use traits::{ChatStore, LibraryStore, LorebookStore};

use chat_core::Validate;

use crate::error::StorageError;

/// Reject invalid records before they reach a store.
pub(crate) fn check<T: Validate>(kind: &'static str, id: &str, record: &T) -> Result<(), StorageError> {
    record.validate().map_err(|errors| StorageError::Invalid {
        kind,
        id: id.to_string(),
        errors,
    })
}
