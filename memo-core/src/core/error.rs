//! Error types for the Memo core library.

use thiserror::Error;

use crate::core::export::ExportError;
use crate::core::note::{NoteField, NoteId};

/// All errors that can occur within the Memo core library.
#[derive(Debug, Error)]
pub enum MemoError {
    /// A read or write against the SQLite store failed.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Stored rows do not form a valid outline (e.g. a row references a
    /// parent that does not exist).
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// A note ID was requested that is not present in the outline.
    #[error("Note not found: {0}")]
    NotFound(NoteId),

    /// A move would create a cycle or is otherwise invalid.
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    /// User-supplied input was rejected before touching the store.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The opened file is not a valid Memo database.
    #[error("Invalid workspace: {0}")]
    InvalidWorkspace(String),

    /// The field is maintained by the store and cannot be written directly.
    #[error("Field is read-only: {0}")]
    ReadOnlyField(NoteField),

    /// An earlier cascade failed part-way; the tree must be reloaded.
    #[error("Outline is out of sync with the store; reload required")]
    Degraded,

    /// An I/O operation on the filesystem failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings data could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Exporting the outline to an archive failed.
    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

/// Convenience alias that pins the error type to [`MemoError`].
pub type Result<T> = std::result::Result<T, MemoError>;

impl MemoError {
    /// Returns a short, human-readable message suitable for display to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Store(e) => format!("Failed to save: {e}"),
            Self::Integrity(_) => "The notes file is damaged and cannot be shown".to_string(),
            Self::NotFound(_) => "Note no longer exists".to_string(),
            Self::InvalidMove(msg) => msg.clone(),
            Self::ValidationFailed(msg) => msg.clone(),
            Self::InvalidWorkspace(_) => "Could not open notes file".to_string(),
            Self::ReadOnlyField(field) => format!("Cannot change {field}"),
            Self::Degraded => "Notes are out of sync, please reopen the file".to_string(),
            Self::Io(e) => format!("File error: {e}"),
            Self::Json(e) => format!("Data format error: {e}"),
            Self::Export(e) => format!("Export failed: {e}"),
        }
    }
}
