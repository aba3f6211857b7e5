//! Core library for Memo, an outline note-taking application backed by SQLite.
//!
//! The primary entry point is [`Outline`], which keeps the in-memory
//! [`OutlineTree`] and an [`OutlineStore`] in step. Every structural edit
//! (add, remove, rename, move, drag-drop) goes through `Outline` methods.
//!
//! Types are re-exported from their respective sub-modules for convenience;
//! consumers should import from the crate root rather than the `core` module.

pub mod core;

// Re-export commonly used types.
#[doc(inline)]
pub use core::{
    delete::RemoveResult,
    error::{MemoError, Result},
    export::{dated_file_name, export_all, ExportError, ExportSummary},
    note::{FieldValue, NoteField, NoteId, NoteRow, ROOT_ID},
    outline::{NoteProperties, Outline, Selection, SELECTED_ID_KEY},
    settings::Settings,
    storage::{OutlineStore, Storage},
    tree::{OutlineTree, TreeNode},
};
