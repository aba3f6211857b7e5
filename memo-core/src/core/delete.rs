//! Result type for note removal.
//!
//! Removing a note always takes its whole subtree with it and then closes the
//! gap among the remaining siblings. [`RemoveResult`] reports both halves of
//! that cascade so the caller can update its view without re-reading the
//! store.
//!
//! Fields serialize in camelCase (`removedIds`, `renumberedIds`), matching
//! the other result types in this crate.
//!
//! ```rust
//! use memo_core::RemoveResult;
//!
//! let result = RemoveResult {
//!     removed_ids: vec![4, 7, 8],
//!     renumbered_ids: vec![5],
//! };
//! assert_eq!(result.removed_count(), 3);
//! let json = serde_json::to_string(&result).unwrap();
//! assert!(json.contains("removedIds"));
//! ```

use serde::{Deserialize, Serialize};

use crate::core::note::NoteId;

/// The outcome of [`Outline::remove_note`](super::outline::Outline::remove_note).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveResult {
    /// The removed note followed by its descendants in pre-order.
    pub removed_ids: Vec<NoteId>,

    /// Former siblings whose `pos` was rewritten, in their new order.
    pub renumbered_ids: Vec<NoteId>,
}

impl RemoveResult {
    pub fn removed_count(&self) -> usize {
        self.removed_ids.len()
    }
}
