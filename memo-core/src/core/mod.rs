//! Internal domain modules for the Memo core library.
//!
//! All public types from these modules are re-exported at the crate root
//! with `#[doc(inline)]`; import from there in preference to this module.

pub mod delete;
pub mod error;
pub mod export;
pub mod note;
pub mod outline;
pub mod settings;
pub mod storage;
pub mod tree;

#[doc(inline)]
pub use delete::RemoveResult;
#[doc(inline)]
pub use error::{MemoError, Result};
#[doc(inline)]
pub use export::{dated_file_name, export_all, ExportError, ExportSummary};
#[doc(inline)]
pub use note::{FieldValue, NoteField, NoteId, NoteRow, ROOT_ID};
#[doc(inline)]
pub use outline::{NoteProperties, Outline, Selection, SELECTED_ID_KEY};
#[doc(inline)]
pub use settings::Settings;
#[doc(inline)]
pub use storage::{OutlineStore, Storage};
#[doc(inline)]
pub use tree::{OutlineTree, TreeNode};
