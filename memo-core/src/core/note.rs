use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned note identifier.
pub type NoteId = i64;

/// Sentinel id of the implicit outline root. No row ever carries it.
pub const ROOT_ID: NoteId = 0;

/// One row of the `notes` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRow {
    pub id: NoteId,
    pub parent_id: NoteId,
    pub pos: i64,
    pub depth: i64,
    pub title: String,
    pub note: String,
    pub line: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Columns of the `notes` table addressable through
/// [`OutlineStore`](super::storage::OutlineStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteField {
    Title,
    Note,
    ParentId,
    Pos,
    Depth,
    Line,
    CreatedAt,
    UpdatedAt,
}

impl NoteField {
    /// SQL column name. Only these fixed names are ever interpolated into queries.
    pub fn column(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Note => "note",
            Self::ParentId => "parent_id",
            Self::Pos => "pos",
            Self::Depth => "depth",
            Self::Line => "line",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }

    /// Timestamps are maintained by the store itself.
    pub fn is_writable(self) -> bool {
        !matches!(self, Self::CreatedAt | Self::UpdatedAt)
    }

    /// Writes to content fields bump `updated_at`; structural fields do not.
    pub fn touches_content(self) -> bool {
        matches!(self, Self::Title | Self::Note)
    }
}

impl fmt::Display for NoteField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// A single column value read from or written to a note row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
    Null,
}

impl FieldValue {
    /// Integer view; `NULL` reads as 0, matching the column defaults.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Null => Some(0),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Text view; `NULL` reads as the empty string.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Integer(n) => n.to_string(),
            Self::Null => String::new(),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Integer(n) => n.to_sql(),
            Self::Text(s) => s.to_sql(),
            Self::Null => Ok(ToSqlOutput::from(rusqlite::types::Null)),
        }
    }
}

impl FromSql for FieldValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Self::Null),
            ValueRef::Integer(n) => Ok(Self::Integer(n)),
            ValueRef::Real(f) => Ok(Self::Integer(f as i64)),
            ValueRef::Text(_) | ValueRef::Blob(_) => String::column_result(value).map(Self::Text),
        }
    }
}
