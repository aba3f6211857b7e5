//! Persistence seam for the outline and its SQLite implementation.

use crate::core::note::{FieldValue, NoteField, NoteId, NoteRow};
use crate::{MemoError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

/// The narrow persistence interface the outline engine consumes.
///
/// Every method touches a single row. Multi-row cascades are composed by
/// [`Outline`](super::outline::Outline) as ordered sequences of these calls,
/// optionally wrapped in [`cascade`](OutlineStore::cascade).
pub trait OutlineStore {
    /// Returns every note row ordered by `(depth, pos)`.
    fn load_all_notes(&self) -> Result<Vec<NoteRow>>;

    /// Inserts a new row and returns its store-assigned id.
    fn insert_note(&mut self, parent_id: NoteId, pos: i64, depth: i64, title: &str) -> Result<NoteId>;

    fn delete_note(&mut self, id: NoteId) -> Result<()>;

    fn update_field(&mut self, id: NoteId, field: NoteField, value: FieldValue) -> Result<()>;

    fn read_field(&self, id: NoteId, field: NoteField) -> Result<FieldValue>;

    fn read_meta(&self, key: &str) -> Result<Option<String>>;

    fn write_meta(&mut self, key: &str, value: &str) -> Result<()>;

    /// Runs a multi-row write sequence.
    ///
    /// Stores without transactions just run `f`; the sequence is still
    /// correct, only not atomic.
    fn cascade<T, F>(&mut self, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T>,
    {
        f(self)
    }
}

/// SQLite-backed [`OutlineStore`].
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Creates a new notes database at `path` with the current schema.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(&path)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        log::info!("Created notes database {}", path.as_ref().display());
        Ok(Self { conn })
    }

    /// Opens an existing notes database. Upgrading older files is done by a
    /// separate migration step before this is called.
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::InvalidWorkspace`] if the file lacks the `notes`
    /// or `meta` tables, or [`MemoError::Store`] if it is not SQLite at all.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(&path)?;

        let table_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type='table'
             AND name IN ('notes', 'meta')",
            [],
            |row| row.get(0),
        )?;

        if table_count != 2 {
            return Err(MemoError::InvalidWorkspace(
                "Not a valid Memo database".to_string(),
            ));
        }

        log::debug!("Opened notes database {}", path.as_ref().display());
        Ok(Self { conn })
    }

    /// Creates a schema-initialised database that lives only in memory.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Writes a consistent copy of the database to `path`.
    ///
    /// The copy is first written next to `path` and only renamed over it once
    /// complete, so an existing backup survives a failed attempt.
    pub fn backup_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let target = path.as_ref();
        let staging = staging_path(target);
        if staging.exists() {
            fs::remove_file(&staging)?;
        }

        if let Err(e) = self
            .conn
            .execute("VACUUM INTO ?1", [staging.to_string_lossy()])
        {
            if staging.exists() {
                if let Err(cleanup) = fs::remove_file(&staging) {
                    log::warn!("Could not remove partial backup {}: {cleanup}", staging.display());
                }
            }
            return Err(e.into());
        }
        fs::rename(&staging, target)?;

        log::info!("Backed up notes database to {}", target.display());
        Ok(())
    }
}

/// `.<name>.partial` in the same directory as `target`.
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    target.with_file_name(format!(".{name}.partial"))
}

impl OutlineStore for Storage {
    fn load_all_notes(&self) -> Result<Vec<NoteRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, parent_id, pos, depth, title, note, line, created_at, updated_at
             FROM notes ORDER BY depth, pos",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(NoteRow {
                    id: row.get(0)?,
                    parent_id: row.get(1)?,
                    pos: row.get(2)?,
                    depth: row.get(3)?,
                    title: row.get(4)?,
                    note: row.get(5)?,
                    line: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn insert_note(&mut self, parent_id: NoteId, pos: i64, depth: i64, title: &str) -> Result<NoteId> {
        let now = chrono::Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO notes (parent_id, pos, depth, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![parent_id, pos, depth, title, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn delete_note(&mut self, id: NoteId) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM notes WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(MemoError::NotFound(id));
        }
        Ok(())
    }

    fn update_field(&mut self, id: NoteId, field: NoteField, value: FieldValue) -> Result<()> {
        if !field.is_writable() {
            return Err(MemoError::ReadOnlyField(field));
        }

        let changed = if field.touches_content() {
            let now = chrono::Utc::now().timestamp();
            self.conn.execute(
                &format!("UPDATE notes SET {} = ?1, updated_at = ?2 WHERE id = ?3", field.column()),
                params![value, now, id],
            )?
        } else {
            self.conn.execute(
                &format!("UPDATE notes SET {} = ?1 WHERE id = ?2", field.column()),
                params![value, id],
            )?
        };

        if changed == 0 {
            return Err(MemoError::NotFound(id));
        }
        Ok(())
    }

    fn read_field(&self, id: NoteId, field: NoteField) -> Result<FieldValue> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM notes WHERE id = ?1", field.column()),
                params![id],
                |row| row.get::<_, FieldValue>(0),
            )
            .optional()?
            .ok_or(MemoError::NotFound(id))
    }

    fn read_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(value.flatten())
    }

    fn write_meta(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    fn cascade<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.conn.execute_batch("BEGIN")?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    log::warn!("Rollback after failed cascade also failed: {rollback}");
                }
                Err(e)
            }
        }
    }
}
