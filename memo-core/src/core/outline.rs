//! The outline synchronization engine.
//!
//! [`Outline`] owns the in-memory [`OutlineTree`] for one open file together
//! with the [`OutlineStore`] it was loaded from. Every user intent (add,
//! rename, remove, move up/down, drag-and-drop) mutates the tree first and
//! then rewrites exactly the rows that intent implicates, so sibling `pos`
//! values stay contiguous and every stored `depth` matches the tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::export::{self, ExportSummary};
use crate::core::note::{NoteField, NoteId, ROOT_ID};
use crate::core::storage::{OutlineStore, Storage};
use crate::core::tree::OutlineTree;
use crate::{MemoError, RemoveResult, Result};

/// Meta key holding the id of the active note (0 = nothing selected).
pub const SELECTED_ID_KEY: &str = "selected_id";

/// The active note and the ancestors a view must expand to reveal it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub selected: Option<NoteId>,
    /// Ancestors of `selected`, nearest first.
    pub expanded: Vec<NoteId>,
}

/// Read-only details shown in a note's properties dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteProperties {
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An open outline: tree, store and selection for a single session.
///
/// All mutation goes through `&mut self`, so only one edit can be in flight
/// at a time. If a multi-row write fails part-way the outline marks itself
/// degraded and refuses further edits until [`reload`](Self::reload).
pub struct Outline<S: OutlineStore> {
    store: S,
    tree: OutlineTree,
    selection: Selection,
    degraded: bool,
}

impl Outline<Storage> {
    /// Creates a new, empty notes file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::Store`] for any SQLite failure.
    pub fn create_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(Storage::create(path)?)
    }

    /// Opens an existing notes file and builds its outline.
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::InvalidWorkspace`] if the file is not a Memo
    /// database and [`MemoError::Integrity`] if its rows do not form a tree.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(Storage::open(path)?)
    }

    /// Copies the notes file to `path` ("Create Backup").
    pub fn backup_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.store.backup_to(path)
    }
}

impl<S: OutlineStore> Outline<S> {
    /// Builds the outline from `store` and restores the persisted selection.
    pub fn open(store: S) -> Result<Self> {
        let tree = OutlineTree::load(&store.load_all_notes()?)?;
        let mut outline = Self {
            store,
            tree,
            selection: Selection::default(),
            degraded: false,
        };
        outline.selection = outline.restore_selection();
        log::info!("Loaded outline with {} notes", outline.tree.len());
        Ok(outline)
    }

    /// Discards the in-memory tree and rebuilds it from the store.
    ///
    /// This is the only way out of a degraded session.
    pub fn reload(&mut self) -> Result<&Selection> {
        self.tree = OutlineTree::load(&self.store.load_all_notes()?)?;
        self.degraded = false;
        self.selection = self.restore_selection();
        log::info!("Reloaded outline with {} notes", self.tree.len());
        Ok(&self.selection)
    }

    pub fn tree(&self) -> &OutlineTree {
        &self.tree
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selected(&self) -> Option<NoteId> {
        self.selection.selected
    }

    /// `true` after a failed cascade left the store and tree out of step.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    // ── selection ───────────────────────────────────────────────

    /// Makes `id` the active note and persists it under [`SELECTED_ID_KEY`].
    /// Pass `None` to clear the selection.
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::NotFound`] if `id` is not in the outline, or
    /// [`MemoError::Store`] if the meta write fails.
    pub fn select(&mut self, id: Option<NoteId>) -> Result<()> {
        if let Some(id) = id {
            self.require(id)?;
        }
        self.store
            .write_meta(SELECTED_ID_KEY, &id.unwrap_or(ROOT_ID).to_string())?;
        self.selection = self.selection_for(id);
        Ok(())
    }

    /// Moves the selection after a committed edit. The edit stands even if
    /// the selection cannot be persisted, so that failure is only logged.
    fn follow_selection(&mut self, id: Option<NoteId>) {
        if let Err(e) = self
            .store
            .write_meta(SELECTED_ID_KEY, &id.unwrap_or(ROOT_ID).to_string())
        {
            log::warn!("Could not persist selected note: {e}");
        }
        self.selection = self.selection_for(id);
    }

    fn selection_for(&self, id: Option<NoteId>) -> Selection {
        match id {
            Some(id) => Selection {
                selected: Some(id),
                expanded: self.tree.ancestors(id),
            },
            None => Selection::default(),
        }
    }

    /// Reads the persisted selection; anything unresolvable falls back to
    /// no selection and is only logged.
    fn restore_selection(&self) -> Selection {
        match self.resolve_selected_id() {
            Ok(id) => self.selection_for(id),
            Err(e) => {
                log::warn!("Could not restore selected note: {e}");
                Selection::default()
            }
        }
    }

    fn resolve_selected_id(&self) -> Result<Option<NoteId>> {
        let Some(raw) = self.store.read_meta(SELECTED_ID_KEY)? else {
            return Ok(None);
        };
        let id: NoteId = raw.trim().parse().map_err(|_| {
            MemoError::Integrity(format!("{SELECTED_ID_KEY} is not a number: {raw:?}"))
        })?;
        if id == ROOT_ID {
            return Ok(None);
        }
        self.require(id)?;
        Ok(Some(id))
    }

    // ── structural edits ────────────────────────────────────────

    /// Appends a new note titled `title` as the last child of `parent_id`
    /// (use [`ROOT_ID`] for a top-level note) and selects it.
    ///
    /// Writes one row: `parent_id`, `pos = child count`, `depth = parent
    /// depth + 1`, `title`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::ValidationFailed`] for a blank title,
    /// [`MemoError::NotFound`] for an unknown parent, and
    /// [`MemoError::Degraded`] if the session needs a reload.
    pub fn add_note(&mut self, parent_id: NoteId, title: &str) -> Result<NoteId> {
        self.ensure_synced()?;
        let title = validate_title(title)?;
        let parent = self.tree.find(parent_id).ok_or(MemoError::NotFound(parent_id))?;
        let pos = parent.child_count();
        let depth = self.tree.depth(parent_id).ok_or(MemoError::NotFound(parent_id))? + 1;

        let id = self
            .store
            .insert_note(parent_id, pos as i64, depth as i64, title)?;
        self.tree.insert_child(parent_id, pos, id, title)?;
        log::debug!("Added note {id} under {parent_id} at pos {pos}, depth {depth}");

        self.follow_selection(Some(id));
        Ok(id)
    }

    /// Changes the title of `id`. Writes one row.
    pub fn rename_note(&mut self, id: NoteId, title: &str) -> Result<()> {
        self.ensure_synced()?;
        let title = validate_title(title)?;
        self.require(id)?;

        self.store.update_field(id, NoteField::Title, title.into())?;
        self.tree.set_title(id, title)?;
        Ok(())
    }

    /// Removes `id` and its whole subtree, then renumbers the remaining
    /// siblings to `0..k-1`. Confirmation is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::NotFound`] for an unknown id and
    /// [`MemoError::Store`] if a delete or renumber fails, after which the
    /// outline is degraded.
    pub fn remove_note(&mut self, id: NoteId) -> Result<RemoveResult> {
        self.ensure_synced()?;
        if id == ROOT_ID {
            return Err(MemoError::InvalidMove("The root cannot be removed".to_string()));
        }
        let parent_id = self.tree.parent_of(id).ok_or(MemoError::NotFound(id))?;

        let mut removed_ids = vec![id];
        removed_ids.extend(self.tree.child_ids(id)?);
        self.tree.remove_subtree(id)?;

        let result = self.run_cascade("remove", |store, tree| {
            for removed in &removed_ids {
                store.delete_note(*removed)?;
            }
            rewrite_positions(store, tree, parent_id)
        });
        let renumbered_ids = result?;

        if self
            .selection
            .selected
            .is_some_and(|selected| removed_ids.contains(&selected))
        {
            self.follow_selection(None);
        }

        log::debug!(
            "Removed {} notes, renumbered {} siblings",
            removed_ids.len(),
            renumbered_ids.len()
        );
        Ok(RemoveResult {
            removed_ids,
            renumbered_ids,
        })
    }

    /// Whether `id` has a previous sibling to swap with.
    pub fn can_move_up(&self, id: NoteId) -> bool {
        self.tree.index_of(id).is_some_and(|row| row > 0)
    }

    /// Whether `id` has a next sibling to swap with.
    pub fn can_move_down(&self, id: NoteId) -> bool {
        let Some(row) = self.tree.index_of(id) else {
            return false;
        };
        self.tree
            .parent_of(id)
            .and_then(|parent| self.tree.find(parent))
            .is_some_and(|parent| row + 1 < parent.child_count())
    }

    /// Swaps `id` with its previous sibling, rewriting `pos` for exactly the
    /// two swapped rows. Returns `false` (and writes nothing) when `id` is
    /// already first.
    pub fn move_up(&mut self, id: NoteId) -> Result<bool> {
        self.ensure_synced()?;
        self.require(id)?;
        if !self.can_move_up(id) {
            return Ok(false);
        }
        let row = self.tree.index_of(id).ok_or(MemoError::NotFound(id))?;
        self.swap_siblings(id, row, row - 1)?;
        Ok(true)
    }

    /// Swaps `id` with its next sibling, rewriting `pos` for exactly the two
    /// swapped rows. Returns `false` (and writes nothing) when `id` is
    /// already last.
    pub fn move_down(&mut self, id: NoteId) -> Result<bool> {
        self.ensure_synced()?;
        self.require(id)?;
        if !self.can_move_down(id) {
            return Ok(false);
        }
        let row = self.tree.index_of(id).ok_or(MemoError::NotFound(id))?;
        self.swap_siblings(id, row, row + 1)?;
        Ok(true)
    }

    fn swap_siblings(&mut self, id: NoteId, row: usize, target: usize) -> Result<()> {
        let parent_id = self.tree.parent_of(id).ok_or(MemoError::NotFound(id))?;
        let other = self
            .tree
            .find(parent_id)
            .and_then(|parent| parent.child(target))
            .map(|node| node.id())
            .ok_or(MemoError::NotFound(id))?;

        self.tree.move_sibling(parent_id, row, target)?;

        self.run_cascade("swap", |store, _| {
            store.update_field(id, NoteField::Pos, target.into())?;
            store.update_field(other, NoteField::Pos, row.into())
        })?;
        log::debug!("Swapped note {id} (pos {target}) with {other} (pos {row})");
        Ok(())
    }

    /// Drag-and-drop: moves `id` (with its subtree) so it becomes child
    /// `new_index` of `new_parent_id`. Dropping within the same parent is a
    /// reorder. The moved note becomes the selection.
    ///
    /// After the tree accepts the move the store is brought in line:
    ///
    /// 1. the previous parent is read from the store, not the tree;
    /// 2. the previous parent's remaining children are renumbered;
    /// 3. if the parent changed, the moved row gets its new `parent_id`, the
    ///    new parent's children are renumbered, and the moved note and every
    ///    descendant are shifted by the change in the moved note's depth.
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::InvalidMove`] for drops onto the note itself or
    /// one of its descendants (nothing is written), and [`MemoError::Store`]
    /// if a write fails, after which the outline is degraded.
    pub fn drop_note(&mut self, id: NoteId, new_parent_id: NoteId, new_index: usize) -> Result<()> {
        self.ensure_synced()?;
        self.tree.reparent(id, new_parent_id, new_index)?;

        let shifted = self.run_cascade("drop", |store, tree| sync_dropped(store, tree, id))?;
        log::debug!(
            "Dropped note {id} under {new_parent_id} at {}, {} depth rewrites",
            self.tree.index_of(id).unwrap_or(new_index),
            shifted
        );

        self.follow_selection(Some(id));
        Ok(())
    }

    // ── note content ────────────────────────────────────────────

    /// Body text of `id`.
    pub fn note_body(&self, id: NoteId) -> Result<String> {
        self.require(id)?;
        Ok(self.store.read_field(id, NoteField::Note)?.into_text())
    }

    pub fn save_body(&mut self, id: NoteId, text: &str) -> Result<()> {
        self.require(id)?;
        self.store.update_field(id, NoteField::Note, text.into())
    }

    /// Editor cursor line remembered for `id`.
    pub fn cursor_line(&self, id: NoteId) -> Result<usize> {
        self.require(id)?;
        let line = self.store.read_field(id, NoteField::Line)?.as_i64().unwrap_or(0);
        Ok(usize::try_from(line).unwrap_or(0))
    }

    pub fn save_cursor_line(&mut self, id: NoteId, line: usize) -> Result<()> {
        self.require(id)?;
        self.store.update_field(id, NoteField::Line, line.into())
    }

    pub fn properties(&self, id: NoteId) -> Result<NoteProperties> {
        self.require(id)?;
        let title = self.store.read_field(id, NoteField::Title)?.into_text();
        let created = self.store.read_field(id, NoteField::CreatedAt)?.as_i64().unwrap_or(0);
        let updated = self.store.read_field(id, NoteField::UpdatedAt)?.as_i64().unwrap_or(0);
        Ok(NoteProperties {
            title,
            created_at: DateTime::<Utc>::from_timestamp(created, 0).unwrap_or_default(),
            updated_at: DateTime::<Utc>::from_timestamp(updated, 0).unwrap_or_default(),
        })
    }

    // ── export & verification ───────────────────────────────────

    /// Writes every note into a zip archive at `archive_path`.
    /// See [`export::export_all`].
    pub fn export_all<P: AsRef<Path>>(&self, archive_path: P) -> Result<ExportSummary> {
        Ok(export::export_all(&self.tree, &self.store, archive_path.as_ref())?)
    }

    /// Re-reads every row and checks that `parent_id`, `pos` and `depth`
    /// agree with the tree.
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::Integrity`] listing every mismatch.
    pub fn check_consistency(&self) -> Result<()> {
        let rows = self.store.load_all_notes()?;
        let mut problems = Vec::new();

        if rows.len() != self.tree.len() {
            problems.push(format!(
                "store has {} rows, outline has {} notes",
                rows.len(),
                self.tree.len()
            ));
        }

        for row in &rows {
            let Some(node) = self.tree.find(row.id) else {
                problems.push(format!("row {} is not in the outline", row.id));
                continue;
            };
            let parent = node.parent_id().unwrap_or(ROOT_ID);
            if row.parent_id != parent {
                problems.push(format!("note {}: parent_id {} != {parent}", row.id, row.parent_id));
            }
            if let Some(index) = self.tree.index_of(row.id) {
                if row.pos != index as i64 {
                    problems.push(format!("note {}: pos {} != {index}", row.id, row.pos));
                }
            }
            if let Some(depth) = self.tree.depth(row.id) {
                if row.depth != depth as i64 {
                    problems.push(format!("note {}: depth {} != {depth}", row.id, row.depth));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MemoError::Integrity(problems.join("; ")))
        }
    }

    // ── internals ───────────────────────────────────────────────

    fn ensure_synced(&self) -> Result<()> {
        if self.degraded {
            return Err(MemoError::Degraded);
        }
        Ok(())
    }

    fn require(&self, id: NoteId) -> Result<()> {
        if id == ROOT_ID || !self.tree.contains(id) {
            return Err(MemoError::NotFound(id));
        }
        Ok(())
    }

    /// Runs a multi-row write sequence against the already-mutated tree.
    /// On failure the session is marked degraded.
    fn run_cascade<T, F>(&mut self, what: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut S, &OutlineTree) -> Result<T>,
    {
        let tree = &self.tree;
        let result = self.store.cascade(|store| f(store, tree));
        if let Err(e) = &result {
            self.degraded = true;
            log::error!("Cascade '{what}' failed, outline must be reloaded: {e}");
        }
        result
    }
}

/// Rewrites `pos` of every child of `parent_id` to its index in the tree.
/// Returns the rewritten ids in order.
fn rewrite_positions<S: OutlineStore>(
    store: &mut S,
    tree: &OutlineTree,
    parent_id: NoteId,
) -> Result<Vec<NoteId>> {
    let parent = tree.find(parent_id).ok_or_else(|| {
        MemoError::Integrity(format!("parent {parent_id} is missing from the outline"))
    })?;
    let ids = parent.direct_child_ids();
    for (pos, id) in ids.iter().enumerate() {
        store.update_field(*id, NoteField::Pos, pos.into())?;
    }
    Ok(ids)
}

/// Store half of a drag-and-drop. Returns the number of depth rewrites.
fn sync_dropped<S: OutlineStore>(store: &mut S, tree: &OutlineTree, id: NoteId) -> Result<usize> {
    // 1. Previous parent comes from the store; the tree has already moved on.
    let source_parent = store
        .read_field(id, NoteField::ParentId)?
        .as_i64()
        .ok_or_else(|| MemoError::Integrity(format!("note {id} has a non-numeric parent_id")))?;
    let destination_parent = tree.parent_of(id).ok_or(MemoError::NotFound(id))?;

    // 2. Close the gap left behind (or renumber the unified list).
    rewrite_positions(store, tree, source_parent)?;

    if source_parent == destination_parent {
        return Ok(0);
    }

    // 3. Attach to the new parent and renumber its children.
    store.update_field(id, NoteField::ParentId, destination_parent.into())?;
    rewrite_positions(store, tree, destination_parent)?;

    // 4. Shift the moved subtree by the change in ancestor depth.
    let old_depth = store
        .read_field(id, NoteField::Depth)?
        .as_i64()
        .ok_or_else(|| MemoError::Integrity(format!("note {id} has a non-numeric depth")))?;
    let new_depth = tree.depth(id).ok_or(MemoError::NotFound(id))? as i64;
    let delta = new_depth - old_depth;

    let mut subtree = vec![id];
    subtree.extend(tree.child_ids(id)?);
    if delta != 0 {
        for node in &subtree {
            let stored = store.read_field(*node, NoteField::Depth)?.as_i64().unwrap_or(0);
            store.update_field(*node, NoteField::Depth, (stored + delta).into())?;
        }
    }
    Ok(if delta != 0 { subtree.len() } else { 0 })
}

fn validate_title(title: &str) -> Result<&str> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(MemoError::ValidationFailed(
            "A note needs a title".to_string(),
        ));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::note::{FieldValue, NoteRow};
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn new_outline() -> (Outline<Storage>, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let outline = Outline::create_file(temp.path()).unwrap();
        (outline, temp)
    }

    fn rows_by_id<S: OutlineStore>(outline: &Outline<S>) -> HashMap<NoteId, NoteRow> {
        outline
            .store()
            .load_all_notes()
            .unwrap()
            .into_iter()
            .map(|row| (row.id, row))
            .collect()
    }

    /// Asserts contiguous positions under every parent, straight from the store.
    fn assert_positions_contiguous<S: OutlineStore>(outline: &Outline<S>) {
        let mut by_parent: HashMap<NoteId, Vec<i64>> = HashMap::new();
        for row in outline.store().load_all_notes().unwrap() {
            by_parent.entry(row.parent_id).or_default().push(row.pos);
        }
        for (parent, mut positions) in by_parent {
            positions.sort_unstable();
            let expected: Vec<i64> = (0..positions.len() as i64).collect();
            assert_eq!(positions, expected, "positions under {parent} are not contiguous");
        }
    }

    #[test]
    fn test_create_file_is_empty() {
        let (outline, _temp) = new_outline();
        assert!(outline.tree().is_empty());
        assert_eq!(outline.selected(), None);
        outline.check_consistency().unwrap();
    }

    #[test]
    fn test_add_note_writes_row_and_selects() {
        let (mut outline, _temp) = new_outline();
        let work = outline.add_note(ROOT_ID, "Work").unwrap();
        let notes = outline.add_note(work, "Notes").unwrap();
        let todo = outline.add_note(work, "  Todo ").unwrap();

        let rows = rows_by_id(&outline);
        assert_eq!(rows[&work].depth, 1);
        assert_eq!((rows[&notes].parent_id, rows[&notes].pos, rows[&notes].depth), (work, 0, 2));
        assert_eq!((rows[&todo].pos, rows[&todo].title.as_str()), (1, "Todo"));

        assert_eq!(outline.selected(), Some(todo));
        assert_eq!(outline.selection().expanded, vec![work]);
        assert_eq!(outline.store().read_meta(SELECTED_ID_KEY).unwrap(), Some(todo.to_string()));
        outline.check_consistency().unwrap();
    }

    #[test]
    fn test_add_note_rejects_blank_title_and_unknown_parent() {
        let (mut outline, _temp) = new_outline();
        assert!(matches!(outline.add_note(ROOT_ID, "   "), Err(MemoError::ValidationFailed(_))));
        assert!(matches!(outline.add_note(77, "x"), Err(MemoError::NotFound(77))));
        assert!(outline.store().load_all_notes().unwrap().is_empty());
    }

    #[test]
    fn test_rename_note_updates_store_and_tree() {
        let (mut outline, _temp) = new_outline();
        let id = outline.add_note(ROOT_ID, "Draft").unwrap();
        outline.rename_note(id, "Final").unwrap();

        assert_eq!(outline.tree().find(id).unwrap().title(), "Final");
        assert_eq!(
            outline.store().read_field(id, NoteField::Title).unwrap(),
            FieldValue::Text("Final".to_string())
        );
        assert!(outline.rename_note(id, "").is_err());
    }

    #[test]
    fn test_remove_note_cascades_and_renumbers() {
        let (mut outline, _temp) = new_outline();
        let a = outline.add_note(ROOT_ID, "A").unwrap();
        let b = outline.add_note(ROOT_ID, "B").unwrap();
        let b1 = outline.add_note(b, "B1").unwrap();
        let b1a = outline.add_note(b1, "B1a").unwrap();
        let c = outline.add_note(ROOT_ID, "C").unwrap();
        let d = outline.add_note(ROOT_ID, "D").unwrap();
        let c1 = outline.add_note(c, "C1").unwrap();
        let before = rows_by_id(&outline);

        let result = outline.remove_note(b).unwrap();
        assert_eq!(result.removed_ids, vec![b, b1, b1a]);
        assert_eq!(result.renumbered_ids, vec![a, c, d]);

        let after = rows_by_id(&outline);
        assert_eq!(after.len(), before.len() - 3);
        for id in [b, b1, b1a] {
            assert!(!after.contains_key(&id));
        }
        assert_eq!((after[&a].pos, after[&c].pos, after[&d].pos), (0, 1, 2));
        // Rows outside the sibling group are untouched.
        assert_eq!(after[&c1], before[&c1]);
        assert_positions_contiguous(&outline);
        outline.check_consistency().unwrap();
    }

    #[test]
    fn test_remove_selected_subtree_clears_selection() {
        let (mut outline, _temp) = new_outline();
        let a = outline.add_note(ROOT_ID, "A").unwrap();
        let a1 = outline.add_note(a, "A1").unwrap();
        assert_eq!(outline.selected(), Some(a1));

        outline.remove_note(a).unwrap();
        assert_eq!(outline.selected(), None);
        assert_eq!(outline.store().read_meta(SELECTED_ID_KEY).unwrap(), Some("0".to_string()));
        assert!(matches!(outline.remove_note(a), Err(MemoError::NotFound(_))));
    }

    #[test]
    fn test_move_down_swaps_and_stops_at_boundary() {
        let (mut outline, _temp) = new_outline();
        let a = outline.add_note(ROOT_ID, "A").unwrap();
        let b = outline.add_note(ROOT_ID, "B").unwrap();
        let c = outline.add_note(ROOT_ID, "C").unwrap();
        let before = rows_by_id(&outline);

        assert!(outline.move_down(b).unwrap());
        let rows = rows_by_id(&outline);
        assert_eq!((rows[&a].pos, rows[&b].pos, rows[&c].pos), (0, 2, 1));
        assert_eq!(rows[&a], before[&a]);
        assert_eq!(outline.tree().root().direct_child_ids(), vec![a, c, b]);

        assert!(!outline.can_move_down(b));
        assert!(!outline.move_down(b).unwrap());
        assert_eq!(rows_by_id(&outline), rows);
        outline.check_consistency().unwrap();
    }

    #[test]
    fn test_move_up_swaps_with_previous() {
        let (mut outline, _temp) = new_outline();
        let a = outline.add_note(ROOT_ID, "A").unwrap();
        let b = outline.add_note(ROOT_ID, "B").unwrap();

        assert!(!outline.can_move_up(a));
        assert!(!outline.move_up(a).unwrap());
        assert!(outline.move_up(b).unwrap());

        let rows = rows_by_id(&outline);
        assert_eq!((rows[&a].pos, rows[&b].pos), (1, 0));
        assert_eq!(outline.tree().root().direct_child_ids(), vec![b, a]);
        outline.check_consistency().unwrap();
    }

    #[test]
    fn test_drop_onto_childless_sibling() {
        let (mut outline, _temp) = new_outline();
        let x = outline.add_note(ROOT_ID, "X").unwrap();
        let x1 = outline.add_note(x, "X1").unwrap();
        let x2 = outline.add_note(x, "X2").unwrap();
        let y = outline.add_note(ROOT_ID, "Y").unwrap();
        let before = rows_by_id(&outline);

        outline.drop_note(x, y, 0).unwrap();

        let rows = rows_by_id(&outline);
        let shift = (before[&y].depth + 1) - before[&x].depth;
        assert_eq!(rows[&x].parent_id, y);
        assert_eq!(rows[&x].pos, 0);
        assert_eq!(rows[&x].depth, before[&y].depth + 1);
        assert_eq!(rows[&x1].depth, before[&x1].depth + shift);
        assert_eq!(rows[&x2].depth, before[&x2].depth + shift);
        assert_eq!(rows[&y].pos, 0);
        assert_eq!(rows[&y].depth, before[&y].depth);
        assert_eq!(outline.selected(), Some(x));
        assert_eq!(outline.selection().expanded, vec![y]);
        assert_positions_contiguous(&outline);
        outline.check_consistency().unwrap();
    }

    #[test]
    fn test_drop_deep_subtree_shifts_only_moved_nodes() {
        let (mut outline, _temp) = new_outline();
        let a = outline.add_note(ROOT_ID, "A").unwrap();
        let a1 = outline.add_note(a, "A1").unwrap();
        let a1a = outline.add_note(a1, "A1a").unwrap();
        let a1a1 = outline.add_note(a1a, "A1a1").unwrap();
        let b = outline.add_note(ROOT_ID, "B").unwrap();
        let b1 = outline.add_note(b, "B1").unwrap();
        let b1a = outline.add_note(b1, "B1a").unwrap();
        let before = rows_by_id(&outline);

        // Subtree at depth 2 moves under a parent at depth 3.
        outline.drop_note(a1, b1a, 0).unwrap();
        let after = rows_by_id(&outline);
        let shift = before[&b1a].depth + 1 - before[&a1].depth;
        assert_eq!(shift, 2);
        for id in [a1, a1a, a1a1] {
            assert_eq!(after[&id].depth, before[&id].depth + shift);
        }
        for id in [a, b, b1, b1a] {
            assert_eq!(after[&id].depth, before[&id].depth);
        }

        // And back up to the top level.
        outline.drop_note(a1a, ROOT_ID, 1).unwrap();
        let top = rows_by_id(&outline);
        assert_eq!((top[&a1a].depth, top[&a1a1].depth), (1, 2));
        assert_eq!(outline.tree().root().direct_child_ids(), vec![a, a1a, b]);
        assert_positions_contiguous(&outline);
        outline.check_consistency().unwrap();
    }

    #[test]
    fn test_drop_within_same_parent_reorders() {
        let (mut outline, _temp) = new_outline();
        let p = outline.add_note(ROOT_ID, "P").unwrap();
        let k: Vec<NoteId> = (0..4)
            .map(|i| outline.add_note(p, &format!("K{i}")).unwrap())
            .collect();
        let depths_before: Vec<i64> = k.iter().map(|id| rows_by_id(&outline)[id].depth).collect();

        outline.drop_note(k[3], p, 0).unwrap();
        assert_eq!(outline.tree().find(p).unwrap().direct_child_ids(), vec![k[3], k[0], k[1], k[2]]);

        let rows = rows_by_id(&outline);
        for (expected_pos, id) in [k[3], k[0], k[1], k[2]].iter().enumerate() {
            assert_eq!(rows[id].pos, expected_pos as i64);
        }
        let depths_after: Vec<i64> = k.iter().map(|id| rows[id].depth).collect();
        assert_eq!(depths_before, depths_after);
        outline.check_consistency().unwrap();
    }

    #[test]
    fn test_drop_onto_descendant_is_rejected_without_writes() {
        let (mut outline, _temp) = new_outline();
        let a = outline.add_note(ROOT_ID, "A").unwrap();
        let a1 = outline.add_note(a, "A1").unwrap();
        let before = rows_by_id(&outline);

        let err = outline.drop_note(a, a1, 0).unwrap_err();
        assert!(err.to_string().contains("cycle"), "Expected cycle error, got: {err}");
        assert!(outline.drop_note(a, a, 0).is_err());
        assert_eq!(rows_by_id(&outline), before);
        assert!(!outline.is_degraded());
    }

    #[test]
    fn test_round_trip_load_reproduces_tree() {
        let temp = NamedTempFile::new().unwrap();
        let tree = {
            let mut outline = Outline::create_file(temp.path()).unwrap();
            let a = outline.add_note(ROOT_ID, "A").unwrap();
            let b = outline.add_note(ROOT_ID, "B").unwrap();
            let a1 = outline.add_note(a, "A1").unwrap();
            outline.add_note(a1, "A1a").unwrap();
            outline.add_note(b, "B1").unwrap();
            outline.move_down(a).unwrap();
            outline.drop_note(a1, b, 0).unwrap();
            outline.tree().clone()
        };

        let reopened = Outline::open_file(temp.path()).unwrap();
        assert_eq!(reopened.tree(), &tree);
        reopened.check_consistency().unwrap();
    }

    #[test]
    fn test_selection_persists_across_open() {
        let temp = NamedTempFile::new().unwrap();
        let (a, a1) = {
            let mut outline = Outline::create_file(temp.path()).unwrap();
            let a = outline.add_note(ROOT_ID, "A").unwrap();
            let a1 = outline.add_note(a, "A1").unwrap();
            let a1a = outline.add_note(a1, "A1a").unwrap();
            outline.select(Some(a1a)).unwrap();
            (a, a1)
        };

        let outline = Outline::open_file(temp.path()).unwrap();
        let selected = outline.selected().unwrap();
        assert_eq!(outline.tree().find(selected).unwrap().title(), "A1a");
        assert_eq!(outline.selection().expanded, vec![a1, a]);
    }

    #[test]
    fn test_stale_selection_falls_back_to_none() {
        let temp = NamedTempFile::new().unwrap();
        {
            let mut storage = Storage::create(temp.path()).unwrap();
            storage.insert_note(ROOT_ID, 0, 1, "Only").unwrap();
            storage.write_meta(SELECTED_ID_KEY, "999").unwrap();
        }

        let mut outline = Outline::open_file(temp.path()).unwrap();
        assert_eq!(outline.selected(), None);
        assert!(matches!(outline.select(Some(999)), Err(MemoError::NotFound(999))));
    }

    #[test]
    fn test_open_corrupt_outline_is_integrity_error() {
        let mut storage = Storage::open_in_memory().unwrap();
        storage.insert_note(ROOT_ID, 0, 1, "Fine").unwrap();
        storage.insert_note(4242, 0, 2, "Orphan").unwrap();

        assert!(matches!(Outline::open(storage), Err(MemoError::Integrity(_))));
    }

    #[test]
    fn test_body_line_and_properties() {
        let (mut outline, _temp) = new_outline();
        let id = outline.add_note(ROOT_ID, "Journal").unwrap();

        assert_eq!(outline.note_body(id).unwrap(), "");
        outline.save_body(id, "first line\nsecond").unwrap();
        outline.save_cursor_line(id, 1).unwrap();

        assert_eq!(outline.note_body(id).unwrap(), "first line\nsecond");
        assert_eq!(outline.cursor_line(id).unwrap(), 1);

        let props = outline.properties(id).unwrap();
        assert_eq!(props.title, "Journal");
        assert!(props.updated_at >= props.created_at);
        assert!(matches!(outline.note_body(ROOT_ID), Err(MemoError::NotFound(_))));
    }

    #[test]
    fn test_check_consistency_detects_drift() {
        let (mut outline, _temp) = new_outline();
        let a = outline.add_note(ROOT_ID, "A").unwrap();
        outline.add_note(ROOT_ID, "B").unwrap();

        outline
            .store
            .update_field(a, NoteField::Depth, 5_i64.into())
            .unwrap();
        let err = outline.check_consistency().unwrap_err();
        assert!(err.to_string().contains("depth 5"), "unexpected: {err}");
    }

    #[test]
    fn test_backup_to_writes_openable_copy() {
        let (mut outline, _temp) = new_outline();
        outline.add_note(ROOT_ID, "Keep me").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("notes-backup.db");

        outline.backup_to(&target).unwrap();
        let copy = Outline::open_file(&target).unwrap();
        assert_eq!(copy.tree().len(), 1);
    }

    // ── degraded sessions ───────────────────────────────────────

    /// Non-transactional store that starts failing `pos` or meta writes on
    /// demand.
    struct FlakyStore {
        inner: Storage,
        pos_writes_left: Option<usize>,
        fail_meta: bool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: Storage::open_in_memory().unwrap(),
                pos_writes_left: None,
                fail_meta: false,
            }
        }
    }

    impl OutlineStore for FlakyStore {
        fn load_all_notes(&self) -> Result<Vec<NoteRow>> {
            self.inner.load_all_notes()
        }

        fn insert_note(&mut self, parent_id: NoteId, pos: i64, depth: i64, title: &str) -> Result<NoteId> {
            self.inner.insert_note(parent_id, pos, depth, title)
        }

        fn delete_note(&mut self, id: NoteId) -> Result<()> {
            self.inner.delete_note(id)
        }

        fn update_field(&mut self, id: NoteId, field: NoteField, value: FieldValue) -> Result<()> {
            if field == NoteField::Pos {
                if let Some(left) = self.pos_writes_left.as_mut() {
                    if *left == 0 {
                        return Err(MemoError::Store(rusqlite::Error::InvalidQuery));
                    }
                    *left -= 1;
                }
            }
            self.inner.update_field(id, field, value)
        }

        fn read_field(&self, id: NoteId, field: NoteField) -> Result<FieldValue> {
            self.inner.read_field(id, field)
        }

        fn read_meta(&self, key: &str) -> Result<Option<String>> {
            self.inner.read_meta(key)
        }

        fn write_meta(&mut self, key: &str, value: &str) -> Result<()> {
            if self.fail_meta {
                return Err(MemoError::Store(rusqlite::Error::InvalidQuery));
            }
            self.inner.write_meta(key, value)
        }
    }

    #[test]
    fn test_failed_cascade_degrades_until_reload() {
        let mut outline = Outline::open(FlakyStore::new()).unwrap();
        let a = outline.add_note(ROOT_ID, "A").unwrap();
        let b = outline.add_note(ROOT_ID, "B").unwrap();
        let c = outline.add_note(ROOT_ID, "C").unwrap();

        outline.store.pos_writes_left = Some(1);
        let err = outline.remove_note(a).unwrap_err();
        assert!(matches!(err, MemoError::Store(_)));
        assert!(outline.is_degraded());
        assert!(matches!(outline.add_note(ROOT_ID, "D"), Err(MemoError::Degraded)));
        assert!(matches!(outline.move_up(c), Err(MemoError::Degraded)));

        // A's row is gone, B was renumbered, C still claims pos 2.
        outline.store.pos_writes_left = None;
        outline.reload().unwrap();
        assert!(!outline.is_degraded());
        assert_eq!(outline.tree().root().direct_child_ids(), vec![b, c]);
        assert!(outline.check_consistency().is_err());

        // Any full renumber of the group repairs it.
        outline.drop_note(c, ROOT_ID, 1).unwrap();
        outline.check_consistency().unwrap();
    }

    #[test]
    fn test_edits_stand_when_selection_cannot_be_saved() {
        let mut outline = Outline::open(FlakyStore::new()).unwrap();
        let a = outline.add_note(ROOT_ID, "A").unwrap();
        let b = outline.add_note(ROOT_ID, "B").unwrap();
        outline.store.fail_meta = true;

        let a1 = outline.add_note(a, "A1").unwrap();
        assert_eq!(outline.selected(), Some(a1));
        assert!(outline.store().read_field(a1, NoteField::Title).is_ok());

        outline.drop_note(a1, b, 0).unwrap();
        assert_eq!(outline.selection().expanded, vec![b]);

        let removed = outline.remove_note(b).unwrap();
        assert_eq!(removed.removed_ids, vec![b, a1]);
        assert_eq!(outline.selected(), None);

        assert!(!outline.is_degraded());
        assert!(outline.select(Some(a)).is_err());
        outline.check_consistency().unwrap();
    }
}
