//! In-memory outline tree.
//!
//! Each [`TreeNode`] owns its children by value, so the outline can never
//! share a node between two parents or contain a cycle. The only link back
//! up the tree is the node's `parent_id`, which is a plain id rather than a
//! reference; depth is always derived by walking those ids to the root and
//! is never cached on the node.

use std::collections::HashSet;

use crate::core::note::{NoteId, NoteRow, ROOT_ID};
use crate::{MemoError, Result};

/// One note in the outline: identity, cached title and ordered children.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    id: NoteId,
    title: String,
    parent_id: Option<NoteId>,
    children: Vec<TreeNode>,
}

impl TreeNode {
    fn new(id: NoteId, title: String, parent_id: Option<NoteId>) -> Self {
        Self {
            id,
            title,
            parent_id,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> NoteId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Id of the owning parent; `None` only for the implicit root.
    pub fn parent_id(&self) -> Option<NoteId> {
        self.parent_id
    }

    pub fn children(&self) -> &[TreeNode] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Option<&TreeNode> {
        self.children.get(index)
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Depth-first search of this subtree, including the node itself.
    pub fn find(&self, id: NoteId) -> Option<&TreeNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    fn find_mut(&mut self, id: NoteId) -> Option<&mut TreeNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// Ids of every descendant in depth-first pre-order, excluding `self`.
    pub fn child_ids(&self) -> Vec<NoteId> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, ids: &mut Vec<NoteId>) {
        for child in &self.children {
            ids.push(child.id);
            child.collect_ids(ids);
        }
    }

    /// Ids of the direct children in sibling order.
    pub fn direct_child_ids(&self) -> Vec<NoteId> {
        self.children.iter().map(|c| c.id).collect()
    }

    fn index_of_child(&self, id: NoteId) -> Option<usize> {
        self.children.iter().position(|c| c.id == id)
    }
}

/// The outline for one open file. Sole owner of the root node.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineTree {
    root: TreeNode,
}

impl Default for OutlineTree {
    fn default() -> Self {
        Self::new()
    }
}

impl OutlineTree {
    /// Creates an outline containing only the implicit root.
    pub fn new() -> Self {
        Self {
            root: TreeNode::new(ROOT_ID, String::new(), None),
        }
    }

    /// Builds the outline from rows sorted by `(depth, pos)`.
    ///
    /// Because of the ordering every row's parent has already been placed, so
    /// each row is simply appended to its parent's child list.
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::Integrity`] if a row references an unknown parent,
    /// repeats an id, or uses the root sentinel as its own id.
    pub fn load(rows: &[NoteRow]) -> Result<Self> {
        let mut tree = Self::new();
        let mut seen: HashSet<NoteId> = HashSet::with_capacity(rows.len());

        for row in rows {
            if row.id == ROOT_ID || !seen.insert(row.id) {
                return Err(MemoError::Integrity(format!(
                    "note id {} is invalid or duplicated",
                    row.id
                )));
            }
            let parent = tree.root.find_mut(row.parent_id).ok_or_else(|| {
                MemoError::Integrity(format!(
                    "note {} references missing parent {}",
                    row.id, row.parent_id
                ))
            })?;
            parent
                .children
                .push(TreeNode::new(row.id, row.title.clone(), Some(row.parent_id)));
        }

        Ok(tree)
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Number of notes, not counting the implicit root.
    pub fn len(&self) -> usize {
        self.root.child_ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    pub fn find(&self, id: NoteId) -> Option<&TreeNode> {
        self.root.find(id)
    }

    pub fn contains(&self, id: NoteId) -> bool {
        self.find(id).is_some()
    }

    fn node(&self, id: NoteId) -> Result<&TreeNode> {
        self.find(id).ok_or(MemoError::NotFound(id))
    }

    fn node_mut(&mut self, id: NoteId) -> Result<&mut TreeNode> {
        self.root.find_mut(id).ok_or(MemoError::NotFound(id))
    }

    /// All descendant ids of `id` in depth-first pre-order.
    pub fn child_ids(&self, id: NoteId) -> Result<Vec<NoteId>> {
        Ok(self.node(id)?.child_ids())
    }

    pub fn parent_of(&self, id: NoteId) -> Option<NoteId> {
        self.find(id).and_then(TreeNode::parent_id)
    }

    /// Index of `id` among its siblings.
    pub fn index_of(&self, id: NoteId) -> Option<usize> {
        let parent = self.parent_of(id)?;
        self.find(parent)?.index_of_child(id)
    }

    /// Distance from the root, walking one parent hop at a time.
    /// The root itself has depth 0.
    pub fn depth(&self, id: NoteId) -> Option<usize> {
        let mut node = self.find(id)?;
        let mut hops = 0;
        while node.id != ROOT_ID {
            hops += 1;
            node = self.find(node.parent_id?)?;
        }
        Some(hops)
    }

    /// Ancestors of `id`, nearest first, excluding the implicit root.
    pub fn ancestors(&self, id: NoteId) -> Vec<NoteId> {
        let mut chain = Vec::new();
        let mut current = self.parent_of(id);
        while let Some(parent) = current {
            if parent == ROOT_ID {
                break;
            }
            chain.push(parent);
            current = self.parent_of(parent);
        }
        chain
    }

    /// Inserts a new child of `parent_id` at `index` (clamped to the child
    /// count) carrying the id the store assigned to it.
    pub fn insert_child(
        &mut self,
        parent_id: NoteId,
        index: usize,
        id: NoteId,
        title: &str,
    ) -> Result<&mut TreeNode> {
        if id == ROOT_ID || self.contains(id) {
            return Err(MemoError::Integrity(format!(
                "cannot insert note with id {id}: invalid or already present"
            )));
        }
        let parent = self.node_mut(parent_id)?;
        let index = index.min(parent.children.len());
        parent
            .children
            .insert(index, TreeNode::new(id, title.to_string(), Some(parent_id)));
        Ok(&mut parent.children[index])
    }

    pub fn set_title(&mut self, id: NoteId, title: &str) -> Result<()> {
        if id == ROOT_ID {
            return Err(MemoError::NotFound(id));
        }
        self.node_mut(id)?.title = title.to_string();
        Ok(())
    }

    /// Detaches `id` and its whole subtree from the outline and hands it back.
    pub fn remove_subtree(&mut self, id: NoteId) -> Result<TreeNode> {
        if id == ROOT_ID {
            return Err(MemoError::InvalidMove("The root cannot be removed".to_string()));
        }
        let parent_id = self.parent_of(id).ok_or(MemoError::NotFound(id))?;
        let parent = self.node_mut(parent_id)?;
        let index = parent
            .index_of_child(id)
            .ok_or(MemoError::NotFound(id))?;
        Ok(parent.children.remove(index))
    }

    /// Moves the child at `from` so that it ends up at index `to` of the
    /// same parent.
    pub fn move_sibling(&mut self, parent_id: NoteId, from: usize, to: usize) -> Result<()> {
        let parent = self.node_mut(parent_id)?;
        let count = parent.children.len();
        if from >= count || to >= count {
            return Err(MemoError::InvalidMove(format!(
                "sibling move {from} -> {to} out of range for {count} children"
            )));
        }
        if from != to {
            let node = parent.children.remove(from);
            parent.children.insert(to, node);
        }
        Ok(())
    }

    /// Detaches `id` from its parent and attaches it to `new_parent_id` at
    /// `new_index` (clamped). Works for same-parent moves too.
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::InvalidMove`] when moving the root, moving a note
    /// onto itself, or onto one of its own descendants.
    pub fn reparent(&mut self, id: NoteId, new_parent_id: NoteId, new_index: usize) -> Result<()> {
        if id == ROOT_ID {
            return Err(MemoError::InvalidMove("The root cannot be moved".to_string()));
        }
        if id == new_parent_id {
            return Err(MemoError::InvalidMove(
                "A note cannot be its own parent".to_string(),
            ));
        }
        self.node(new_parent_id)?;
        if self.ancestors(new_parent_id).contains(&id) {
            return Err(MemoError::InvalidMove(
                "Move would create a cycle".to_string(),
            ));
        }

        let mut node = self.remove_subtree(id)?;
        node.parent_id = Some(new_parent_id);
        let parent = self.node_mut(new_parent_id)?;
        let index = new_index.min(parent.children.len());
        parent.children.insert(index, node);
        Ok(())
    }

    /// Every node except the root in depth-first pre-order.
    pub fn walk(&self) -> Vec<&TreeNode> {
        fn visit<'a>(node: &'a TreeNode, out: &mut Vec<&'a TreeNode>) {
            for child in &node.children {
                out.push(child);
                visit(child, out);
            }
        }
        let mut out = Vec::new();
        visit(&self.root, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: NoteId, parent_id: NoteId, pos: i64, depth: i64, title: &str) -> NoteRow {
        NoteRow {
            id,
            parent_id,
            pos,
            depth,
            title: title.to_string(),
            note: String::new(),
            line: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// root -> A(1) [A1(3), A2(4) [A2a(5)]], B(2)
    fn sample() -> OutlineTree {
        OutlineTree::load(&[
            row(1, 0, 0, 1, "A"),
            row(2, 0, 1, 1, "B"),
            row(3, 1, 0, 2, "A1"),
            row(4, 1, 1, 2, "A2"),
            row(5, 4, 0, 3, "A2a"),
        ])
        .unwrap()
    }

    #[test]
    fn test_load_builds_shape() {
        let tree = sample();
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.root().direct_child_ids(), vec![1, 2]);
        assert_eq!(tree.find(1).unwrap().direct_child_ids(), vec![3, 4]);
        assert_eq!(tree.find(5).unwrap().title(), "A2a");
        assert_eq!(tree.parent_of(5), Some(4));
    }

    #[test]
    fn test_load_missing_parent_is_integrity_error() {
        let result = OutlineTree::load(&[row(1, 0, 0, 1, "A"), row(2, 9, 0, 2, "orphan")]);
        assert!(matches!(result, Err(MemoError::Integrity(_))));
    }

    #[test]
    fn test_load_duplicate_id_is_integrity_error() {
        let result = OutlineTree::load(&[row(1, 0, 0, 1, "A"), row(1, 0, 1, 1, "again")]);
        assert!(matches!(result, Err(MemoError::Integrity(_))));
    }

    #[test]
    fn test_find_absent_returns_none() {
        assert!(sample().find(42).is_none());
    }

    #[test]
    fn test_child_ids_pre_order() {
        let tree = sample();
        assert_eq!(tree.child_ids(1).unwrap(), vec![3, 4, 5]);
        assert_eq!(tree.child_ids(ROOT_ID).unwrap(), vec![1, 3, 4, 5, 2]);
        assert!(tree.child_ids(2).unwrap().is_empty());
    }

    #[test]
    fn test_depth_walks_ancestors() {
        let tree = sample();
        assert_eq!(tree.depth(ROOT_ID), Some(0));
        assert_eq!(tree.depth(2), Some(1));
        assert_eq!(tree.depth(5), Some(3));
        assert_eq!(tree.depth(42), None);
        assert_eq!(tree.ancestors(5), vec![4, 1]);
    }

    #[test]
    fn test_insert_child_clamps_index() {
        let mut tree = sample();
        tree.insert_child(2, 10, 6, "B1").unwrap();
        tree.insert_child(2, 0, 7, "B0").unwrap();
        assert_eq!(tree.find(2).unwrap().direct_child_ids(), vec![7, 6]);
        assert_eq!(tree.depth(6), Some(2));
    }

    #[test]
    fn test_insert_child_rejects_existing_id() {
        let mut tree = sample();
        assert!(tree.insert_child(2, 0, 3, "dup").is_err());
        assert!(tree.insert_child(99, 0, 8, "nowhere").is_err());
    }

    #[test]
    fn test_remove_subtree_discards_descendants() {
        let mut tree = sample();
        let removed = tree.remove_subtree(4).unwrap();
        assert_eq!(removed.child_ids(), vec![5]);
        assert!(tree.find(5).is_none());
        assert_eq!(tree.find(1).unwrap().direct_child_ids(), vec![3]);
        assert!(tree.remove_subtree(ROOT_ID).is_err());
    }

    #[test]
    fn test_move_sibling_final_index() {
        let mut tree = OutlineTree::load(&[
            row(1, 0, 0, 1, "A"),
            row(2, 0, 1, 1, "B"),
            row(3, 0, 2, 1, "C"),
        ])
        .unwrap();
        tree.move_sibling(ROOT_ID, 1, 2).unwrap();
        assert_eq!(tree.root().direct_child_ids(), vec![1, 3, 2]);
        tree.move_sibling(ROOT_ID, 2, 0).unwrap();
        assert_eq!(tree.root().direct_child_ids(), vec![2, 1, 3]);
        assert!(tree.move_sibling(ROOT_ID, 0, 3).is_err());
    }

    #[test]
    fn test_reparent_moves_subtree() {
        let mut tree = sample();
        tree.reparent(4, 2, 0).unwrap();
        assert_eq!(tree.find(2).unwrap().direct_child_ids(), vec![4]);
        assert_eq!(tree.find(1).unwrap().direct_child_ids(), vec![3]);
        assert_eq!(tree.parent_of(4), Some(2));
        assert_eq!(tree.depth(5), Some(3));
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn test_reparent_rejects_cycles() {
        let mut tree = sample();
        let before = tree.clone();
        assert!(matches!(tree.reparent(1, 5, 0), Err(MemoError::InvalidMove(_))));
        assert!(matches!(tree.reparent(1, 1, 0), Err(MemoError::InvalidMove(_))));
        assert!(matches!(tree.reparent(ROOT_ID, 2, 0), Err(MemoError::InvalidMove(_))));
        assert_eq!(tree, before);
    }

    #[test]
    fn test_walk_matches_rows_round_trip() {
        let tree = sample();
        let titles: Vec<&str> = tree.walk().iter().map(|n| n.title()).collect();
        assert_eq!(titles, vec!["A", "A1", "A2", "A2a", "B"]);
    }
}
