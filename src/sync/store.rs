use super::policy::Resolution;
use crate::engine::FileInfo;
use std::collections::{HashMap, HashSet};

/// Sentinel key for nodes with no parent
const ROOT_KEY: &str = "__root__";

/// How a node differs between the two sides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    OnlySource,
    OnlyDest,
    /// Present on both sides (for files: with differing sizes)
    Conflict,
}

/// One node of the diff tree.
///
/// The id is derived from kind-of-entry plus path, so re-diffing the same
/// tree yields the same ids. Exactly one of `source`/`destination` absent
/// means "only on one side"; both present is a size conflict (or a directory
/// pair awaiting its children). Directory nodes never carry transfer bytes.
#[derive(Debug, Clone)]
pub struct FileDifference {
    pub id: String,
    pub parent_id: Option<String>,
    pub file_name: String,
    pub is_dir: bool,
    pub kind: DiffKind,
    /// None only for directories, whose fate is decided by their children
    pub resolution: Option<Resolution>,
    pub source: Option<FileInfo>,
    pub destination: Option<FileInfo>,
    pub transfer_bytes: u64,
}

impl FileDifference {
    /// Stable node id: entry kind tag + root-relative path
    pub fn make_id(is_dir: bool, relative_path: &str) -> String {
        format!("{}{}", if is_dir { "[D]" } else { "[F]" }, relative_path)
    }
}

/// Indexed, lazily-compacting store of diff nodes.
///
/// Insertion order is discovery order. Deletion tombstones the id instead of
/// splicing the backing list; once every entry is tombstoned the whole store
/// resets. Live count plus tombstone count always equals the backing list
/// length between resets.
#[derive(Default)]
pub struct DiffStore {
    list: Vec<FileDifference>,
    id_index: HashMap<String, usize>,
    child_index: HashMap<String, Vec<usize>>,
    deleted: HashSet<String>,
}

fn parent_key(parent_id: Option<&str>) -> &str {
    parent_id.unwrap_or(ROOT_KEY)
}

impl DiffStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, diff: FileDifference) {
        let index = self.list.len();
        self.id_index.insert(diff.id.clone(), index);
        self.child_index
            .entry(parent_key(diff.parent_id.as_deref()).to_string())
            .or_default()
            .push(index);
        self.list.push(diff);
    }

    #[allow(dead_code)] // Used in tests
    pub fn get(&self, id: &str) -> Option<&FileDifference> {
        if self.deleted.contains(id) {
            return None;
        }
        self.id_index.get(id).map(|&index| &self.list[index])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut FileDifference> {
        if self.deleted.contains(id) {
            return None;
        }
        match self.id_index.get(id) {
            Some(&index) => self.list.get_mut(index),
            None => None,
        }
    }

    /// Replace a live node wholesale, matched by id
    #[allow(dead_code)] // Used in tests
    pub fn update(&mut self, diff: FileDifference) {
        if let Some(node) = self.get_mut(&diff.id) {
            *node = diff;
        }
    }

    /// Apply `f` to every live node (bulk resolution rewrite)
    pub fn for_each_live_mut(&mut self, mut f: impl FnMut(&mut FileDifference)) {
        for node in &mut self.list {
            if !self.deleted.contains(&node.id) {
                f(node);
            }
        }
    }

    /// Live children of `parent_id` (None = root level), in discovery order
    pub fn children(&self, parent_id: Option<&str>) -> Vec<&FileDifference> {
        self.child_index
            .get(parent_key(parent_id))
            .map(|indices| {
                indices
                    .iter()
                    .map(|&index| &self.list[index])
                    .filter(|node| !self.deleted.contains(&node.id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Most recently added node that is still live
    pub fn last(&self) -> Option<&FileDifference> {
        self.list
            .iter()
            .rev()
            .find(|node| !self.deleted.contains(&node.id))
    }

    pub fn all(&self) -> impl Iterator<Item = &FileDifference> + '_ {
        self.list
            .iter()
            .filter(|node| !self.deleted.contains(&node.id))
    }

    /// Tombstone a node. When the last live node goes, the store resets.
    pub fn remove(&mut self, id: &str) {
        if !self.id_index.contains_key(id) {
            return;
        }
        self.deleted.insert(id.to_string());
        if self.deleted.len() == self.list.len() {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.list.clear();
        self.id_index.clear();
        self.child_index.clear();
        self.deleted.clear();
    }

    pub fn len(&self) -> usize {
        self.list.len() - self.deleted.len()
    }

    #[allow(dead_code)] // Used in tests
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn backing_len(&self) -> usize {
        self.list.len()
    }

    #[cfg(test)]
    pub(crate) fn tombstone_len(&self) -> usize {
        self.deleted.len()
    }
}
