//! Path snapshots and the change sets between them

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Relative path (forward slashes) -> file metadata
pub type PathMap = BTreeMap<String, PathInfo>;

/// One file at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathInfo {
    /// Digest of the relative path; names the blob file in revision folders
    pub namehash: String,
    /// File size in bytes, `None` once the file is deleted
    pub size: Option<u64>,
    /// Modification time in milliseconds since the epoch
    pub mtime: i64,
    /// Content digest
    pub hash: String,
}

impl PathInfo {
    pub fn is_deleted(&self) -> bool {
        self.size.is_none()
    }

    /// Copy of this entry marked as deleted
    pub fn deleted(&self) -> Self {
        Self {
            size: None,
            ..self.clone()
        }
    }

    /// True if size, mtime and hash all agree
    pub fn same_state(&self, other: &PathInfo) -> bool {
        self.size == other.size && self.mtime == other.mtime && self.hash == other.hash
    }
}

/// Transition between two path snapshots.
///
/// A path appears in at most one of the three maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub additions: PathMap,
    pub deletions: PathMap,
    pub modifications: PathMap,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty() && self.modifications.is_empty()
    }

    /// Total number of changed paths
    pub fn len(&self) -> usize {
        self.additions.len() + self.deletions.len() + self.modifications.len()
    }

    /// Check that no path is recorded in more than one category
    pub fn is_disjoint(&self) -> bool {
        let overlaps = |a: &PathMap, b: &PathMap| a.keys().any(|k| b.contains_key(k));
        !overlaps(&self.additions, &self.deletions)
            && !overlaps(&self.additions, &self.modifications)
            && !overlaps(&self.deletions, &self.modifications)
    }

    /// Short `+A/-D/~M` summary
    pub fn summary(&self) -> String {
        format!(
            "+{}/-{}/~{}",
            self.additions.len(),
            self.deletions.len(),
            self.modifications.len()
        )
    }

    /// Delta document persisted for a revision: additions and
    /// modifications as-is, deletions marked with `size = None`
    pub fn to_delta(&self) -> PathMap {
        let mut delta = self.additions.clone();
        delta.extend(self.modifications.clone());
        delta.extend(self.deletions.iter().map(|(path, info)| (path.clone(), info.deleted())));
        delta
    }
}

/// Compute the transition from `last` to the entries of `diff`.
///
/// Paths of `last` missing from `diff` are unchanged; a deletion is only
/// an explicit `size = None` entry in `diff` for a path not already
/// marked deleted in `last`.
pub fn diff_path_sets(last: &PathMap, diff: &PathMap) -> ChangeSet {
    let mut changes = ChangeSet::default();
    for (path, info) in diff {
        match last.get(path) {
            Some(old) if info.is_deleted() && old.is_deleted() => {}
            _ if info.is_deleted() => {
                changes.deletions.insert(path.clone(), info.clone());
            }
            None => {
                changes.additions.insert(path.clone(), info.clone());
            }
            Some(old) if old.is_deleted() => {
                changes.additions.insert(path.clone(), info.clone());
            }
            Some(old) if !old.same_state(info) => {
                changes.modifications.insert(path.clone(), info.clone());
            }
            Some(_) => {}
        }
    }
    debug_assert!(changes.is_disjoint());
    changes
}

/// Apply a change set to `paths`.
///
/// Deletion markers from the previous step are purged first, then the new
/// deletions are recorded as markers and additions/modifications applied.
pub fn integrate_changeset(paths: &mut PathMap, changes: &ChangeSet) {
    paths.retain(|_, info| !info.is_deleted());
    for (path, info) in &changes.deletions {
        paths.insert(path.clone(), info.deleted());
    }
    paths.extend(changes.additions.clone());
    paths.extend(changes.modifications.clone());
}
