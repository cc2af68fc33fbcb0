mod changes;
mod filesystem;
pub mod hashing;
mod metadata;
mod paths;
mod state;

pub use changes::{compile_globs, matches_any, FindChanges, WalkFilters};
pub use filesystem::{FilesystemStorage, METADATA_FOLDER};
pub use metadata::{now_millis, Metadata};
pub use paths::{diff_path_sets, integrate_changeset, ChangeSet, PathInfo, PathMap};
pub use state::{BranchInfo, BranchesDocument, CommitInfo, RepoFlags};
