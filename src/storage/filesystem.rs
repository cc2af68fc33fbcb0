use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

/// Name of the metadata folder below the repository root
pub const METADATA_FOLDER: &str = ".sos";

/// Name of the JSON document inside every metadata folder level
pub const METADATA_FILE: &str = ".meta";

/// On-disk layout of the metadata folder:
///
/// - `.sos/.meta` flags and branches
/// - `.sos/b<N>/.meta` commits of branch N
/// - `.sos/b<N>/r<R>/.meta` path delta of revision R
/// - `.sos/b<N>/r<R>/<namehash>` blobs added or modified in revision R
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    base_path: PathBuf,
}

impl FilesystemStorage {
    /// Storage for the repository rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        FilesystemStorage {
            base_path: root.as_ref().join(METADATA_FOLDER),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn exists(&self) -> bool {
        self.base_path.is_dir()
    }

    pub fn branches_path(&self) -> PathBuf {
        self.base_path.join(METADATA_FILE)
    }

    pub fn branch_dir(&self, branch: u32) -> PathBuf {
        self.base_path.join(format!("b{}", branch))
    }

    pub fn branch_path(&self, branch: u32) -> PathBuf {
        self.branch_dir(branch).join(METADATA_FILE)
    }

    pub fn revision_dir(&self, branch: u32, revision: u32) -> PathBuf {
        self.branch_dir(branch).join(format!("r{}", revision))
    }

    pub fn revision_path(&self, branch: u32, revision: u32) -> PathBuf {
        self.revision_dir(branch, revision).join(METADATA_FILE)
    }

    pub fn blob_path(&self, branch: u32, revision: u32, namehash: &str) -> PathBuf {
        self.revision_dir(branch, revision).join(namehash)
    }

    /// Create the folder of a revision (and its branch)
    pub fn create_revision_dir(&self, branch: u32, revision: u32) -> Result<PathBuf> {
        let dir = self.revision_dir(branch, revision);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create revision folder {:?}", dir))?;
        Ok(dir)
    }

    /// Read and parse a JSON document
    pub fn read_document<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
    }

    /// Atomically write a JSON document (temp file + rename)
    pub fn write_document<T: Serialize>(&self, path: &Path, document: &T) -> Result<()> {
        let parent = path
            .parent()
            .with_context(|| format!("Document path has no parent: {:?}", path))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create folder {:?}", parent))?;

        // 1. Write to temp file next to the target
        let json = serde_json::to_string_pretty(document).context("Failed to serialize document")?;
        let mut temp = NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {:?}", parent))?;
        temp.write_all(json.as_bytes())?;

        // 2. Atomic rename (atomic on POSIX systems)
        temp.persist(path)
            .with_context(|| format!("Failed to replace {:?}", path))?;

        Ok(())
    }

    /// Delete everything stored for a branch
    pub fn remove_branch_dir(&self, branch: u32) -> Result<()> {
        let dir = self.branch_dir(branch);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove branch folder {:?}", dir))?;
        }
        Ok(())
    }

    /// Delete a revision folder, e.g. after a failed commit
    pub fn remove_revision_dir(&self, branch: u32, revision: u32) -> Result<()> {
        let dir = self.revision_dir(branch, revision);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove revision folder {:?}", dir))?;
        }
        Ok(())
    }

    /// Delete the whole metadata folder
    pub fn destroy(&self) -> Result<()> {
        fs::remove_dir_all(&self.base_path)
            .with_context(|| format!("Failed to remove {:?}", self.base_path))
    }
}
