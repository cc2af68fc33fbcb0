//! Branch, commit and path bookkeeping for one repository
//!
//! A `Metadata` is built per command, loads what it needs from `.sos`,
//! and is dropped at the end of the command.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    rc::Rc,
    time::{Duration, UNIX_EPOCH},
};

use anyhow::{Context, Result};

use super::{
    changes::{FindChanges, ModificationPolicy},
    hashing::copy_blob,
    integrate_changeset, BranchInfo, BranchesDocument, CommitInfo, FilesystemStorage, PathInfo,
    PathMap, RepoFlags,
};
use crate::{
    config::SosConfig,
    error::{corruption, usage},
    printer::Printer,
    storage::diff_path_sets,
};

/// Current time in milliseconds since the epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct Metadata {
    /// Repository root (the folder containing `.sos`)
    pub root: PathBuf,
    pub(super) storage: FilesystemStorage,
    pub config: SosConfig,
    pub(super) printer: Rc<dyn Printer>,
    /// Current branch and repository modes
    pub flags: RepoFlags,
    pub branches: BTreeMap<u32, BranchInfo>,
    /// Commits of the most recently loaded branch
    pub commits: BTreeMap<u32, CommitInfo>,
    /// Path set as of the most recently computed revision
    pub paths: PathMap,
}

impl Metadata {
    /// Open the repository at `root`, loading branches if it is offline
    pub fn new<P: AsRef<Path>>(root: P, config: SosConfig, printer: Rc<dyn Printer>) -> Self {
        let root = root.as_ref().to_path_buf();
        let mut metadata = Metadata {
            storage: FilesystemStorage::new(&root),
            root,
            config,
            printer,
            flags: RepoFlags::default(),
            branches: BTreeMap::new(),
            commits: BTreeMap::new(),
            paths: PathMap::new(),
        };
        metadata.load_branches();
        metadata
    }

    pub fn storage(&self) -> &FilesystemStorage {
        &self.storage
    }

    pub fn printer(&self) -> &dyn Printer {
        self.printer.as_ref()
    }

    /// True once `offline` has created the metadata folder
    pub fn is_offline(&self) -> bool {
        self.storage.exists()
    }

    /// Current branch, failing if no branch exists yet
    pub fn current_branch(&self) -> Result<u32> {
        self.flags
            .branch
            .filter(|b| self.branches.contains_key(b))
            .ok_or_else(|| usage("No current branch. Run 'sos offline' first"))
    }

    /// Change detection policy selected by the repository flags and config
    pub fn modification_policy(&self) -> ModificationPolicy {
        if self.flags.strict {
            ModificationPolicy::VerifyContent
        } else if self.config.ignore_touched {
            ModificationPolicy::ContentAuthoritative
        } else {
            ModificationPolicy::MetadataOnly
        }
    }

    /// Load flags and branches. A missing or unreadable document leaves an
    /// empty branch set.
    pub fn load_branches(&mut self) {
        self.flags = RepoFlags::default();
        self.branches.clear();

        let path = self.storage.branches_path();
        if !path.exists() {
            tracing::debug!("No branches document at {:?}", path);
            return;
        }

        match self.storage.read_document::<BranchesDocument>(&path) {
            Ok((flags, branches)) => {
                self.flags = flags;
                self.branches = branches.into_iter().map(|b| (b.number, b)).collect();
            }
            Err(e) => {
                tracing::warn!("Failed to load branches: {:#}", e);
                self.printer
                    .warn("Couldn't read branches metadata, starting with an empty branch set");
            }
        }
    }

    pub fn save_branches(&self) -> Result<()> {
        let document: BranchesDocument = (self.flags.clone(), self.branches.values().cloned().collect());
        self.storage
            .write_document(&self.storage.branches_path(), &document)
            .context("Failed to save branches")
    }

    /// Load the commit list of `branch` into `self.commits`
    pub fn load_branch(&mut self, branch: u32) -> Result<()> {
        let commits: Vec<CommitInfo> = self
            .storage
            .read_document(&self.storage.branch_path(branch))
            .with_context(|| format!("Failed to load commits of branch {}", branch))?;
        self.commits = commits.into_iter().map(|c| (c.number, c)).collect();
        Ok(())
    }

    pub fn save_branch(&self, branch: u32) -> Result<()> {
        let commits: Vec<&CommitInfo> = self.commits.values().collect();
        self.storage
            .write_document(&self.storage.branch_path(branch), &commits)
            .with_context(|| format!("Failed to save commits of branch {}", branch))
    }

    /// Load the path delta stored for one revision
    pub fn load_commit(&self, branch: u32, revision: u32) -> Result<PathMap> {
        self.storage
            .read_document(&self.storage.revision_path(branch, revision))
            .with_context(|| format!("Failed to load revision {}/{}", branch, revision))
    }

    /// Store `self.paths` as the delta of a revision
    pub fn save_commit(&self, branch: u32, revision: u32) -> Result<()> {
        self.storage.create_revision_dir(branch, revision)?;
        self.storage
            .write_document(&self.storage.revision_path(branch, revision), &self.paths)
            .with_context(|| format!("Failed to save revision {}/{}", branch, revision))
    }

    /// Highest revision of `branch`, read from its commit list
    pub fn latest_revision(&self, branch: u32) -> Result<u32> {
        let commits: Vec<CommitInfo> = self
            .storage
            .read_document(&self.storage.branch_path(branch))
            .with_context(|| format!("Failed to load commits of branch {}", branch))?;
        commits
            .iter()
            .map(|c| c.number)
            .max()
            .ok_or_else(|| corruption(format!("branch {} has no revisions", branch)))
    }

    /// Rebuild `self.paths` for `branch` as of `revision` by replaying every
    /// revision delta from 0 forward.
    pub fn compute_sequential_path_set(&mut self, branch: u32, revision: u32) -> Result<()> {
        self.paths = self.load_commit(branch, 0)?;
        for rev in 1..=revision {
            let delta = self.load_commit(branch, rev)?;
            let changes = diff_path_sets(&self.paths, &delta);
            if !changes.is_disjoint() {
                return Err(corruption(format!(
                    "overlapping change categories in revision {}/{}",
                    branch, rev
                )));
            }
            integrate_changeset(&mut self.paths, &changes);
        }
        tracing::debug!(
            "Replayed {} revision(s) of branch {}: {} path(s)",
            revision + 1,
            branch,
            self.paths.len()
        );
        Ok(())
    }

    /// Find the revision at or below `revision` that physically holds a blob.
    ///
    /// Blobs are only stored where a file was added or modified, so this
    /// walks backwards; running below revision 0 means the store is damaged.
    pub fn locate_physical_blob(
        &self,
        branch: u32,
        revision: u32,
        namehash: &str,
    ) -> Result<(u32, PathBuf)> {
        let mut current = revision;
        loop {
            let path = self.storage.blob_path(branch, current, namehash);
            if path.exists() {
                return Ok((current, path));
            }
            if current == 0 {
                return Err(corruption(format!(
                    "blob {} of branch {} not found at or below revision {}",
                    namehash, branch, revision
                )));
            }
            current -= 1;
        }
    }

    /// Copy the blob of `info` as of `branch/revision` into another revision folder
    pub fn copy_versioned_file(
        &self,
        branch: u32,
        revision: u32,
        to_branch: u32,
        to_revision: u32,
        info: &PathInfo,
    ) -> Result<()> {
        let target = self.storage.blob_path(to_branch, to_revision, &info.namehash);
        if info.size == Some(0) {
            File::create(&target)
                .with_context(|| format!("Failed to create blob file: {:?}", target))?;
            return Ok(());
        }
        let (_, source) = self.locate_physical_blob(branch, revision, &info.namehash)?;
        fs::copy(&source, &target)
            .with_context(|| format!("Failed to copy blob {:?} to {:?}", source, target))?;
        Ok(())
    }

    /// Read the content of `info` as of `branch/revision`.
    ///
    /// With `to` the content is streamed into that file and `None` returned;
    /// otherwise the content is returned in memory.
    pub fn read_or_copy_versioned_file(
        &self,
        branch: u32,
        revision: u32,
        info: &PathInfo,
        to: Option<&Path>,
    ) -> Result<Option<Vec<u8>>> {
        if info.size == Some(0) {
            return match to {
                Some(target) => {
                    File::create(target)
                        .with_context(|| format!("Failed to create {:?}", target))?;
                    Ok(None)
                }
                None => Ok(Some(Vec::new())),
            };
        }

        let (_, source) = self.locate_physical_blob(branch, revision, &info.namehash)?;
        match to {
            Some(target) => {
                let file = File::create(target)
                    .with_context(|| format!("Failed to create {:?}", target))?;
                let mut writer = BufWriter::new(file);
                copy_blob(&source, self.flags.compress, &mut writer)?;
                std::io::Write::flush(&mut writer)
                    .with_context(|| format!("Failed to write {:?}", target))?;
                Ok(None)
            }
            None => {
                let mut content = Vec::new();
                copy_blob(&source, self.flags.compress, &mut content)?;
                Ok(Some(content))
            }
        }
    }

    /// Write the stored version of `relpath` into the working tree and
    /// restore its recorded mtime
    pub fn restore_file(
        &self,
        relpath: &str,
        branch: u32,
        revision: u32,
        info: &PathInfo,
    ) -> Result<()> {
        let target = self.root.join(relpath);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create folder {:?}", parent))?;
        }
        self.read_or_copy_versioned_file(branch, revision, info, Some(&target))?;

        let mtime = UNIX_EPOCH + Duration::from_millis(info.mtime.max(0) as u64);
        File::options()
            .write(true)
            .open(&target)
            .and_then(|f| f.set_modified(mtime))
            .with_context(|| format!("Failed to set modification time of {:?}", target))?;
        Ok(())
    }

    /// Seed revision 0 of `to_branch` with every live file of `branch/revision`
    fn copy_branch_state(&mut self, branch: u32, revision: u32, to_branch: u32) -> Result<()> {
        self.compute_sequential_path_set(branch, revision)?;
        self.paths.retain(|_, info| !info.is_deleted());
        self.storage.create_revision_dir(to_branch, 0)?;
        for info in self.paths.values() {
            self.copy_versioned_file(branch, revision, to_branch, 0, info)?;
        }
        Ok(())
    }

    /// Write revision 0 of a new branch from `self.paths` and register it
    fn register_branch(
        &mut self,
        branch: u32,
        name: Option<String>,
        message: String,
        insync: bool,
        tracked: Vec<String>,
    ) -> Result<()> {
        let now = now_millis();
        self.save_commit(branch, 0)?;
        self.commits = BTreeMap::from([(
            0,
            CommitInfo {
                number: 0,
                ctime: now,
                message: Some(message),
            },
        )]);
        self.save_branch(branch)?;
        self.branches.insert(
            branch,
            BranchInfo {
                number: branch,
                ctime: now,
                name,
                insync,
                tracked,
            },
        );
        self.flags.branch = Some(branch);
        tracing::info!("Created branch {} with {} file(s)", branch, self.paths.len());
        Ok(())
    }

    /// Create `branch` from the latest committed state of the current branch
    pub fn duplicate_branch(&mut self, branch: u32, name: Option<String>) -> Result<()> {
        let current = self.current_branch()?;
        let source = self.branches[&current].clone();
        let revision = self.latest_revision(current)?;

        self.copy_branch_state(current, revision, branch)?;
        let message = format!("Branched from {}", source.label());
        self.register_branch(branch, name, message, source.insync, source.tracked)
    }

    /// Create `branch` at revision 0.
    ///
    /// Simple mode commits the whole working tree; track and picky modes copy
    /// the current branch's latest state.
    pub fn create_branch(
        &mut self,
        branch: u32,
        name: Option<String>,
        message: String,
    ) -> Result<()> {
        let previous = self.flags.branch.filter(|b| self.branches.contains_key(b));
        let tracked = previous
            .map(|p| self.branches[&p].tracked.clone())
            .unwrap_or_default();
        let insync = self.branches.is_empty();

        if !self.flags.is_tracking() {
            self.paths.clear();
            let options = FindChanges {
                write_to: Some((branch, 0)),
                progress: true,
                ..FindChanges::default()
            };
            let changes = self.find_changes(&options).inspect_err(|_| {
                let _ = self.storage.remove_branch_dir(branch);
            })?;
            self.paths = changes.additions;
        } else if let Some(previous) = previous {
            let revision = self.latest_revision(previous)?;
            self.copy_branch_state(previous, revision, branch)?;
        } else {
            self.paths.clear();
            self.storage.create_revision_dir(branch, 0)?;
        }

        self.register_branch(branch, name, message, insync, tracked)
    }

    /// Delete all storage of `branch`. Removing the current branch makes the
    /// highest remaining branch current.
    pub fn remove_branch(&mut self, branch: u32) -> Result<()> {
        if !self.branches.contains_key(&branch) {
            return Err(usage(format!("Unknown branch {}", branch)));
        }
        if self.branches.len() == 1 {
            return Err(usage("Cannot remove the only branch"));
        }

        self.storage.remove_branch_dir(branch)?;
        self.branches.remove(&branch);
        if self.flags.branch == Some(branch) {
            self.flags.branch = self.branches.keys().max().copied();
        }
        self.save_branches()?;
        tracing::info!("Removed branch {}", branch);
        Ok(())
    }

    /// Tracked patterns of `branch` (default: current); empty in simple mode
    pub fn tracking_patterns(&self, branch: Option<u32>) -> BTreeSet<String> {
        if !self.flags.is_tracking() {
            return BTreeSet::new();
        }
        branch
            .or(self.flags.branch)
            .and_then(|b| self.branches.get(&b))
            .map(|b| b.tracked.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Scope for change detection: `None` in simple mode
    pub fn consider_only(&self, branch: Option<u32>) -> Option<BTreeSet<String>> {
        self.flags
            .is_tracking()
            .then(|| self.tracking_patterns(branch))
    }

    /// Look up a branch by name or number
    pub fn branch_by_name(&self, name: &str) -> Option<u32> {
        if let Some(found) = self
            .branches
            .values()
            .find(|b| b.name.as_deref() == Some(name))
        {
            return Some(found.number);
        }
        name.parse::<u32>()
            .ok()
            .filter(|n| self.branches.contains_key(n))
    }

    /// Parse `[branch][/revision]`; defaults are the current branch and its
    /// latest revision, negative revisions count back from the latest
    pub fn parse_revision_string(&self, argument: Option<&str>) -> Result<(u32, u32)> {
        let argument = argument.unwrap_or("").trim();
        let (branch_part, revision_part) = match argument.split_once('/') {
            Some((b, r)) => (b, r),
            None => (argument, ""),
        };

        let branch = if branch_part.is_empty() {
            self.current_branch()?
        } else {
            self.branch_by_name(branch_part)
                .ok_or_else(|| usage(format!("Unknown branch '{}'", branch_part)))?
        };

        let latest = self.latest_revision(branch)?;
        if revision_part.is_empty() {
            return Ok((branch, latest));
        }

        let requested: i64 = revision_part
            .parse()
            .map_err(|_| usage(format!("Cannot parse revision '{}'", revision_part)))?;
        let resolved = if requested < 0 {
            latest as i64 + 1 + requested
        } else {
            requested
        };
        if resolved < 0 || resolved > latest as i64 {
            return Err(usage(format!(
                "Unknown revision {} of branch {} (latest is {})",
                revision_part, branch, latest
            )));
        }
        Ok((branch, resolved as u32))
    }
}
