//! Change detection between the in-memory path set and the working tree

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
    time::UNIX_EPOCH,
};

use anyhow::{Context, Result};
use glob::Pattern;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::{
    filesystem::METADATA_FOLDER,
    hashing::{hash_file, hash_path},
    ChangeSet, Metadata, PathInfo,
};
use crate::config::SosConfig;

/// How a file whose path is already known is judged modified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModificationPolicy {
    /// Size or mtime differ
    #[default]
    MetadataOnly,
    /// Size or mtime differ, or the content hash differs
    VerifyContent,
    /// Size differs, or the mtime differs and the content hash confirms it
    ContentAuthoritative,
}

/// Options of [`Metadata::find_changes`]
#[derive(Debug, Clone, Default)]
pub struct FindChanges {
    /// Store added and modified files as blobs of this `(branch, revision)`
    pub write_to: Option<(u32, u32)>,
    pub policy: ModificationPolicy,
    /// Record the known (stored) state for modifications instead of the live one
    pub inverse: bool,
    /// Only consider files matching these directory-scoped globs
    pub consider_only: Option<BTreeSet<String>>,
    /// Show a spinner on stderr
    pub progress: bool,
}

/// Ignore filters of the working tree walk
pub struct WalkFilters {
    ignores: Vec<Pattern>,
    ignore_dirs: Vec<Pattern>,
    ignores_whitelist: Vec<Pattern>,
    ignore_dirs_whitelist: Vec<Pattern>,
}

impl WalkFilters {
    pub fn from_config(config: &SosConfig) -> Result<Self> {
        Ok(Self {
            ignores: compile_globs(&config.ignores)?,
            ignore_dirs: compile_globs(&config.ignore_dirs)?,
            ignores_whitelist: compile_globs(&config.ignores_whitelist)?,
            ignore_dirs_whitelist: compile_globs(&config.ignore_dirs_whitelist)?,
        })
    }

    /// False if the directory name is ignored and not whitelisted
    pub fn keep_dir(&self, name: &str) -> bool {
        !matches_any(&self.ignore_dirs, name) || matches_any(&self.ignore_dirs_whitelist, name)
    }

    /// False if the file name is ignored and not whitelisted
    pub fn keep_file(&self, name: &str) -> bool {
        !matches_any(&self.ignores, name) || matches_any(&self.ignores_whitelist, name)
    }
}

pub fn compile_globs(globs: &[String]) -> Result<Vec<Pattern>> {
    globs
        .iter()
        .map(|g| Pattern::new(g).with_context(|| format!("Invalid glob pattern: {}", g)))
        .collect()
}

pub fn matches_any(patterns: &[Pattern], name: &str) -> bool {
    patterns.iter().any(|p| p.matches(name))
}

/// Tracking patterns split into directory and file name glob.
///
/// A pattern only applies to files directly inside its directory.
pub struct TrackingPatterns {
    patterns: Vec<(String, Pattern)>,
}

impl TrackingPatterns {
    pub fn new<'a>(patterns: impl IntoIterator<Item = &'a String>) -> Result<Self> {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let (dir, file) = split_path(p.trim_start_matches("./"));
                let glob = Pattern::new(file)
                    .with_context(|| format!("Invalid tracking pattern: {}", p))?;
                Ok((dir.to_string(), glob))
            })
            .collect::<Result<_>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, dir: &str, name: &str) -> bool {
        self.patterns
            .iter()
            .any(|(d, glob)| d == dir && glob.matches(name))
    }

    pub fn matches_path(&self, relpath: &str) -> bool {
        let (dir, name) = split_path(relpath);
        self.matches(dir, name)
    }
}

/// Split `a/b/c` into (`a/b`, `c`); top-level entries have an empty directory
pub fn split_path(relpath: &str) -> (&str, &str) {
    match relpath.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", relpath),
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Modification time in milliseconds since the epoch
pub fn mtime_millis(metadata: &fs::Metadata) -> Result<i64> {
    let modified = metadata
        .modified()
        .context("File system does not report modification times")?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    })
}

/// Spinner drawn at most ten times per second
struct WalkProgress(Option<ProgressBar>);

impl WalkProgress {
    fn new(enabled: bool) -> Self {
        if !enabled {
            return Self(None);
        }
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr_with_hz(10));
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner} {pos} file(s) {msg}")
                .expect("Failed to create progress template"),
        );
        Self(Some(bar))
    }

    fn directory(&self, dir: &str) {
        if let Some(ref bar) = self.0 {
            bar.set_message(dir.to_string());
            bar.tick();
        }
    }

    fn files(&self, count: usize) {
        if let Some(ref bar) = self.0 {
            bar.inc(count as u64);
        }
    }

    fn finish(&self) {
        if let Some(ref bar) = self.0 {
            bar.finish_and_clear();
        }
    }
}

impl Metadata {
    /// Compare `self.paths` with the working tree.
    ///
    /// In write mode (`write_to`) every added or modified file is streamed
    /// into the revision folder while it is hashed.
    pub fn find_changes(&mut self, options: &FindChanges) -> Result<ChangeSet> {
        let filters = WalkFilters::from_config(&self.config)?;
        let scope = match &options.consider_only {
            Some(patterns) => Some(TrackingPatterns::new(patterns)?),
            None => None,
        };
        if let Some((branch, revision)) = options.write_to {
            self.storage.create_revision_dir(branch, revision)?;
        }

        // live known paths grouped by directory
        let mut known: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (path, info) in &self.paths {
            if !info.is_deleted() {
                let (dir, _) = split_path(path);
                known.entry(dir.to_string()).or_default().push(path.clone());
            }
        }

        let progress = WalkProgress::new(options.progress);
        let mut changes = ChangeSet::default();
        let mut pending = vec![String::new()];

        while let Some(rel_dir) = pending.pop() {
            progress.directory(&rel_dir);
            let abs_dir = self.root.join(&rel_dir);

            let mut dirs = Vec::new();
            let mut files = Vec::new();
            let entries =
                fs::read_dir(&abs_dir).with_context(|| format!("Failed to list {:?}", abs_dir))?;
            for entry in entries {
                let entry = entry.with_context(|| format!("Failed to list {:?}", abs_dir))?;
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(raw) => {
                        tracing::warn!("Skipping non UTF-8 file name {:?} in {:?}", raw, abs_dir);
                        continue;
                    }
                };
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    if rel_dir.is_empty() && name == METADATA_FOLDER {
                        continue;
                    }
                    if filters.keep_dir(&name) {
                        dirs.push(name);
                    }
                } else if file_type.is_file() && filters.keep_file(&name) {
                    files.push(name);
                }
            }
            dirs.sort();
            files.sort();

            for dir in dirs.iter().rev() {
                pending.push(join_path(&rel_dir, dir));
            }

            let considered: Vec<&String> = files
                .iter()
                .filter(|name| scope.as_ref().map_or(true, |s| s.matches(&rel_dir, name)))
                .collect();
            for name in &considered {
                let relpath = join_path(&rel_dir, name);
                self.compare_file(&relpath, options, &mut changes)?;
            }
            progress.files(considered.len());

            // known files no longer present in this directory
            if let Some(paths) = known.remove(&rel_dir) {
                for path in paths {
                    let (_, name) = split_path(&path);
                    if files.iter().any(|f| f == name) {
                        continue;
                    }
                    if scope.as_ref().map_or(true, |s| s.matches_path(&path)) {
                        changes.deletions.insert(path.clone(), self.paths[&path].clone());
                    }
                }
            }
        }

        // directories that vanished or are now ignored
        for path in known.into_values().flatten() {
            if scope.as_ref().map_or(true, |s| s.matches_path(&path)) {
                changes.deletions.insert(path.clone(), self.paths[&path].clone());
            }
        }
        progress.finish();

        debug_assert!(changes.is_disjoint());
        tracing::debug!("Found changes {}", changes.summary());
        Ok(changes)
    }

    /// Classify one live file against its known entry
    fn compare_file(
        &self,
        relpath: &str,
        options: &FindChanges,
        changes: &mut ChangeSet,
    ) -> Result<()> {
        let abs = self.root.join(relpath);
        let stat = fs::metadata(&abs).with_context(|| format!("Failed to stat {:?}", abs))?;
        let size = stat.len();
        let mtime = mtime_millis(&stat)?;
        let blob = options
            .write_to
            .map(|(branch, revision)| self.storage.blob_path(branch, revision, &hash_path(relpath)));

        let last = match self.paths.get(relpath) {
            Some(info) if !info.is_deleted() => info,
            previous => {
                let record = match previous {
                    Some(marker) if options.inverse => marker.clone(),
                    _ => self.live_info(relpath, &abs, size, mtime, blob.as_deref())?,
                };
                changes.additions.insert(relpath.to_string(), record);
                return Ok(());
            }
        };

        let (modified, live_hash) = judge_modified(last, &abs, size, mtime, options.policy)?;
        if !modified {
            return Ok(());
        }

        let record = if options.inverse {
            last.clone()
        } else {
            match (live_hash, blob.as_deref()) {
                (Some(hash), None) => PathInfo {
                    namehash: last.namehash.clone(),
                    size: Some(size),
                    mtime,
                    hash,
                },
                _ => self.live_info(relpath, &abs, size, mtime, blob.as_deref())?,
            }
        };
        changes.modifications.insert(relpath.to_string(), record);
        Ok(())
    }

    /// Whether the live file at `relpath` differs from its known entry under
    /// the repository's modification policy. Unknown or deleted paths count as modified.
    pub fn is_modified(&self, relpath: &str) -> Result<bool> {
        let last = match self.paths.get(relpath) {
            Some(info) if !info.is_deleted() => info,
            _ => return Ok(true),
        };
        let abs = self.root.join(relpath);
        let stat = fs::metadata(&abs).with_context(|| format!("Failed to stat {:?}", abs))?;
        let (modified, _) = judge_modified(
            last,
            &abs,
            stat.len(),
            mtime_millis(&stat)?,
            self.modification_policy(),
        )?;
        Ok(modified)
    }

    fn live_info(
        &self,
        relpath: &str,
        abs: &Path,
        size: u64,
        mtime: i64,
        blob: Option<&Path>,
    ) -> Result<PathInfo> {
        Ok(PathInfo {
            namehash: hash_path(relpath),
            size: Some(size),
            mtime,
            hash: hash_file(abs, self.flags.compress, blob)?,
        })
    }
}

/// Apply `policy` to a known entry and the live stat of `abs`.
/// Returns the verdict and the live hash if one was computed.
fn judge_modified(
    last: &PathInfo,
    abs: &Path,
    size: u64,
    mtime: i64,
    policy: ModificationPolicy,
) -> Result<(bool, Option<String>)> {
    let metadata_changed = last.size != Some(size) || last.mtime != mtime;
    let needs_hash = match policy {
        ModificationPolicy::MetadataOnly => false,
        ModificationPolicy::VerifyContent => !metadata_changed,
        ModificationPolicy::ContentAuthoritative => {
            last.size == Some(size) && last.mtime != mtime
        }
    };
    if !needs_hash {
        let modified = match policy {
            ModificationPolicy::ContentAuthoritative => last.size != Some(size),
            _ => metadata_changed,
        };
        return Ok((modified, None));
    }
    let hash = hash_file(abs, false, None)?;
    Ok((hash != last.hash, Some(hash)))
}
