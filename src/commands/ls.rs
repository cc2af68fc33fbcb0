use std::{fs, path::Path};

use anyhow::{Context, Result};

use crate::{
    commands::{relative_dir, require_offline},
    storage::{Metadata, WalkFilters},
};

/// State of a file shown by `sos ls`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Known and unchanged since the last commit
    Tracked,
    /// Skipped by the ignore globs
    Ignored,
    /// Known and modified under the repository's modification policy
    Changed,
    /// Not known to the current branch
    New,
}

impl FileState {
    fn label(&self) -> &'static str {
        match self {
            FileState::Tracked => "tracked",
            FileState::Ignored => "ignored",
            FileState::Changed => "changed",
            FileState::New => "new",
        }
    }
}

/// List the files of `cwd` with their state against the latest commit
pub fn handle(m: &mut Metadata, cwd: &Path) -> Result<Vec<(String, FileState)>> {
    require_offline(m)?;
    let branch = m.current_branch()?;
    let latest = m.latest_revision(branch)?;
    m.compute_sequential_path_set(branch, latest)?;
    let filters = WalkFilters::from_config(&m.config)?;
    let dir = relative_dir(&m.root, cwd)?;

    let mut names = Vec::new();
    for entry in fs::read_dir(cwd).with_context(|| format!("Failed to list {:?}", cwd))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let mut listing = Vec::with_capacity(names.len());
    for name in names {
        let relpath = if dir.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", dir, name)
        };
        let state = if !filters.keep_file(&name) {
            FileState::Ignored
        } else {
            match m.paths.get(&relpath).filter(|info| !info.is_deleted()) {
                None => FileState::New,
                Some(_) if m.is_modified(&relpath)? => FileState::Changed,
                Some(_) => FileState::Tracked,
            }
        };
        m.printer().line(&format!("{:>8}  {}", state.label(), name));
        listing.push((name, state));
    }
    Ok(listing)
}
