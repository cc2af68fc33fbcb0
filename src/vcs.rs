//! Forwarding of commands to the real version control system

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result};

use crate::error::usage;

/// Markers of supported version control checkouts and their executables
const VCS_MARKERS: &[(&str, &str)] = &[
    (".svn", "svn"),
    (".git", "git"),
    (".hg", "hg"),
    (".bzr", "bzr"),
    (".fslckout", "fossil"),
    ("_FOSSIL_", "fossil"),
];

/// Runs a command line of the underlying VCS
pub trait CommandSink {
    /// Run `args` and return the exit status
    fn run(&self, args: &[String]) -> Result<i32>;
}

/// A detected checkout of a real VCS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsCommand {
    pub executable: String,
    /// Folder holding the checkout marker
    pub root: PathBuf,
}

impl CommandSink for VcsCommand {
    fn run(&self, args: &[String]) -> Result<i32> {
        tracing::debug!("Forwarding {:?} to {} checkout at {:?}", args, self.executable, self.root);
        // stdin, stdout and stderr are inherited
        let status = Command::new(&self.executable)
            .args(args)
            .status()
            .with_context(|| format!("Failed to execute {}", self.executable))?;
        Ok(status.code().unwrap_or(1))
    }
}

/// Find the closest checkout marker at or above `start`
pub fn detect_vcs(start: &Path) -> Option<VcsCommand> {
    start.ancestors().find_map(|dir| {
        VCS_MARKERS
            .iter()
            .find(|(marker, _)| dir.join(marker).exists())
            .map(|(_, executable)| VcsCommand {
                executable: executable.to_string(),
                root: dir.to_path_buf(),
            })
    })
}

/// Forward `args` to the VCS found above `cwd`
pub fn forward(cwd: &Path, args: &[String]) -> Result<i32> {
    let vcs = detect_vcs(cwd).ok_or_else(|| {
        usage("Not in an offline repository and no version control system detected")
    })?;
    vcs.run(args)
}
