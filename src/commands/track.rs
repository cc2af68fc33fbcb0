//! `sos add` and `sos rm`: tracking patterns of the current branch

use std::path::Path;

use anyhow::Result;
use glob::Pattern;

use crate::{
    commands::{relative_dir, require_offline},
    error::usage,
    storage::Metadata,
};

/// Pattern relative to the repository root for a pattern given in `cwd`
fn root_pattern(m: &Metadata, cwd: &Path, pattern: &str) -> Result<String> {
    if !m.flags.is_tracking() {
        return Err(usage(
            "Tracking patterns are only used in track or picky mode",
        ));
    }
    let dir = relative_dir(&m.root, cwd)?;
    let pattern = pattern.trim_start_matches("./");
    let full = if dir.is_empty() {
        pattern.to_string()
    } else {
        format!("{}/{}", dir, pattern)
    };
    Pattern::new(&full).map_err(|e| usage(format!("Invalid pattern '{}': {}", full, e)))?;
    Ok(full)
}

/// Track files matching `pattern` on the current branch
pub fn add(m: &mut Metadata, cwd: &Path, pattern: &str) -> Result<()> {
    require_offline(m)?;
    let full = root_pattern(m, cwd, pattern)?;
    let branch = m.current_branch()?;
    let info = &m.branches[&branch];
    if info.tracked.contains(&full) {
        return Err(usage(format!("Pattern '{}' is already tracked", full)));
    }
    let mut tracked = info.tracked.clone();
    tracked.push(full.clone());
    let info = info.with_tracked(tracked);
    m.branches.insert(branch, info);
    m.save_branches()?;
    m.printer().line(&format!("Tracking pattern '{}'", full));
    Ok(())
}

/// Stop tracking `pattern` on the current branch
pub fn rm(m: &mut Metadata, cwd: &Path, pattern: &str) -> Result<()> {
    require_offline(m)?;
    let full = root_pattern(m, cwd, pattern)?;
    let branch = m.current_branch()?;
    let info = &m.branches[&branch];
    if !info.tracked.contains(&full) {
        return Err(usage(format!("Pattern '{}' is not tracked", full)));
    }
    let tracked = info.tracked.iter().filter(|p| **p != full).cloned().collect();
    let info = info.with_tracked(tracked);
    m.branches.insert(branch, info);
    m.save_branches()?;
    m.printer().line(&format!("Untracked pattern '{}'", full));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::offline::{self, OfflineOptions};
    use crate::commands::test_support::{open, write};
    use crate::commands::{changes, commit};
    use tempfile::TempDir;

    fn track_mode(root: &Path) -> Result<()> {
        offline::handle(
            &mut open(root),
            OfflineOptions {
                track: true,
                ..OfflineOptions::default()
            },
        )
    }

    #[test]
    fn test_patterns_are_stored_relative_to_root() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        write(root, "src/lib.rs", b"lib");
        write(root, "src/notes.md", b"notes");
        write(root, "top.rs", b"top");
        track_mode(root)?;

        let mut m = open(root);
        add(&mut m, &root.join("src"), "*.rs")?;
        assert_eq!(m.branches[&0].tracked, vec!["src/*.rs"]);
        assert!(add(&mut m, root, "src/*.rs").is_err());

        let found = changes::handle(&mut open(root), None)?;
        assert_eq!(found.additions.keys().collect::<Vec<_>>(), vec!["src/lib.rs"]);

        commit::handle(&mut open(root), None)?;
        let mut m = open(root);
        rm(&mut m, root, "./src/*.rs")?;
        assert!(m.branches[&0].tracked.is_empty());
        assert!(rm(&mut m, root, "src/*.rs").is_err());
        Ok(())
    }

    #[test]
    fn test_patterns_rejected_in_simple_mode_and_when_invalid() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        crate::commands::test_support::offline(root)?;
        assert!(add(&mut open(root), root, "*.rs").is_err());

        let other = TempDir::new()?;
        track_mode(other.path())?;
        assert!(add(&mut open(other.path()), other.path(), "[").is_err());
        Ok(())
    }
}
