use std::{collections::BTreeSet, fs};

use anyhow::{Context, Result};

use crate::{
    commands::{require_offline, working_changes},
    merge::{merge, ConflictResolution, MergeOperation},
    storage::{Metadata, PathInfo},
    text::FileKinds,
};

/// Options of `sos update`
#[derive(Debug, Clone, Copy)]
pub struct UpdateOptions {
    /// Which file additions and removals to take over
    pub files: MergeOperation,
    /// Which line insertions and removals to take over inside text files
    pub lines: MergeOperation,
    pub resolution: ConflictResolution,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            files: MergeOperation::Both,
            lines: MergeOperation::Both,
            resolution: ConflictResolution::Ask,
        }
    }
}

/// What an update changed in the working tree
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub merged: Vec<String>,
}

impl UpdateSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.merged.is_empty()
    }
}

/// Decide a binary file both sides changed; true takes their version
fn take_theirs_binary(m: &Metadata, path: &str, resolution: ConflictResolution) -> Result<bool> {
    match resolution {
        ConflictResolution::Theirs => Ok(true),
        ConflictResolution::Mine => Ok(false),
        ConflictResolution::Next => {
            m.printer()
                .warn(&format!("Cannot merge binary file {}, taking their version", path));
            Ok(true)
        }
        ConflictResolution::Ask => loop {
            let answer = m
                .printer()
                .ask(&format!("Binary file {} differs. Keep (m)ine or (t)heirs?", path))?;
            match answer.trim() {
                "m" => return Ok(false),
                "t" => return Ok(true),
                other => m.printer().warn(&format!("Unknown answer '{}'", other)),
            }
        },
    }
}

/// Merge `[branch][/revision]` into the working tree
pub fn handle(
    m: &mut Metadata,
    argument: Option<&str>,
    options: UpdateOptions,
) -> Result<UpdateSummary> {
    require_offline(m)?;
    let current = m.current_branch()?;
    let (branch, revision) = m.parse_revision_string(argument)?;

    // files the current branch has committed, the only ones update may remove
    let latest = m.latest_revision(current)?;
    m.compute_sequential_path_set(current, latest)?;
    let committed: BTreeSet<String> = m
        .paths
        .iter()
        .filter(|(_, info)| !info.is_deleted())
        .map(|(path, _)| path.clone())
        .collect();

    let changes = working_changes(m, branch, revision, true)?;
    let kinds = FileKinds::from_config(&m.config)?;
    let label = m.branches[&branch].label();
    let mut summary = UpdateSummary::default();

    if options.files.includes_insert() {
        for (path, info) in changes.deletions.iter() {
            m.restore_file(path, branch, revision, info)?;
            m.printer().line(&format!("ADD {}", path));
            summary.added.push(path.clone());
        }
    }
    if options.files.includes_remove() {
        for path in changes.additions.keys().filter(|p| committed.contains(*p)) {
            let local = m.root.join(path);
            fs::remove_file(&local).with_context(|| format!("Failed to remove {:?}", local))?;
            m.printer().line(&format!("DEL {}", path));
            summary.removed.push(path.clone());
        }
    }

    for path in changes.modifications.keys() {
        let target: PathInfo = m.paths[path].clone();
        let theirs = m
            .read_or_copy_versioned_file(branch, revision, &target, None)?
            .unwrap_or_default();
        let local = m.root.join(path);
        let mine = fs::read(&local).with_context(|| format!("Failed to read {:?}", local))?;
        if theirs == mine {
            continue;
        }

        if kinds.is_text(path, &theirs) && kinds.is_text(path, &mine) {
            let merged = merge(
                &theirs,
                &mine,
                &format!("{}@{}", path, label),
                path,
                options.lines,
                options.resolution,
                m.printer(),
            )?;
            if merged == mine {
                continue;
            }
            fs::write(&local, &merged).with_context(|| format!("Failed to write {:?}", local))?;
        } else if take_theirs_binary(m, path, options.resolution)? {
            m.restore_file(path, branch, revision, &target)?;
        } else {
            continue;
        }
        m.printer().line(&format!("MRG {}", path));
        summary.merged.push(path.clone());
    }

    if !summary.is_empty() {
        let info = m.branches[&current].with_insync(false);
        m.branches.insert(current, info);
        m.save_branches()?;
    }
    tracing::info!(
        "Updated from {}/{}: {} added, {} removed, {} merged",
        branch,
        revision,
        summary.added.len(),
        summary.removed.len(),
        summary.merged.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{offline, open, open_with, write};
    use crate::commands::{branch, commit, switch};
    use crate::printer::ScriptedPrinter;
    use std::{path::Path, rc::Rc};
    use tempfile::TempDir;

    const BASE: &str = "line 1\nline 2\nline 3\nline 4\n";
    const THEIRS: &str = "line 1\nline 2\nline three from the other branch\nline 4\n";
    const MINE: &str = "line 1\nline 2\nmy own third line\nline 4\n";

    /// Branch `other` changes line 3, then the trunk changes it differently
    fn diverged(root: &Path) -> Result<()> {
        write(root, "shared.txt", BASE.as_bytes());
        offline(root)?;
        branch::handle(&mut open(root), Some("other".into()), false, false)?;
        write(root, "shared.txt", THEIRS.as_bytes());
        write(root, "extra.txt", b"only on other\n");
        commit::handle(&mut open(root), None)?;

        switch::handle(&mut open(root), Some("0"), switch::SwitchOptions::default())?;
        write(root, "shared.txt", MINE.as_bytes());
        write(root, "local.txt", b"only on trunk\n");
        commit::handle(&mut open(root), None)?;
        Ok(())
    }

    fn with(resolution: ConflictResolution) -> UpdateOptions {
        UpdateOptions {
            resolution,
            ..UpdateOptions::default()
        }
    }

    #[test]
    fn test_update_mine_keeps_local_line() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        diverged(root)?;

        let mut m = open(root);
        let summary = handle(&mut m, Some("other"), with(ConflictResolution::Mine))?;
        assert_eq!(fs::read_to_string(root.join("shared.txt"))?, MINE);
        assert_eq!(summary.added, vec!["extra.txt"]);
        assert_eq!(summary.removed, vec!["local.txt"]);
        assert!(!m.branches[&0].insync);
        Ok(())
    }

    #[test]
    fn test_update_theirs_takes_other_line() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        diverged(root)?;

        let summary = handle(&mut open(root), Some("other"), with(ConflictResolution::Theirs))?;
        assert_eq!(fs::read_to_string(root.join("shared.txt"))?, THEIRS);
        assert_eq!(summary.merged, vec!["shared.txt"]);
        Ok(())
    }

    #[test]
    fn test_update_add_only_keeps_local_files() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        diverged(root)?;
        write(root, "untracked.txt", b"never committed\n");

        let options = UpdateOptions {
            files: MergeOperation::Insert,
            resolution: ConflictResolution::Theirs,
            ..UpdateOptions::default()
        };
        let summary = handle(&mut open(root), Some("other"), options)?;
        assert!(root.join("extra.txt").exists());
        assert!(root.join("local.txt").exists());
        assert!(summary.removed.is_empty());

        // a full update never removes files the branch did not commit
        handle(&mut open(root), Some("other"), with(ConflictResolution::Theirs))?;
        assert!(!root.join("local.txt").exists());
        assert!(root.join("untracked.txt").exists());
        Ok(())
    }

    #[test]
    fn test_update_asks_by_default() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        diverged(root)?;

        let printer = Rc::new(ScriptedPrinter::with_answers(&["t"]));
        handle(&mut open_with(root, printer.clone()), Some("other"), UpdateOptions::default())?;
        assert_eq!(fs::read_to_string(root.join("shared.txt"))?, THEIRS);
        assert!(printer.lines().iter().any(|l| l.starts_with("Conflict at line 3")));
        Ok(())
    }

    #[test]
    fn test_binary_conflict_resolution() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        write(root, "image.bin", &[0, 1, 2]);
        offline(root)?;
        branch::handle(&mut open(root), None, false, false)?;
        write(root, "image.bin", &[0, 1, 2, 3, 4]);
        commit::handle(&mut open(root), None)?;
        switch::handle(&mut open(root), Some("0"), switch::SwitchOptions::default())?;

        handle(&mut open(root), Some("1"), with(ConflictResolution::Mine))?;
        assert_eq!(fs::read(root.join("image.bin"))?, vec![0, 1, 2]);
        handle(&mut open(root), Some("1"), with(ConflictResolution::Theirs))?;
        assert_eq!(fs::read(root.join("image.bin"))?, vec![0, 1, 2, 3, 4]);
        Ok(())
    }
}
