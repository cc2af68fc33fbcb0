use std::fs;

use anyhow::{Context, Result};

use crate::{
    commands::{require_offline, working_changes},
    error::usage,
    storage::Metadata,
};

/// Options of `sos switch`
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchOptions {
    /// Discard uncommitted changes
    pub force: bool,
    /// Only take over the target's tracking patterns
    pub meta: bool,
}

/// Make `[branch][/revision]` the working tree and current branch
pub fn handle(m: &mut Metadata, argument: Option<&str>, options: SwitchOptions) -> Result<()> {
    require_offline(m)?;
    let current = m.current_branch()?;
    let (branch, revision) = m.parse_revision_string(argument)?;

    if options.meta {
        let tracked = m.branches[&branch].tracked.clone();
        let info = m.branches[&current].with_tracked(tracked);
        m.branches.insert(current, info);
        m.save_branches()?;
        m.printer().line(&format!(
            "Took over tracking patterns of {}",
            m.branches[&branch].label()
        ));
        return Ok(());
    }

    if !options.force {
        let latest = m.latest_revision(current)?;
        let pending = working_changes(m, current, latest, false)?;
        if !pending.is_empty() {
            return Err(usage(format!(
                "Cannot switch with uncommitted changes ({}). Use --force to discard them",
                pending.summary()
            )));
        }
    }

    let changes = working_changes(m, branch, revision, true)?;
    for path in changes.additions.keys() {
        let local = m.root.join(path);
        fs::remove_file(&local).with_context(|| format!("Failed to remove {:?}", local))?;
        tracing::debug!("Removed {}", path);
    }
    for (path, info) in changes.deletions.iter() {
        m.restore_file(path, branch, revision, info)?;
    }
    for path in changes.modifications.keys() {
        let info = m.paths[path].clone();
        m.restore_file(path, branch, revision, &info)?;
    }

    m.flags.branch = Some(branch);
    m.save_branches()?;
    m.printer().line(&format!(
        "Switched to {} revision {} ({})",
        m.branches[&branch].label(),
        revision,
        changes.summary()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{offline, open, write};
    use crate::commands::{branch, commit};
    use tempfile::TempDir;

    #[test]
    fn test_switch_restores_branch_state() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        write(root, "shared.txt", b"base\n");
        write(root, "old.txt", b"old\n");
        offline(root)?;

        branch::handle(&mut open(root), Some("work".into()), false, false)?;
        write(root, "shared.txt", b"base, edited on work\n");
        write(root, "new.txt", b"new\n");
        fs::remove_file(root.join("old.txt"))?;
        commit::handle(&mut open(root), None)?;

        handle(&mut open(root), Some("0"), SwitchOptions::default())?;
        assert_eq!(fs::read(root.join("shared.txt"))?, b"base\n");
        assert_eq!(fs::read(root.join("old.txt"))?, b"old\n");
        assert!(!root.join("new.txt").exists());
        assert_eq!(open(root).flags.branch, Some(0));

        handle(&mut open(root), Some("work"), SwitchOptions::default())?;
        assert_eq!(fs::read(root.join("shared.txt"))?, b"base, edited on work\n");
        assert!(!root.join("old.txt").exists());
        assert!(root.join("new.txt").exists());
        Ok(())
    }

    #[test]
    fn test_switch_refuses_uncommitted_changes() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        write(root, "a.txt", b"a\n");
        offline(root)?;
        branch::handle(&mut open(root), None, false, true)?;
        write(root, "a.txt", b"a, dirty\n");

        let err = handle(&mut open(root), Some("1"), SwitchOptions::default()).unwrap_err();
        assert!(err.to_string().contains("uncommitted"));
        assert_eq!(open(root).flags.branch, Some(0));

        handle(
            &mut open(root),
            Some("1"),
            SwitchOptions {
                force: true,
                ..SwitchOptions::default()
            },
        )?;
        assert_eq!(fs::read(root.join("a.txt"))?, b"a\n");
        Ok(())
    }
}
