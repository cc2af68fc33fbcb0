use anyhow::Result;

use crate::{
    commands::{format_millis, require_offline},
    storage::{diff_path_sets, integrate_changeset, ChangeSet, Metadata},
};

/// One rendered entry of `sos log`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub revision: u32,
    pub ctime: i64,
    pub message: Option<String>,
    /// Only computed with `--changes`
    pub changes: Option<ChangeSet>,
}

/// List the commits of the current branch, optionally with change counts
pub fn handle(m: &mut Metadata, with_changes: bool) -> Result<Vec<LogEntry>> {
    require_offline(m)?;
    let branch = m.current_branch()?;
    m.load_branch(branch)?;
    m.printer().line(&format!(
        "Log of branch {}",
        m.branches[&branch].label()
    ));

    let mut entries = Vec::with_capacity(m.commits.len());
    let mut paths = Default::default();
    for commit in m.commits.values() {
        let changes = if with_changes {
            let delta = m.load_commit(branch, commit.number)?;
            let changes = diff_path_sets(&paths, &delta);
            integrate_changeset(&mut paths, &changes);
            Some(changes)
        } else {
            None
        };
        m.printer().line(&format!(
            "  r{:02} @{} {}|{}|",
            commit.number,
            format_millis(commit.ctime),
            changes
                .as_ref()
                .map(|c| format!("({}) ", c.summary()))
                .unwrap_or_default(),
            commit.message.as_deref().unwrap_or("")
        ));
        entries.push(LogEntry {
            revision: commit.number,
            ctime: commit.ctime,
            message: commit.message.clone(),
            changes,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::commit;
    use crate::commands::test_support::{offline, open, write};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_log_with_change_counts() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        write(root, "a.txt", b"a");
        write(root, "b.txt", b"b");
        offline(root)?;
        fs::remove_file(root.join("a.txt"))?;
        write(root, "b.txt", b"b, changed");
        write(root, "c.txt", b"c");
        commit::handle(&mut open(root), Some("rework".into()))?;

        let entries = handle(&mut open(root), true)?;
        assert_eq!(entries.len(), 2);
        assert!(entries[0].message.as_deref().unwrap_or("").starts_with("Offline repository created"));
        assert_eq!(entries[0].changes.as_ref().map(|c| c.summary()), Some("+2/-0/~0".into()));
        assert_eq!(entries[1].message.as_deref(), Some("rework"));
        assert_eq!(entries[1].changes.as_ref().map(|c| c.summary()), Some("+1/-1/~1".into()));

        let plain = handle(&mut open(root), false)?;
        assert!(plain.iter().all(|e| e.changes.is_none()));
        Ok(())
    }
}
