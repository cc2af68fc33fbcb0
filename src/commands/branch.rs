use anyhow::Result;

use crate::{
    commands::{format_millis, require_offline},
    error::usage,
    storage::{now_millis, Metadata},
};

/// Create a new branch and, unless `stay`, switch to it.
///
/// `last` branches from the latest committed revision instead of the
/// working tree. Returns the new branch number.
pub fn handle(m: &mut Metadata, name: Option<String>, last: bool, stay: bool) -> Result<u32> {
    require_offline(m)?;
    let current = m.current_branch()?;
    if let Some(ref name) = name {
        if m.branches.values().any(|b| b.name.as_deref() == Some(name.as_str())) {
            return Err(usage(format!("Branch '{}' already exists", name)));
        }
    }

    let branch = m.branches.keys().max().map_or(0, |b| b + 1);
    let created = if last {
        m.duplicate_branch(branch, name)
    } else {
        let message = format!("Branched on {}", format_millis(now_millis()));
        m.create_branch(branch, name, message)
    };
    if let Err(e) = created {
        let _ = m.storage().remove_branch_dir(branch);
        return Err(e);
    }

    if stay {
        m.flags.branch = Some(current);
    }
    m.save_branches()?;

    let label = m.branches[&branch].label();
    m.printer().line(&format!(
        "Created branch {}{}",
        label,
        if stay { "" } else { " and switched to it" }
    ));
    Ok(branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{offline, open, write};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_branch_numbers_and_names() -> Result<()> {
        let temp = TempDir::new()?;
        write(temp.path(), "a.txt", b"a");
        offline(temp.path())?;

        let mut m = open(temp.path());
        assert_eq!(handle(&mut m, Some("feature".into()), false, false)?, 1);
        assert_eq!(m.flags.branch, Some(1));
        assert!(!m.branches[&1].insync);
        assert!(handle(&mut m, Some("feature".into()), false, false).is_err());

        assert_eq!(handle(&mut m, None, true, true)?, 2);
        assert_eq!(open(temp.path()).flags.branch, Some(1));
        Ok(())
    }

    #[test]
    fn test_branch_from_working_tree_versus_last_commit() -> Result<()> {
        let temp = TempDir::new()?;
        write(temp.path(), "a.txt", b"committed\n");
        offline(temp.path())?;
        fs::write(temp.path().join("a.txt"), b"uncommitted edit\n")?;

        let mut m = open(temp.path());
        let from_tree = handle(&mut m, None, false, true)?;
        let from_last = handle(&mut m, None, true, true)?;

        m.compute_sequential_path_set(from_tree, 0)?;
        let info = m.paths["a.txt"].clone();
        let content = m.read_or_copy_versioned_file(from_tree, 0, &info, None)?;
        assert_eq!(content.as_deref(), Some(b"uncommitted edit\n".as_slice()));

        m.compute_sequential_path_set(from_last, 0)?;
        let info = m.paths["a.txt"].clone();
        let content = m.read_or_copy_versioned_file(from_last, 0, &info, None)?;
        assert_eq!(content.as_deref(), Some(b"committed\n".as_slice()));
        Ok(())
    }
}
