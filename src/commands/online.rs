use anyhow::Result;

use crate::{commands::require_offline, error::usage, storage::Metadata};

/// Remove the offline repository, refusing while branches hold unsynchronized work
pub fn handle(m: &mut Metadata, force: bool) -> Result<()> {
    require_offline(m)?;

    let unsynced: Vec<String> = m
        .branches
        .values()
        .filter(|b| !b.insync)
        .map(|b| b.label())
        .collect();
    if !unsynced.is_empty() {
        if !force {
            return Err(usage(format!(
                "Branches {} contain changes not yet in the version control system. Use --force to go online anyway",
                unsynced.join(", ")
            )));
        }
        m.printer()
            .warn(&format!("Discarding unsynchronized branches {}", unsynced.join(", ")));
    }

    m.storage().destroy()?;
    tracing::info!("Removed offline repository at {:?}", m.root);
    m.printer().line("Offline repository removed, you're back online");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{offline, open, write};
    use tempfile::TempDir;

    #[test]
    fn test_online_requires_sync_unless_forced() -> Result<()> {
        let temp = TempDir::new()?;
        write(temp.path(), "a.txt", b"a");
        offline(temp.path())?;

        let mut m = open(temp.path());
        let branch = m.branches[&0].with_insync(false);
        m.branches.insert(0, branch);
        m.save_branches()?;

        let mut m = open(temp.path());
        assert!(handle(&mut m, false).is_err());
        assert!(m.is_offline());

        handle(&mut m, true)?;
        assert!(!m.is_offline());
        assert!(temp.path().join("a.txt").exists());
        Ok(())
    }

    #[test]
    fn test_online_without_repository_fails() {
        let temp = TempDir::new().unwrap();
        let mut m = open(temp.path());
        assert!(handle(&mut m, false).is_err());
    }
}
