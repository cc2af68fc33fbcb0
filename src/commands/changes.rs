use anyhow::Result;

use crate::{
    commands::{print_changes, require_offline, working_changes},
    storage::{ChangeSet, Metadata},
};

/// List working tree changes against `[branch][/revision]`
pub fn handle(m: &mut Metadata, argument: Option<&str>) -> Result<ChangeSet> {
    require_offline(m)?;
    let (branch, revision) = m.parse_revision_string(argument)?;
    let changes = working_changes(m, branch, revision, true)?;
    print_changes(m, &changes);
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{offline, open, open_with, write};
    use crate::printer::ScriptedPrinter;
    use std::{fs, rc::Rc};
    use tempfile::TempDir;

    #[test]
    fn test_deleted_file_reports_prior_state() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        write(root, "a.txt", b"hello\n");
        write(root, "b.bin", b"");
        offline(root)?;

        let prior = open(root).load_commit(0, 0)?["a.txt"].clone();
        fs::remove_file(root.join("a.txt"))?;

        let printer = Rc::new(ScriptedPrinter::default());
        let mut m = open_with(root, printer.clone());
        let changes = handle(&mut m, None)?;
        assert_eq!(changes.deletions.len(), 1);
        assert_eq!(changes.deletions["a.txt"], prior);
        assert!(changes.modifications.is_empty());
        assert!(changes.additions.is_empty());
        assert_eq!(printer.lines(), vec!["DEL a.txt"]);
        Ok(())
    }

    #[test]
    fn test_changes_against_older_revision() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        write(root, "a.txt", b"v1\n");
        offline(root)?;
        write(root, "a.txt", b"v2, longer\n");
        crate::commands::commit::handle(&mut open(root), None)?;

        let mut m = open(root);
        assert!(handle(&mut m, None)?.is_empty());
        let changes = handle(&mut m, Some("/0"))?;
        assert!(changes.modifications.contains_key("a.txt"));
        Ok(())
    }
}
