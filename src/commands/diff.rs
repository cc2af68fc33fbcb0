use std::fmt::Write;
use std::fs;

use anyhow::{Context, Result};
use similar::{ChangeTag, TextDiff};

use crate::{
    commands::{print_changes, require_offline, working_changes},
    storage::Metadata,
    text::{decode_text, FileKinds},
};

/// Unified line diff with three lines of context
pub fn unified_diff(old: &str, new: &str, old_name: &str, new_name: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = String::new();

    let _ = writeln!(output, "--- {}", old_name);
    let _ = writeln!(output, "+++ {}", new_name);
    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        let _ = writeln!(output, "{}", hunk.header());
        for change in hunk.iter_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => " ",
            };
            let _ = write!(output, "{}{}", sign, change.value());
            if !change.value().ends_with('\n') {
                let _ = writeln!(output);
            }
        }
    }
    output
}

/// Show changes against `[branch][/revision]` with line diffs of modified text files
pub fn handle(m: &mut Metadata, argument: Option<&str>) -> Result<()> {
    require_offline(m)?;
    let (branch, revision) = m.parse_revision_string(argument)?;
    let changes = working_changes(m, branch, revision, true)?;
    print_changes(m, &changes);

    let kinds = FileKinds::from_config(&m.config)?;
    for path in changes.modifications.keys() {
        let stored = m.paths[path].clone();
        let old = m
            .read_or_copy_versioned_file(branch, revision, &stored, None)?
            .unwrap_or_default();
        let local = m.root.join(path);
        let new = fs::read(&local).with_context(|| format!("Failed to read {:?}", local))?;

        if !(kinds.is_text(path, &old) && kinds.is_text(path, &new)) {
            m.printer().line(&format!("Binary files differ: {}", path));
            continue;
        }
        let (_, old_text) = decode_text(&old)?;
        let (_, new_text) = decode_text(&new)?;
        let patch = unified_diff(
            &old_text,
            &new_text,
            &format!("{} (b{}/r{})", path, branch, revision),
            path,
        );
        for line in patch.lines() {
            m.printer().line(line);
        }
    }
    Ok(())
}
