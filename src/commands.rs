//! One module per `sos` verb
//!
//! Every handler receives a freshly opened [`Metadata`] and reports to the
//! user through its printer. Handlers that produce something tests care
//! about return it.

pub mod branch;
pub mod changes;
pub mod commit;
pub mod delete;
pub mod diff;
pub mod log;
pub mod ls;
pub mod offline;
pub mod online;
pub mod status;
pub mod switch;
pub mod track;
pub mod update;

use std::{collections::BTreeSet, path::Path};

use anyhow::Result;

use crate::{
    error::usage,
    storage::{ChangeSet, FindChanges, Metadata},
};

/// Fail unless `offline` has been run for this repository
pub fn require_offline(m: &Metadata) -> Result<()> {
    if !m.is_offline() {
        return Err(usage("Not in an offline repository. Run 'sos offline' first"));
    }
    Ok(())
}

/// Union of the tracking scopes of the current branch and `other`;
/// `None` in simple mode
pub fn combined_scope(m: &Metadata, other: u32) -> Option<BTreeSet<String>> {
    let mut scope = m.consider_only(None)?;
    scope.extend(m.tracking_patterns(Some(other)));
    Some(scope)
}

/// Working tree changes against `branch/revision`.
///
/// Leaves the path set of that revision in `m.paths`.
pub fn working_changes(
    m: &mut Metadata,
    branch: u32,
    revision: u32,
    progress: bool,
) -> Result<ChangeSet> {
    m.compute_sequential_path_set(branch, revision)?;
    let options = FindChanges {
        policy: m.modification_policy(),
        consider_only: combined_scope(m, branch),
        progress,
        ..FindChanges::default()
    };
    m.find_changes(&options)
}

/// Print `ADD`/`DEL`/`MOD` lines for a change set
pub fn print_changes(m: &Metadata, changes: &ChangeSet) {
    let printer = m.printer();
    if changes.is_empty() {
        printer.line("No changes");
        return;
    }
    for path in changes.additions.keys() {
        printer.line(&format!("ADD {}", path));
    }
    for path in changes.deletions.keys() {
        printer.line(&format!("DEL {}", path));
    }
    for path in changes.modifications.keys() {
        printer.line(&format!("MOD {}", path));
    }
}

/// Forward-slash path of `cwd` relative to the repository root
pub fn relative_dir(root: &Path, cwd: &Path) -> Result<String> {
    let relative = cwd.strip_prefix(root).map_err(|_| {
        usage(format!(
            "{} is outside of the repository at {}",
            cwd.display(),
            root.display()
        ))
    })?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Local date and time for user-facing messages
pub fn format_millis(millis: i64) -> String {
    use chrono::TimeZone;
    match chrono::Local.timestamp_millis_opt(millis).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => millis.to_string(),
    }
}
