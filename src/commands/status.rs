use anyhow::Result;

use crate::{
    commands::{require_offline, working_changes},
    storage::{ChangeSet, Metadata},
};

/// List branches and summarize the working tree changes
pub fn handle(m: &mut Metadata) -> Result<ChangeSet> {
    require_offline(m)?;
    let current = m.current_branch()?;

    let branches: Vec<_> = m.branches.values().cloned().collect();
    for info in &branches {
        let revisions = m.latest_revision(info.number)? + 1;
        m.printer().line(&format!(
            "  {} {:<12} {} {} revision(s){}",
            if info.number == current { "*" } else { " " },
            info.label(),
            if info.insync { "in sync " } else { "modified" },
            revisions,
            if info.tracked.is_empty() {
                String::new()
            } else {
                format!(", tracking {}", info.tracked.join(" "))
            }
        ));
    }

    let latest = m.latest_revision(current)?;
    let changes = working_changes(m, current, latest, true)?;
    m.printer().line(&if changes.is_empty() {
        "No changes in the working tree".to_string()
    } else {
        format!("Working tree changes: {}", changes.summary())
    });
    Ok(changes)
}
