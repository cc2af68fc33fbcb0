use anyhow::Result;

use crate::{
    commands::require_offline,
    error::usage,
    storage::{now_millis, ChangeSet, CommitInfo, FindChanges, Metadata},
};

/// Detect changes, store their blobs and the revision delta
fn write_revision(m: &mut Metadata, branch: u32, revision: u32) -> Result<ChangeSet> {
    let options = FindChanges {
        write_to: Some((branch, revision)),
        policy: m.modification_policy(),
        consider_only: m.consider_only(None),
        progress: true,
        ..FindChanges::default()
    };
    let changes = m.find_changes(&options)?;
    if changes.is_empty() {
        return Err(usage("Nothing to commit"));
    }
    m.paths = changes.to_delta();
    m.save_commit(branch, revision)?;
    Ok(changes)
}

/// Commit the working tree as the next revision of the current branch
pub fn handle(m: &mut Metadata, message: Option<String>) -> Result<u32> {
    require_offline(m)?;
    let branch = m.current_branch()?;
    m.load_branch(branch)?;
    let latest = m.latest_revision(branch)?;
    let revision = latest + 1;
    m.compute_sequential_path_set(branch, latest)?;

    let changes = match write_revision(m, branch, revision) {
        Ok(changes) => changes,
        Err(e) => {
            if let Err(cleanup) = m.storage().remove_revision_dir(branch, revision) {
                tracing::warn!("Failed to remove incomplete revision r{}: {:#}", revision, cleanup);
            }
            return Err(e);
        }
    };

    m.commits.insert(
        revision,
        CommitInfo {
            number: revision,
            ctime: now_millis(),
            message,
        },
    );
    m.save_branch(branch)?;

    if m.flags.is_tracking() {
        let mut info = m.branches[&branch].with_insync(false);
        if m.flags.picky {
            info = info.with_tracked(Vec::new());
        }
        m.branches.insert(branch, info);
        m.save_branches()?;
    }

    tracing::info!(
        "Committed revision {}/{} with {} changed path(s)",
        branch,
        revision,
        changes.len()
    );
    m.printer().line(&format!(
        "Created new revision r{:02} ({})",
        revision,
        changes.summary()
    ));
    Ok(revision)
}
