use anyhow::Result;

use crate::{commands::require_offline, error::usage, storage::Metadata};

/// Remove a branch given by name or number
pub fn handle(m: &mut Metadata, name: &str) -> Result<()> {
    require_offline(m)?;
    let branch = m
        .branch_by_name(name)
        .ok_or_else(|| usage(format!("Unknown branch '{}'", name)))?;
    let label = m.branches[&branch].label();
    m.remove_branch(branch)?;
    m.printer().line(&format!("Branch {} removed", label));
    Ok(())
}
