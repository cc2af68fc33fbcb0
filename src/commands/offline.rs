use std::fs;

use anyhow::{Context, Result};

use crate::{
    commands::format_millis,
    error::usage,
    storage::{now_millis, Metadata, RepoFlags},
};

/// Options of `sos offline`; each flag is OR-ed with the configuration
#[derive(Debug, Clone, Default)]
pub struct OfflineOptions {
    pub name: Option<String>,
    pub track: bool,
    pub picky: bool,
    pub strict: bool,
    pub compress: bool,
}

/// Create the offline repository with branch 0
pub fn handle(m: &mut Metadata, options: OfflineOptions) -> Result<()> {
    if m.is_offline() {
        return Err(usage("Repository is already offline"));
    }

    m.flags = RepoFlags {
        branch: None,
        track: options.track || m.config.track,
        picky: options.picky || m.config.picky,
        strict: options.strict || m.config.strict,
        compress: options.compress || m.config.compress,
    };
    let base = m.storage().base_path().to_path_buf();
    fs::create_dir_all(&base).with_context(|| format!("Failed to create {:?}", base))?;

    let message = format!("Offline repository created on {}", format_millis(now_millis()));
    let created = m
        .create_branch(0, options.name, message)
        .and_then(|()| m.save_branches());
    if let Err(e) = created {
        let _ = m.storage().destroy();
        return Err(e);
    }

    let mode = if m.flags.picky {
        "picky"
    } else if m.flags.track {
        "track"
    } else {
        "simple"
    };
    tracing::info!("Offline repository created in {} mode", mode);
    m.printer().line(&format!(
        "Offline repository prepared in {} mode with {} file(s). Use 'sos online' to finish offline work",
        mode,
        m.paths.len()
    ));
    Ok(())
}
