use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// User configuration for sos
///
/// Flags select default repository modes for `offline`; the lists drive
/// file classification and the walk filters of change detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SosConfig {
    /// Always compare file contents, not only size and mtime
    #[serde(default)]
    pub strict: bool,
    /// Only files matching tracked patterns are versioned
    #[serde(default)]
    pub track: bool,
    /// Like track, but patterns are cleared after every commit
    #[serde(default)]
    pub picky: bool,
    /// Compress stored blobs
    #[serde(default)]
    pub compress: bool,
    /// Re-hash files whose only change is the mtime and ignore them if the content is equal
    #[serde(default)]
    pub ignore_touched: bool,
    /// Globs of files always merged as text
    #[serde(default = "defaults::texttype")]
    pub texttype: Vec<String>,
    /// Globs of files always treated as binary
    #[serde(default)]
    pub bintype: Vec<String>,
    /// Globs of file names skipped during walks
    #[serde(default = "defaults::ignores")]
    pub ignores: Vec<String>,
    /// Globs of directory names pruned during walks
    #[serde(default = "defaults::ignore_dirs")]
    pub ignore_dirs: Vec<String>,
    /// Globs re-admitting file names matched by `ignores`
    #[serde(default)]
    pub ignores_whitelist: Vec<String>,
    /// Globs re-admitting directory names matched by `ignore_dirs`
    #[serde(default)]
    pub ignore_dirs_whitelist: Vec<String>,
}

impl Default for SosConfig {
    fn default() -> Self {
        Self {
            strict: false,
            track: false,
            picky: false,
            compress: false,
            ignore_touched: false,
            texttype: defaults::texttype(),
            bintype: Vec::new(),
            ignores: defaults::ignores(),
            ignore_dirs: defaults::ignore_dirs(),
            ignores_whitelist: Vec::new(),
            ignore_dirs_whitelist: Vec::new(),
        }
    }
}

impl SosConfig {
    /// Load configuration from the config file and environment variables.
    /// A missing config file yields the defaults.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        tracing::debug!("loading sos config from {:?}", config_path);
        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        if let Ok(value) = env::var("SOS_STRICT") {
            config.strict = parse_flag(&value).context("Failed to parse SOS_STRICT")?;
        }

        if let Ok(value) = env::var("SOS_COMPRESS") {
            config.compress = parse_flag(&value).context("Failed to parse SOS_COMPRESS")?;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: SosConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Save configuration to file
    #[cfg(test)]
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Config file path: `$SOS_CONFIG`, else `~/.config/sos/config.yaml`
    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = env::var("SOS_CONFIG") {
            return Ok(expand_tilde(&PathBuf::from(path)));
        }
        dirs::home_dir()
            .map(|home| home.join(".config/sos/config.yaml"))
            .context("Could not determine home directory for config file")
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("not a flag value: {}", other),
    }
}

mod defaults {
    pub(crate) fn texttype() -> Vec<String> {
        vec!["*.md".to_string(), "*.txt".to_string()]
    }

    pub(crate) fn ignores() -> Vec<String> {
        ["*.bak", "*.py[cdo]", "*.class", ".fslckout", "_FOSSIL_", "*.sos.zip"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub(crate) fn ignore_dirs() -> Vec<String> {
        vec![".*".to_string(), "__pycache__".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");

        let config = SosConfig {
            strict: true,
            compress: true,
            bintype: vec!["*.png".to_string()],
            ..SosConfig::default()
        };
        config.save(&config_path).unwrap();

        let loaded = SosConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "track: true\n").unwrap();

        let loaded = SosConfig::load_from_file(&config_path).unwrap();
        assert!(loaded.track);
        assert!(!loaded.strict);
        assert_eq!(loaded.ignore_dirs, vec![".*", "__pycache__"]);
        assert_eq!(loaded.texttype, vec!["*.md", "*.txt"]);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "strict: true\ncolour: blue\n").unwrap();

        assert!(SosConfig::load_from_file(&config_path).is_err());
    }

    #[test]
    fn test_tilde_expansion() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/sos.yaml")), home.join("sos.yaml"));
        }
        assert_eq!(expand_tilde(Path::new("/etc/sos.yaml")), PathBuf::from("/etc/sos.yaml"));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE").unwrap());
        assert!(parse_flag("1").unwrap());
        assert!(!parse_flag("off").unwrap());
        assert!(parse_flag("maybe").is_err());
    }
}
