use crate::model::ItemStatusCode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when no `--config` is given.
pub const LOCAL_CONFIG_FILE: &str = "qcflow.toml";

/// Environment variable overriding `[database] path`.
pub const DB_PATH_ENV: &str = "QCFLOW_DB";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QcConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub clock: ClockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Which transitions skip the inspector gate, and which items may be reworked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Targets that apply on submission regardless of the requester's role.
    #[serde(default = "default_auto_apply_targets")]
    pub auto_apply_targets: Vec<ItemStatusCode>,
    /// Whether an inspector's own request applies on submission.
    #[serde(default = "default_true")]
    pub inspector_auto_apply: bool,
    /// Statuses from which a fix request may be submitted.
    #[serde(default = "default_fix_eligible")]
    pub fix_eligible: Vec<ItemStatusCode>,
    #[serde(default = "default_true")]
    pub enforce_same_line: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            auto_apply_targets: default_auto_apply_targets(),
            inspector_auto_apply: default_true(),
            fix_eligible: default_fix_eligible(),
            enforce_same_line: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

/// Pick the config file to read: explicit path, then `./qcflow.toml`, then
/// the user config dir. `None` means run on defaults.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join("qcflow/config.toml"))
        .filter(|path| path.exists())
}

/// Parse one config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid TOML for
/// [`QcConfig`].
pub fn load_config_file(path: &Path) -> Result<QcConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<QcConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Resolve the effective configuration, including the `QCFLOW_DB` override.
///
/// # Errors
///
/// Returns an error if an explicitly named or discovered file fails to load.
pub fn load_config(explicit: Option<&Path>) -> Result<QcConfig> {
    let mut config = match resolve_config_path(explicit) {
        Some(path) => load_config_file(&path)?,
        None => QcConfig::default(),
    };
    apply_db_override(&mut config, env::var(DB_PATH_ENV).ok());
    Ok(config)
}

fn apply_db_override(config: &mut QcConfig, value: Option<String>) {
    if let Some(path) = value.filter(|v| !v.trim().is_empty()) {
        config.database.path = PathBuf::from(path);
    }
}

const fn default_true() -> bool {
    true
}

fn default_db_path() -> PathBuf {
    PathBuf::from("qcflow.db")
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_auto_apply_targets() -> Vec<ItemStatusCode> {
    vec![ItemStatusCode::LeftoverRoll]
}

fn default_fix_eligible() -> Vec<ItemStatusCode> {
    vec![
        ItemStatusCode::Defect,
        ItemStatusCode::Recheck,
        ItemStatusCode::Rejected,
    ]
}

const fn default_utc_offset_minutes() -> i32 {
    420
}
