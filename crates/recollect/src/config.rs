//! Configuration file support for the hook binaries
//!
//! Everything has a default, so a missing file is the common case. Lookup
//! order: explicit path, `$RECOLLECT_CONFIG`, `~/.recollect/config.toml`.

use crate::error::{HookError, HookResult};
use crate::matching::MatchStrategyKind;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "RECOLLECT_CONFIG";
pub const MAILBOX_DIR_ENV: &str = "RECOLLECT_MAILBOX_DIR";
pub const ARCHIVE_DIR_ENV: &str = "RECOLLECT_ARCHIVE_DIR";
pub const LOG_FILE_ENV: &str = "RECOLLECT_LOG_FILE";
pub const DISABLE_ENV: &str = "RECOLLECT_DISABLE";

/// Default wait for a per-key mailbox lock
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 10;

/// Pending events older than this are orphans for the routine sweep
pub const DEFAULT_PENDING_TTL_SECS: u64 = 24 * 60 * 60;

/// Max age used by the sweep triggered from post capture
pub const DEFAULT_AGGRESSIVE_TTL_SECS: u64 = 60 * 60;

pub const DEFAULT_PRE_SWEEP_PROBABILITY: f64 = 0.01;
pub const DEFAULT_POST_SWEEP_PROBABILITY: f64 = 0.02;

/// Completed records are kept for 30 days
pub const DEFAULT_COMPLETED_RETENTION_SECS: u64 = 30 * 24 * 60 * 60;

pub const DEFAULT_TURN_WINDOW_SLACK_SECS: u64 = 120;

pub const DEFAULT_ANALYSIS_TOOL_PREFIXES: &[&str] = &["mcp__deep-analysis__"];

const DATA_DIR_NAME: &str = ".recollect";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HooksConfig {
    /// Root for everything below; defaults to `~/.recollect`
    pub data_dir: Option<PathBuf>,
    pub mailbox_dir: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub lock_timeout_secs: u64,
    pub pending_ttl_secs: u64,
    pub aggressive_ttl_secs: u64,
    pub pre_sweep_probability: f64,
    pub post_sweep_probability: f64,
    pub completed_retention_secs: u64,
    /// Tool name prefixes that get an `analysis_summary`
    pub analysis_tool_prefixes: Vec<String>,
    /// Tools that capture answers with `skipped`
    pub skip_tools: Vec<String>,
    pub turn_window_slack_secs: u64,
    pub match_strategy: MatchStrategyKind,
    /// Set from `RECOLLECT_DISABLE`; not read from the file
    #[serde(skip)]
    pub disabled: bool,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            mailbox_dir: None,
            archive_dir: None,
            log_file: None,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
            pending_ttl_secs: DEFAULT_PENDING_TTL_SECS,
            aggressive_ttl_secs: DEFAULT_AGGRESSIVE_TTL_SECS,
            pre_sweep_probability: DEFAULT_PRE_SWEEP_PROBABILITY,
            post_sweep_probability: DEFAULT_POST_SWEEP_PROBABILITY,
            completed_retention_secs: DEFAULT_COMPLETED_RETENTION_SECS,
            analysis_tool_prefixes: DEFAULT_ANALYSIS_TOOL_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            skip_tools: Vec::new(),
            turn_window_slack_secs: DEFAULT_TURN_WINDOW_SLACK_SECS,
            match_strategy: MatchStrategyKind::default(),
            disabled: false,
        }
    }
}

impl HooksConfig {
    /// Load configuration, apply environment overrides and validate.
    pub fn load(explicit: Option<&Path>) -> HookResult<Self> {
        let mut config = match Self::locate(explicit) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        let default = dirs::home_dir()?.join(DATA_DIR_NAME).join("config.toml");
        default.exists().then_some(default)
    }

    pub fn from_file(path: &Path) -> HookResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HookError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> HookResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = std::env::var_os(MAILBOX_DIR_ENV) {
            self.mailbox_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = std::env::var_os(ARCHIVE_DIR_ENV) {
            self.archive_dir = Some(PathBuf::from(dir));
        }
        if let Some(file) = std::env::var_os(LOG_FILE_ENV) {
            self.log_file = Some(PathBuf::from(file));
        }
        if std::env::var_os(DISABLE_ENV).is_some() {
            self.disabled = true;
        }
    }

    pub fn validate(&self) -> HookResult<()> {
        for (name, p) in [
            ("pre_sweep_probability", self.pre_sweep_probability),
            ("post_sweep_probability", self.post_sweep_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(HookError::Config(format!(
                    "{name} must be within [0, 1], got {p}"
                )));
            }
        }
        for (name, secs) in [
            ("lock_timeout_secs", self.lock_timeout_secs),
            ("pending_ttl_secs", self.pending_ttl_secs),
            ("aggressive_ttl_secs", self.aggressive_ttl_secs),
            ("completed_retention_secs", self.completed_retention_secs),
        ] {
            if secs == 0 {
                return Err(HookError::Config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|home| home.join(DATA_DIR_NAME))
                .unwrap_or_else(|| std::env::temp_dir().join("recollect"))
        })
    }

    pub fn mailbox_dir(&self) -> PathBuf {
        self.mailbox_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("mailbox"))
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.archive_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("archive"))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn aggressive_ttl(&self) -> Duration {
        Duration::from_secs(self.aggressive_ttl_secs)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }

    pub fn turn_window_slack(&self) -> Duration {
        Duration::from_secs(self.turn_window_slack_secs)
    }

    pub fn is_analysis_tool(&self, tool_name: &str) -> bool {
        self.analysis_tool_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && tool_name.starts_with(prefix.as_str()))
    }

    pub fn is_skipped_tool(&self, tool_name: &str) -> bool {
        self.skip_tools.iter().any(|t| t == tool_name)
    }
}
