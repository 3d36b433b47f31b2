//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{QatError, Result};
use crate::store::bugs::BugSeverity;

/// Full tracker configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub scheduling: SchedulingConfig,
    pub recording: RecordingConfig,
    pub logging: LoggingConfig,
}

/// Filesystem paths used by qat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub database: PathBuf,
    pub state_file: PathBuf,
    pub stop_signal: PathBuf,
    pub activity_log: PathBuf,
}

/// Batch selection policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Maximum number of tests handed to the driver per batch.
    pub batch_size: usize,
    /// Known bugs last seen within this many days count as recent.
    pub recent_window_days: u32,
    /// How many remaining queue entries `tracker remaining` prints.
    pub remaining_preview: usize,
}

/// Result recording behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecordingConfig {
    /// Failure text longer than this is cut before it becomes a bug description.
    pub bug_description_limit: usize,
    /// Severity given to bugs opened by a failing result.
    pub default_severity: BugSeverity,
}

/// Activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[QAT-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = home_dir();
        let cfg = home.join(".config").join("qat").join("config.toml");
        let data = home.join(".local").join("share").join("qat");
        Self {
            config_file: cfg,
            database: data.join("test-data.sqlite3"),
            state_file: data.join("session-state.json"),
            stop_signal: data.join("stop-signal.txt"),
            activity_log: data.join("activity.jsonl"),
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            recent_window_days: 30,
            remaining_preview: 20,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            bug_description_limit: 100,
            default_severity: BugSeverity::Medium,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| QatError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(QatError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for diagnostics.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // paths
        for (name, slot) in [
            ("QAT_PATHS_DATABASE", &mut self.paths.database),
            ("QAT_PATHS_STATE_FILE", &mut self.paths.state_file),
            ("QAT_PATHS_STOP_SIGNAL", &mut self.paths.stop_signal),
            ("QAT_PATHS_ACTIVITY_LOG", &mut self.paths.activity_log),
        ] {
            if let Some(raw) = lookup(name) {
                *slot = PathBuf::from(raw);
            }
        }

        // scheduling
        if let Some(raw) = lookup("QAT_SCHEDULING_BATCH_SIZE") {
            self.scheduling.batch_size = parse_env("QAT_SCHEDULING_BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("QAT_SCHEDULING_RECENT_WINDOW_DAYS") {
            self.scheduling.recent_window_days =
                parse_env("QAT_SCHEDULING_RECENT_WINDOW_DAYS", &raw)?;
        }
        if let Some(raw) = lookup("QAT_SCHEDULING_REMAINING_PREVIEW") {
            self.scheduling.remaining_preview =
                parse_env("QAT_SCHEDULING_REMAINING_PREVIEW", &raw)?;
        }

        // recording
        if let Some(raw) = lookup("QAT_RECORDING_BUG_DESCRIPTION_LIMIT") {
            self.recording.bug_description_limit =
                parse_env("QAT_RECORDING_BUG_DESCRIPTION_LIMIT", &raw)?;
        }
        if let Some(raw) = lookup("QAT_RECORDING_DEFAULT_SEVERITY") {
            self.recording.default_severity =
                BugSeverity::parse(&raw).ok_or_else(|| QatError::ConfigParse {
                    context: "env",
                    details: format!("QAT_RECORDING_DEFAULT_SEVERITY={raw:?}: unknown severity"),
                })?;
        }

        // logging
        if let Some(raw) = lookup("QAT_LOGGING_ENABLED") {
            self.logging.enabled = parse_env("QAT_LOGGING_ENABLED", &raw)?;
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.scheduling.batch_size == 0 {
            return Err(QatError::InvalidConfig {
                details: "scheduling.batch_size must be >= 1".to_string(),
            });
        }
        if self.scheduling.recent_window_days == 0 {
            return Err(QatError::InvalidConfig {
                details: "scheduling.recent_window_days must be >= 1".to_string(),
            });
        }
        if self.recording.bug_description_limit == 0 {
            return Err(QatError::InvalidConfig {
                details: "recording.bug_description_limit must be >= 1".to_string(),
            });
        }
        if self.logging.enabled && self.logging.max_size_bytes < 1024 {
            return Err(QatError::InvalidConfig {
                details: format!(
                    "logging.max_size_bytes ({}) must be >= 1024",
                    self.logging.max_size_bytes
                ),
            });
        }
        if self.paths.database == self.paths.state_file {
            return Err(QatError::InvalidConfig {
                details: "paths.database and paths.state_file must differ".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| QatError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
