//! Configuration types for the alarm service.

use crate::error::{AlarmError, Result};
use crate::scheduler::executor::ShellExecutor;
use crate::scheduler::runner::{DEFAULT_SNOOZE_SECS, ShutdownMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UlticlockConfig {
    /// SQLite file holding fetched calendar events.
    pub database_path: PathBuf,
    /// Only events whose title starts with this keyword become alarms.
    pub alarm_keyword: String,
    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Calendar feeds to fetch.
    pub calendars: Vec<CalendarConfig>,
    /// Control API listener.
    pub server: ServerConfig,
    /// Scheduler loop and executor settings.
    pub scheduler: SchedulerConfig,
    /// Calendar sync settings.
    pub sync: SyncConfig,
}

impl Default for UlticlockConfig {
    fn default() -> Self {
        Self {
            database_path: crate::paths::database_file(),
            alarm_keyword: "Alarm".to_owned(),
            log_level: "info".to_owned(),
            calendars: Vec::new(),
            server: ServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// One iCalendar feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Display name used in logs.
    #[serde(default)]
    pub name: String,
    /// Feed URL.
    pub ical_url: String,
    /// Basic-auth user name. No authentication when absent.
    #[serde(default)]
    pub user_name: Option<String>,
    /// Basic-auth password.
    #[serde(default)]
    pub password: Option<String>,
    /// Set to `false` to accept self-signed certificates.
    #[serde(default = "default_true")]
    pub verify_cert: bool,
}

impl CalendarConfig {
    /// Feed without authentication.
    pub fn new(name: impl Into<String>, ical_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ical_url: ical_url.into(),
            user_name: None,
            password: None,
            verify_cert: true,
        }
    }

    /// Name for logs: the configured name, or the URL.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.ical_url
        } else {
            &self.name
        }
    }
}

fn default_true() -> bool {
    true
}

/// Control API listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default: `127.0.0.1`).
    pub host: String,
    /// Port to bind. `0` auto-assigns.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// `http://host:port` for clients.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Scheduler loop and executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delay between polling cycles in milliseconds.
    pub poll_interval_ms: u64,
    /// Directory for generated alarm scripts (default `$TMPDIR/alarm_scripts`).
    pub script_dir: Option<PathBuf>,
    /// Kill alarm commands that run longer than this. `0` disables the limit.
    pub command_timeout_secs: u64,
    /// Snooze length when a request does not give one.
    pub default_snooze_secs: u64,
    /// What to do with running commands on shutdown.
    pub shutdown: ShutdownMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            script_dir: None,
            command_timeout_secs: 0,
            default_snooze_secs: DEFAULT_SNOOZE_SECS,
            shutdown: ShutdownMode::default(),
        }
    }
}

impl SchedulerConfig {
    /// Resolved script directory.
    pub fn script_dir(&self) -> PathBuf {
        self.script_dir
            .clone()
            .unwrap_or_else(ShellExecutor::default_script_dir)
    }
}

/// Calendar sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Run the periodic sync inside `serve`.
    pub enabled: bool,
    /// Seconds between syncs.
    pub interval_secs: u64,
    /// How many days ahead of today to keep events.
    pub lookahead_days: u32,
    /// Command run when an event's alarm fires.
    ///
    /// Placeholders `{title}`, `{event_id}`, `{date}` and `{start_time}` are
    /// replaced with shell-quoted values.
    pub notify_command: String,
    /// How far back an event start may lie and still fire.
    ///
    /// On the first pass after startup, events that started at most this
    /// many seconds ago are fired immediately. On every pass, a pending
    /// alarm whose event moved into this window fires now; one that moved
    /// further back is cancelled. `0` disables recovery.
    pub missed_grace_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 900,
            lookahead_days: 7,
            notify_command: "echo {title}".to_owned(),
            missed_grace_secs: 900,
        }
    }
}

impl UlticlockConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| AlarmError::Config(format!("{}: {e}", path.display())))
    }

    /// Load `path` if it exists, otherwise the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AlarmError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/ulticlock/config.toml`.
    pub fn default_config_path() -> PathBuf {
        crate::paths::config_file()
    }
}
