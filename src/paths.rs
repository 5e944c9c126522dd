//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate locations.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data | `~/Library/Application Support/ulticlock/` | `~/.local/share/ulticlock/` |
//! | Config | `~/Library/Application Support/ulticlock/` | `~/.config/ulticlock/` |
//!
//! `ULTICLOCK_DATA_DIR` and `ULTICLOCK_CONFIG_DIR` override the defaults.

use std::path::PathBuf;

/// Application data directory (event database).
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("ULTICLOCK_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("ulticlock"))
        .unwrap_or_else(|| PathBuf::from("/tmp/ulticlock-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("ULTICLOCK_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("ulticlock"))
        .unwrap_or_else(|| PathBuf::from("/tmp/ulticlock-config"))
}

/// `config.toml` inside [`config_dir`].
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// `events.db` inside [`data_dir`].
#[must_use]
pub fn database_file() -> PathBuf {
    data_dir().join("events.db")
}
