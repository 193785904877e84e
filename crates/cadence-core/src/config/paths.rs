//! Default locations for Cadence configuration files

use std::path::PathBuf;

/// Per-user config directory, e.g. `~/.config/cadence`
///
/// Falls back to the working directory when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadence")
}

/// `filename` inside [`default_config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
