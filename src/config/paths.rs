//! Platform data directory.

use std::path::PathBuf;

/// Data directory holding config and runtime files.
///
/// Respects `XDG_CONFIG_HOME` where set; otherwise the platform config
/// dir (`~/.config` on Linux, `~/Library/Application Support` on macOS,
/// `%APPDATA%` on Windows).
pub fn data_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("majordome");
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("majordome")
}
