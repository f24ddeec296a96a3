//! Well-known per-user paths: config, state, and the IPC socket.
//!
//! Follows the XDG base directory conventions. The runtime dir falls back to
//! /tmp when XDG_RUNTIME_DIR is unset (e.g. headless test environments).

use std::io;
use std::path::PathBuf;

pub const APP_NAME: &str = "wbridge";
pub const SOCKET_FILENAME: &str = "wbridge.sock";

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $XDG_CONFIG_HOME/wbridge or ~/.config/wbridge
pub fn config_dir() -> PathBuf {
    match std::env::var_os("XDG_CONFIG_HOME") {
        Some(base) if !base.is_empty() => PathBuf::from(base).join(APP_NAME),
        _ => home_dir().join(".config").join(APP_NAME),
    }
}

/// State directory (logs etc.): $XDG_STATE_HOME/wbridge or ~/.local/state/wbridge
pub fn state_dir() -> PathBuf {
    match std::env::var_os("XDG_STATE_HOME") {
        Some(base) if !base.is_empty() => PathBuf::from(base).join(APP_NAME),
        _ => home_dir().join(".local").join("state").join(APP_NAME),
    }
}

/// Per-user runtime directory for the socket.
pub fn runtime_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(base) if !base.is_empty() => PathBuf::from(base),
        _ => PathBuf::from("/tmp"),
    }
}

/// Path of the IPC socket the server binds and clients connect to.
pub fn socket_path() -> PathBuf {
    runtime_dir().join(SOCKET_FILENAME)
}

pub fn ensure_dirs() -> io::Result<()> {
    std::fs::create_dir_all(config_dir())?;
    std::fs::create_dir_all(state_dir())?;
    Ok(())
}
