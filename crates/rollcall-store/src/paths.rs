//! Default file locations shared by the daemon and the CLI.

use std::path::PathBuf;

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

/// `$XDG_DATA_HOME/rollcall`, or `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share").join("rollcall")
}

pub fn default_db_path() -> PathBuf {
    default_data_dir().join("rollcall.db")
}

/// `$XDG_CONFIG_HOME/rollcall/rollcalld.toml`, or under `~/.config`.
pub fn default_config_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join("rollcall/rollcalld.toml")
}
