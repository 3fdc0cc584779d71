//! Configuration module
//!
//! Handles daemon settings and the static node directory

mod settings;

pub use settings::{BusConfig, ConfigError, LabConfig, LoggingConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Config file name inside the config directory
pub const CONFIG_FILE: &str = "labmux.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "labmux", "labmux")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(CONFIG_FILE))
}
