//! Configuration management for songbook builds.
//!
//! This module provides:
//! - TOML-based configuration with logical sections
//! - Atomic file writes (write to temp, then rename)
//! - Section-level updates (only changed section is modified)
//! - Repair on load with automatic defaults
//!
//! # Example
//!
//! ```no_run
//! use sbk_core::config::{ConfigManager, ConfigSection};
//!
//! let mut config = ConfigManager::new(".config/sbk.toml");
//! config.load_or_create().unwrap();
//!
//! println!("Poll interval: {:?}", config.settings().poll_interval());
//!
//! config.settings_mut().paths.datadirs.push("/srv/songs".to_string());
//! config.update_section(ConfigSection::Paths).unwrap();
//! ```

mod manager;
mod settings;

pub use manager::{ConfigError, ConfigManager, ConfigResult};
pub use settings::{
    BuildSettings, ConfigSection, LoggingSettings, PathSettings, Settings, StepSettings,
};
