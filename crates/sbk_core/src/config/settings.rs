//! Settings struct with TOML-based sections.
//!
//! Settings are organized into logical sections that map to TOML tables.
//! Each section can be updated independently for atomic section-level updates.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::{LogConfig, LogLevel};
use crate::orchestrator::{BuildOptions, ErrorMode, StepName};

/// Root settings structure containing all configuration sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Path-related settings.
    #[serde(default)]
    pub paths: PathSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Build supervision settings.
    #[serde(default)]
    pub build: BuildSettings,

    /// Step command lines.
    #[serde(default)]
    pub steps: StepSettings,
}

impl Settings {
    /// Builder options derived from the path and build sections.
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            datadirs: self.paths.datadirs.iter().map(PathBuf::from).collect(),
            working_dir: self.paths.working_dir.as_ref().map(PathBuf::from),
            error_mode: self.build.error_mode,
            unsafe_mode: self.build.unsafe_mode,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.build.poll_interval_ms.max(1))
    }

    pub fn default_steps(&self) -> Vec<StepName> {
        self.build.default_steps.clone()
    }
}

/// Directories used by builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Folder for log files.
    #[serde(default = "default_logs_folder")]
    pub logs_folder: String,

    /// Directory steps run in. Defaults to the songbook's directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Data directories searched for songs, templates and images.
    #[serde(default)]
    pub datadirs: Vec<String>,
}

fn default_logs_folder() -> String {
    ".logs".to_string()
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            logs_folder: default_logs_folder(),
            working_dir: None,
            datadirs: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Minimum level for application diagnostics.
    #[serde(default)]
    pub level: LogLevel,

    /// Prefix build log lines with timestamps.
    #[serde(default = "default_true")]
    pub show_timestamps: bool,

    /// Also write diagnostics to a daily rolling file in the logs folder.
    #[serde(default = "default_true")]
    pub log_to_file: bool,

    /// Number of recent lines kept for error diagnosis.
    #[serde(default = "default_error_tail")]
    pub error_tail: u32,
}

fn default_true() -> bool {
    true
}

fn default_error_tail() -> u32 {
    20
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            show_timestamps: true,
            log_to_file: true,
            error_tail: default_error_tail(),
        }
    }
}

impl LoggingSettings {
    /// Logger configuration for a per-build log.
    ///
    /// Build logs always keep info lines so supervisor messages are never
    /// filtered out.
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.level.min(LogLevel::Info),
            error_tail: self.error_tail as usize,
            show_timestamps: self.show_timestamps,
            ..LogConfig::default()
        }
    }
}

/// Build supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    /// How often the host is asked whether to continue, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Steps run when none are given.
    #[serde(default = "StepName::standard_sequence")]
    pub default_steps: Vec<StepName>,

    /// How the renderer handles song errors.
    #[serde(default)]
    pub error_mode: ErrorMode,

    /// Let the renderer run arbitrary template code.
    #[serde(default = "default_true")]
    pub unsafe_mode: bool,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            default_steps: StepName::standard_sequence(),
            error_mode: ErrorMode::default(),
            unsafe_mode: true,
        }
    }
}

/// Command lines for each step.
///
/// `clean` has no command by default and is handled natively by removing
/// `<basename>.<ext>` for each listed extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSettings {
    /// Extensions removed by the built-in clean step.
    #[serde(default = "default_clean_extensions")]
    pub clean_extensions: Vec<String>,

    /// Step name to argument vector.
    #[serde(default = "default_commands")]
    pub commands: BTreeMap<String, Vec<String>>,
}

fn default_clean_extensions() -> Vec<String> {
    ["aux", "log", "out", "sxc", "sxd", "toc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_commands() -> BTreeMap<String, Vec<String>> {
    let command = |args: &[&str]| args.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let mut commands = BTreeMap::new();
    commands.insert(
        "tex".to_string(),
        command(&["songbook", "--steps=tex", "{source}"]),
    );
    commands.insert(
        "pdf".to_string(),
        command(&["lualatex", "-interaction=nonstopmode", "{basename}.tex"]),
    );
    commands.insert(
        "sbx".to_string(),
        command(&["songbook", "--steps=sbx", "{source}"]),
    );
    commands
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            clean_extensions: default_clean_extensions(),
            commands: default_commands(),
        }
    }
}

/// Configuration sections for targeted updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSection {
    Paths,
    Logging,
    Build,
    Steps,
}

impl ConfigSection {
    /// Get the TOML table name for this section.
    pub fn table_name(&self) -> &'static str {
        match self {
            ConfigSection::Paths => "paths",
            ConfigSection::Logging => "logging",
            ConfigSection::Build => "build",
            ConfigSection::Steps => "steps",
        }
    }

    /// Every section, in file order.
    pub fn all() -> [ConfigSection; 4] {
        [
            ConfigSection::Paths,
            ConfigSection::Logging,
            ConfigSection::Build,
            ConfigSection::Steps,
        ]
    }

    /// Comment written above the section in generated files.
    pub fn description(&self) -> &'static str {
        match self {
            ConfigSection::Paths => "Logs, working directory and data directories",
            ConfigSection::Logging => "Logging configuration",
            ConfigSection::Build => "Build supervision",
            ConfigSection::Steps => "Command line for each build step",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_serialize() {
        let settings = Settings::default();
        let toml_str = toml::to_string_pretty(&settings).unwrap();
        assert!(toml_str.contains("[paths]"));
        assert!(toml_str.contains("[build]"));
        assert!(toml_str.contains("poll_interval_ms = 2000"));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let settings: Settings = toml::from_str(
            "[build]\nerror_mode = \"failonsong\"\n[paths]\ndatadirs = [\"/srv/songs\"]\n",
        )
        .unwrap();

        assert_eq!(settings.build.error_mode, ErrorMode::Failonsong);
        assert_eq!(settings.build.poll_interval_ms, 2000);
        assert_eq!(settings.default_steps(), StepName::standard_sequence());
        assert_eq!(settings.paths.logs_folder, ".logs");
        assert!(settings.steps.commands.contains_key("pdf"));
    }

    #[test]
    fn build_options_follow_settings() {
        let mut settings = Settings::default();
        settings.paths.datadirs = vec!["/a".into(), "/b".into()];
        settings.paths.working_dir = Some("/tmp/build".into());
        settings.build.unsafe_mode = false;

        let options = settings.build_options();
        assert_eq!(options.datadirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(options.working_dir, Some(PathBuf::from("/tmp/build")));
        assert!(!options.unsafe_mode);
        assert_eq!(options.error_mode, ErrorMode::Fix);
    }

    #[test]
    fn build_log_keeps_info_lines() {
        let mut logging = LoggingSettings::default();
        logging.level = LogLevel::Error;
        assert_eq!(logging.log_config().level, LogLevel::Info);

        logging.level = LogLevel::Debug;
        assert_eq!(logging.log_config().level, LogLevel::Debug);
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let mut settings = Settings::default();
        settings.build.poll_interval_ms = 0;
        assert_eq!(settings.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn section_table_names() {
        let names: Vec<_> = ConfigSection::all().iter().map(|s| s.table_name()).collect();
        assert_eq!(names, vec!["paths", "logging", "build", "steps"]);
    }
}
