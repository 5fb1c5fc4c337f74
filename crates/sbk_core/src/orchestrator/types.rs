//! Core types for build orchestration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::songbook::SongbookDescriptor;

/// Identifier of one build phase (e.g. `tex`, `pdf`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Step sequence the desktop host requests for a full build.
    pub fn standard_sequence() -> Vec<StepName> {
        ["clean", "tex", "pdf", "sbx", "pdf", "clean"]
            .into_iter()
            .map(StepName::from)
            .collect()
    }

    /// Convert a list of plain strings into step names, keeping order.
    pub fn list<I, S>(names: I) -> Vec<StepName>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().map(StepName::new).collect()
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for StepName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a supervisor's current (or most recent) run.
///
/// `Idle` is the initial state. `Completed`, `Failed` and `Cancelled` are
/// resting states: like `Idle`, a new run may be started from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BuildState {
    pub fn is_running(&self) -> bool {
        matches!(self, BuildState::Running)
    }

    /// Whether a run ended in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildState::Completed | BuildState::Failed | BuildState::Cancelled
        )
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildState::Idle => "idle",
            BuildState::Running => "running",
            BuildState::Completed => "completed",
            BuildState::Failed => "failed",
            BuildState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How the songbook compiler reacts to errors inside songs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Try to fix or skip broken songs and keep going.
    #[default]
    Fix,
    /// Stop at the first broken song.
    Failonsong,
    /// Stop only when the whole book is unusable.
    Failonbook,
}

impl ErrorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorMode::Fix => "fix",
            ErrorMode::Failonsong => "failonsong",
            ErrorMode::Failonbook => "failonbook",
        }
    }
}

impl fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder configuration attached to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Extra data directories searched for songs and templates.
    pub datadirs: Vec<PathBuf>,
    /// Directory steps run in; `None` means the songbook's directory.
    pub working_dir: Option<PathBuf>,
    pub error_mode: ErrorMode,
    /// Allow steps to run shell escapes during compilation.
    pub unsafe_mode: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            datadirs: Vec::new(),
            working_dir: None,
            error_mode: ErrorMode::Fix,
            unsafe_mode: true,
        }
    }
}

/// Read-only context handed to step executors.
///
/// Built once by `BuildSession::new`; the derived fields are never changed
/// afterwards.
#[derive(Debug, Clone)]
pub struct BuildContext {
    descriptor: SongbookDescriptor,
    options: BuildOptions,
    output_basename: String,
    cache_enabled: bool,
}

impl BuildContext {
    pub(crate) fn new(
        descriptor: SongbookDescriptor,
        options: BuildOptions,
        output_basename: String,
    ) -> Self {
        Self {
            descriptor,
            options,
            output_basename,
            cache_enabled: true,
        }
    }

    pub fn descriptor(&self) -> &SongbookDescriptor {
        &self.descriptor
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Base name of every output artifact (`<basename>.tex`, `<basename>.pdf`).
    pub fn output_basename(&self) -> &str {
        &self.output_basename
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    /// Directory the steps run in.
    pub fn working_dir(&self) -> PathBuf {
        self.options
            .working_dir
            .clone()
            .unwrap_or_else(|| self.descriptor.source_dir())
    }

    pub fn source_path(&self) -> &Path {
        self.descriptor.source_path()
    }
}

/// External "keep building?" signal polled by the supervisor.
pub trait ContinueSignal: Send + Sync {
    /// `false` asks the supervisor to stop the current run.
    fn should_continue(&self) -> bool;
}

impl<F> ContinueSignal for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn should_continue(&self) -> bool {
        self()
    }
}

/// Signal that never asks for a stop.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysContinue;

impl ContinueSignal for AlwaysContinue {
    fn should_continue(&self) -> bool {
        true
    }
}

/// Shareable continue flag, e.g. flipped by a UI button or a Ctrl-C handler.
#[derive(Debug, Clone)]
pub struct ContinueFlag {
    flag: Arc<AtomicBool>,
}

impl ContinueFlag {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Ask the supervisor polling this flag to stop.
    pub fn stop(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Re-arm the flag before the next build.
    pub fn reset(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl Default for ContinueFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ContinueSignal for ContinueFlag {
    fn should_continue(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_sequence_matches_host_order() {
        let names: Vec<String> = StepName::standard_sequence()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, vec!["clean", "tex", "pdf", "sbx", "pdf", "clean"]);
    }

    #[test]
    fn terminal_states() {
        assert!(!BuildState::Idle.is_terminal());
        assert!(!BuildState::Running.is_terminal());
        assert!(BuildState::Completed.is_terminal());
        assert!(BuildState::Failed.is_terminal());
        assert!(BuildState::Cancelled.is_terminal());
    }

    #[test]
    fn error_mode_serializes_lowercase() {
        let json = serde_json::to_string(&ErrorMode::Failonsong).unwrap();
        assert_eq!(json, "\"failonsong\"");
    }

    #[test]
    fn continue_flag_round_trip() {
        let flag = ContinueFlag::new();
        let observer = flag.clone();
        assert!(observer.should_continue());

        flag.stop();
        assert!(!observer.should_continue());

        flag.reset();
        assert!(observer.should_continue());
    }
}
