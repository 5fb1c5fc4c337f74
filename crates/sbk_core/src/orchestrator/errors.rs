//! Error types for build orchestration.
//!
//! Errors carry context that chains through layers:
//! Session setup → Step → Operation → Detail

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::types::{BuildState, StepName};

/// The songbook descriptor could not be turned into a build session.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// The songbook file does not exist.
    #[error("Songbook not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The songbook file exists but could not be read.
    #[error("Failed to read songbook {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The songbook file is not a valid descriptor.
    #[error("Malformed songbook {}: {message}", path.display())]
    Malformed { path: PathBuf, message: String },

    /// A descriptor key has the wrong shape.
    #[error("Invalid songbook field '{key}': {message}")]
    InvalidField { key: String, message: String },

    /// No output name can be derived from the source path.
    #[error("Cannot derive an output name from {}", path.display())]
    MissingStem { path: PathBuf },
}

impl ConfigurationError {
    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_field(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Error raised by a step executor, with operation context.
#[derive(Error, Debug)]
pub enum StepError {
    /// An external command failed.
    #[error("{tool} failed with exit code {exit_code}: {message}")]
    CommandFailed {
        tool: String,
        exit_code: i32,
        message: String,
    },

    /// An external command was killed by a signal.
    #[error("{tool} terminated by signal {signal}: {message}")]
    CommandKilled {
        tool: String,
        signal: i32,
        message: String,
    },

    /// File I/O error.
    #[error("I/O error in {operation}: {source}")]
    IoError {
        operation: String,
        #[source]
        source: io::Error,
    },

    /// A required file was not found.
    #[error("Required file not found: {path}")]
    FileNotFound { path: String },

    /// A precondition was not met.
    #[error("Precondition not met: {0}")]
    PreconditionFailed(String),

    /// Generic step error with message.
    #[error("{0}")]
    Other(String),
}

impl StepError {
    /// Create a command failed error.
    pub fn command_failed(
        tool: impl Into<String>,
        exit_code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            tool: tool.into(),
            exit_code,
            message: message.into(),
        }
    }

    pub fn command_killed(tool: impl Into<String>, signal: i32, message: impl Into<String>) -> Self {
        Self::CommandKilled {
            tool: tool.into(),
            signal,
            message: message.into(),
        }
    }

    /// Create an I/O error with context.
    pub fn io_error(operation: impl Into<String>, source: io::Error) -> Self {
        Self::IoError {
            operation: operation.into(),
            source,
        }
    }

    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::PreconditionFailed(message.into())
    }

    /// Create a generic error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// A named step failed while a session was running it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Step '{step}' failed: {message}")]
pub struct BuildStepError {
    step: StepName,
    message: String,
}

impl BuildStepError {
    pub fn new(step: StepName, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
        }
    }

    /// Wrap an executor failure.
    pub fn from_step_error(step: StepName, source: &StepError) -> Self {
        Self::new(step, source.to_string())
    }

    pub fn step(&self) -> &StepName {
        &self.step
    }

    /// The underlying failure detail, without the step name.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A build was requested while another one is still running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot start a build while the supervisor is {state}")]
pub struct InvalidStateError {
    state: BuildState,
}

impl InvalidStateError {
    pub fn new(state: BuildState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }
}

/// Errors surfaced by the host-facing controller.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// No songbook has been set up.
    #[error("No songbook loaded")]
    NoSession,

    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Result type for step executors.
pub type StepResult<T> = Result<T, StepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_error_displays_context() {
        let err = StepError::command_failed("lualatex", 1, "Font not found");
        let msg = err.to_string();
        assert!(msg.contains("lualatex"));
        assert!(msg.contains("exit code 1"));
        assert!(msg.contains("Font not found"));
    }

    #[test]
    fn killed_command_names_the_signal() {
        let err = StepError::command_killed("lualatex", 9, "(no output)");
        assert_eq!(err.to_string(), "lualatex terminated by signal 9: (no output)");
    }

    #[test]
    fn build_step_error_keeps_step_and_detail_apart() {
        let err = BuildStepError::from_step_error(
            StepName::from("pdf"),
            &StepError::other("missing font"),
        );

        assert_eq!(err.step().as_str(), "pdf");
        assert_eq!(err.message(), "missing font");
        assert_eq!(err.to_string(), "Step 'pdf' failed: missing font");
    }

    #[test]
    fn configuration_error_names_the_file() {
        let err = ConfigurationError::malformed("/books/mybook.sb", "expected a mapping");
        let msg = err.to_string();
        assert!(msg.contains("mybook.sb"));
        assert!(msg.contains("expected a mapping"));
    }

    #[test]
    fn invalid_state_reports_current_state() {
        let err = InvalidStateError::new(BuildState::Running);
        assert_eq!(err.state(), BuildState::Running);
        assert!(err.to_string().contains("running"));
    }
}
