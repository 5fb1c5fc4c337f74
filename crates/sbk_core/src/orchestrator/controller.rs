//! Host-facing build controller.
//!
//! The controller is what a host application talks to: it keeps the
//! builder options (data directories, working directory), the current
//! songbook session and one supervisor. Setting up a new songbook replaces
//! the current session; a build already running keeps its own reference to
//! the old one until it finishes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::errors::{ConfigurationError, ControllerError};
use super::executor::StepExecutor;
use super::session::BuildSession;
use super::supervisor::BuildSupervisor;
use super::types::{BuildOptions, BuildState, ContinueSignal, StepName};
use crate::logging::MessageSink;

/// Owns the current songbook session and drives builds for a host.
///
/// # Example
///
/// ```ignore
/// let mut controller = BuildController::new(options, executor, sink);
/// controller.setup_session("books/campfire.sb")?;
/// let outcome = controller.build_default(&continue_flag)?;
/// ```
pub struct BuildController {
    options: BuildOptions,
    executor: Arc<dyn StepExecutor>,
    supervisor: BuildSupervisor,
    session: Option<Arc<BuildSession>>,
}

impl BuildController {
    pub fn new(
        options: BuildOptions,
        executor: Arc<dyn StepExecutor>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            options,
            executor,
            supervisor: BuildSupervisor::new(sink),
            session: None,
        }
    }

    /// Set the interval at which the continue signal is polled.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.supervisor = self.supervisor.with_poll_interval(interval);
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn datadirs(&self) -> &[PathBuf] {
        &self.options.datadirs
    }

    /// Add one data directory. Takes effect at the next `setup_session`.
    pub fn add_datadir(&mut self, datadir: impl Into<PathBuf>) {
        self.options.datadirs.push(datadir.into());
    }

    /// Append several data directories, keeping the ones already set.
    pub fn set_datadirs<I, P>(&mut self, datadirs: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.options
            .datadirs
            .extend(datadirs.into_iter().map(Into::into));
    }

    /// Directory steps run in. Takes effect at the next `setup_session`.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.options.working_dir = Some(dir.into());
    }

    /// Load the songbook at `path` and make it the current session.
    ///
    /// On failure no session remains current, so a later build cannot
    /// silently reuse the previous songbook.
    pub fn setup_session(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigurationError> {
        let path = path.as_ref();
        self.session = None;

        let session = BuildSession::open(path, self.options.clone(), Arc::clone(&self.executor))
            .inspect_err(|e| tracing::error!("Songbook setup failed: {}", e))?;

        self.session = Some(Arc::new(session));
        Ok(())
    }

    /// Install an already prepared session as the current one.
    pub fn set_session(&mut self, session: BuildSession) {
        self.session = Some(Arc::new(session));
    }

    pub fn current_session(&self) -> Option<&Arc<BuildSession>> {
        self.session.as_ref()
    }

    pub fn supervisor(&self) -> &BuildSupervisor {
        &self.supervisor
    }

    /// Start `steps` on the current session without waiting.
    pub fn start(&self, steps: Vec<StepName>) -> Result<(), ControllerError> {
        let session = self.session.as_ref().ok_or(ControllerError::NoSession)?;
        self.supervisor.start_build(Arc::clone(session), steps)?;
        Ok(())
    }

    /// Run `steps` and supervise them until the run ends.
    pub fn build(
        &self,
        steps: Vec<StepName>,
        signal: &dyn ContinueSignal,
    ) -> Result<BuildState, ControllerError> {
        self.start(steps)?;
        Ok(self.supervisor.supervise(signal))
    }

    /// Run the standard step sequence.
    pub fn build_default(&self, signal: &dyn ContinueSignal) -> Result<BuildState, ControllerError> {
        self.build(StepName::standard_sequence(), signal)
    }

    /// Ask the running build to stop before its next step.
    pub fn stop(&self) {
        self.supervisor.request_stop();
    }

    pub fn is_building(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn state(&self) -> BuildState {
        self.supervisor.state()
    }
}
