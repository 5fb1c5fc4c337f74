//! Build supervisor: runs a session's steps on a worker thread.
//!
//! The supervisor owns every piece of state shared with its worker: the
//! run state (doubling as the liveness indicator) and the stop flag of the
//! active run. Nothing is global, so independent supervisors can coexist.
//!
//! Message protocol, in order:
//! - `starting <step>` before each step
//! - exactly one terminal line: `build completed`,
//!   `build failed: <detail>` or `build stopped at user request`

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::errors::{BuildStepError, InvalidStateError};
use super::session::BuildSession;
use super::types::{BuildState, ContinueSignal, StepName};
use crate::logging::MessageSink;

/// Default interval between two checks of the external continue signal.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Terminal message for a run whose steps all succeeded.
pub const COMPLETED_MESSAGE: &str = "build completed";
/// Terminal message for a run stopped between steps.
pub const CANCELLED_MESSAGE: &str = "build stopped at user request";

/// Handle for stopping a running build.
///
/// Stopping is cooperative: the worker checks the flag between steps and
/// never interrupts a step in progress. Once set, the flag stays set for
/// the rest of the run.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop at the next step boundary.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// State shared between the supervisor and its worker.
#[derive(Default)]
struct RunShared {
    state: Mutex<BuildState>,
    finished: Condvar,
}

impl RunShared {
    fn finish(&self, final_state: BuildState) {
        *self.state.lock() = final_state;
        self.finished.notify_all();
    }
}

/// Bookkeeping for the current (or last) run.
struct ActiveRun {
    steps: Vec<StepName>,
    stop: StopHandle,
    worker: Option<JoinHandle<()>>,
}

/// Runs build steps in the background with cooperative cancellation.
///
/// At most one run is active per supervisor. `start_build` returns
/// immediately; the caller then either drives [`supervise`](Self::supervise)
/// with an external continue signal, or blocks on [`wait`](Self::wait).
///
/// # Example
///
/// ```ignore
/// let supervisor = BuildSupervisor::new(Arc::new(RecordingSink::new()));
/// supervisor.start_build(session, StepName::standard_sequence())?;
/// let outcome = supervisor.supervise(&continue_flag);
/// ```
pub struct BuildSupervisor {
    sink: Arc<dyn MessageSink>,
    poll_interval: Duration,
    shared: Arc<RunShared>,
    run: Mutex<Option<ActiveRun>>,
}

impl BuildSupervisor {
    /// Create an idle supervisor reporting into `sink`.
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            sink,
            poll_interval: DEFAULT_POLL_INTERVAL,
            shared: Arc::new(RunShared::default()),
            run: Mutex::new(None),
        }
    }

    /// Set the interval between checks of the continue signal.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn state(&self) -> BuildState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Steps of the current or most recent run.
    pub fn current_steps(&self) -> Vec<StepName> {
        self.run
            .lock()
            .as_ref()
            .map(|run| run.steps.clone())
            .unwrap_or_default()
    }

    /// Stop handle of the active run, if one is running.
    pub fn stop_handle(&self) -> Option<StopHandle> {
        if !self.is_running() {
            return None;
        }
        self.run.lock().as_ref().map(|run| run.stop.clone())
    }

    /// Start running `steps` against `session` on a new worker thread.
    ///
    /// Returns without waiting for any step. Fails if a run is already
    /// active; the active run is left untouched.
    pub fn start_build(
        &self,
        session: Arc<BuildSession>,
        steps: Vec<StepName>,
    ) -> Result<(), InvalidStateError> {
        let mut run = self.run.lock();
        {
            let mut state = self.shared.state.lock();
            if state.is_running() {
                tracing::warn!("Rejected build request: a build is already running");
                return Err(InvalidStateError::new(*state));
            }
            *state = BuildState::Running;
        }

        // The previous worker has reported already; reap its thread.
        if let Some(previous) = run.as_mut() {
            join_worker(previous);
        }

        let stop = StopHandle::new();
        let worker = BuildWorker {
            session,
            steps: steps.clone(),
            stop: stop.clone(),
            sink: Arc::clone(&self.sink),
            shared: Arc::clone(&self.shared),
        };

        tracing::info!("Starting build with {} steps", steps.len());
        let handle = thread::Builder::new()
            .name("songbook-build".to_string())
            .spawn(move || worker.run());

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Failed to spawn build worker: {}", e);
                self.sink
                    .message(&format!("build failed: cannot start build worker: {}", e));
                self.shared.finish(BuildState::Failed);
                None
            }
        };

        *run = Some(ActiveRun {
            steps,
            stop,
            worker: handle,
        });
        Ok(())
    }

    /// Ask the active run to stop before its next step.
    ///
    /// Idempotent; does nothing when no run is active.
    pub fn request_stop(&self) {
        if let Some(stop) = self.stop_handle() {
            if !stop.is_stop_requested() {
                tracing::info!("Stop requested; finishing the current step first");
            }
            stop.request_stop();
        }
    }

    /// Watch the active run until it ends, relaying stop requests.
    ///
    /// Each iteration checks `signal` and then waits up to one poll
    /// interval for the worker, waking early when the worker finishes. When
    /// the signal says stop, the run is asked to stop at its next step
    /// boundary. Returns the terminal state (or the current state when no
    /// run was active).
    pub fn supervise(&self, signal: &dyn ContinueSignal) -> BuildState {
        loop {
            if !self.is_running() {
                break;
            }

            if !signal.should_continue() {
                self.request_stop();
            }

            let mut state = self.shared.state.lock();
            if state.is_running() {
                self.shared
                    .finished
                    .wait_for(&mut state, self.poll_interval);
            }
        }

        self.reap();
        self.state()
    }

    /// Block until the active run ends, without polling any signal.
    pub fn wait(&self) -> BuildState {
        {
            let mut state = self.shared.state.lock();
            while state.is_running() {
                self.shared.finished.wait(&mut state);
            }
        }

        self.reap();
        self.state()
    }

    fn reap(&self) {
        if let Some(run) = self.run.lock().as_mut() {
            join_worker(run);
        }
    }
}

impl Drop for BuildSupervisor {
    fn drop(&mut self) {
        // The worker owns everything it needs; let it wind down on its own.
        self.request_stop();
    }
}

fn join_worker(run: &mut ActiveRun) {
    if let Some(handle) = run.worker.take() {
        if handle.join().is_err() {
            tracing::error!("Build worker thread panicked");
        }
    }
}

/// Everything the worker thread needs, moved into it at spawn.
struct BuildWorker {
    session: Arc<BuildSession>,
    steps: Vec<StepName>,
    stop: StopHandle,
    sink: Arc<dyn MessageSink>,
    shared: Arc<RunShared>,
}

/// How the step loop ended.
enum RunOutcome {
    Completed,
    Failed(BuildStepError),
    Cancelled { steps_run: usize },
}

impl BuildWorker {
    fn run(self) {
        let final_state = match panic::catch_unwind(AssertUnwindSafe(|| self.drive())) {
            Ok(state) => state,
            Err(payload) => {
                tracing::error!("Build worker panicked: {}", panic_message(payload.as_ref()));
                BuildState::Failed
            }
        };

        tracing::info!("Build finished: {}", final_state);
        self.shared.finish(final_state);
    }

    /// Run the steps and report the terminal message.
    fn drive(&self) -> BuildState {
        match self.execute_steps() {
            RunOutcome::Completed => {
                self.sink.message(COMPLETED_MESSAGE);
                BuildState::Completed
            }
            RunOutcome::Failed(error) => {
                tracing::error!("{}", error);
                self.sink.message(&format!("build failed: {}", error.message()));
                BuildState::Failed
            }
            RunOutcome::Cancelled { steps_run } => {
                tracing::info!(
                    "Build stopped after {}/{} steps",
                    steps_run,
                    self.steps.len()
                );
                self.sink.message(CANCELLED_MESSAGE);
                BuildState::Cancelled
            }
        }
    }

    fn execute_steps(&self) -> RunOutcome {
        for (i, step) in self.steps.iter().enumerate() {
            if self.stop.is_stop_requested() {
                return RunOutcome::Cancelled { steps_run: i };
            }

            self.sink.message(&format!("starting {}", step));

            let result = panic::catch_unwind(AssertUnwindSafe(|| self.session.run_step(step)));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(error)) => return RunOutcome::Failed(error),
                Err(payload) => {
                    let detail = format!("step panicked: {}", panic_message(payload.as_ref()));
                    return RunOutcome::Failed(BuildStepError::new(step.clone(), detail));
                }
            }
        }

        RunOutcome::Completed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
