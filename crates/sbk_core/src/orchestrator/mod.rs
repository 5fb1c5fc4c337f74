//! Build orchestration for songbook pipelines.
//!
//! This module runs an ordered list of named build steps against a
//! prepared songbook session, on a worker thread, with status reporting
//! and cooperative cancellation.
//!
//! # Architecture
//!
//! ```text
//! BuildController (host facade, current session)
//!     └── BuildSupervisor (one run at a time, stop flag, polling)
//!             └── worker thread
//!                     └── BuildSession::run_step
//!                             └── StepExecutor (clean, tex, pdf, sbx, ...)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sbk_core::orchestrator::{BuildSession, BuildSupervisor, BuildOptions, StepName};
//!
//! let session = BuildSession::open("campfire.sb", BuildOptions::default(), executor)?;
//! let supervisor = BuildSupervisor::new(sink);
//!
//! supervisor.start_build(Arc::new(session), StepName::standard_sequence())?;
//! let outcome = supervisor.supervise(&continue_flag);
//! println!("Build {}", outcome);
//! ```

mod controller;
mod errors;
mod executor;
mod session;
pub mod steps;
mod supervisor;
mod types;

pub use controller::BuildController;
pub use errors::{
    BuildStepError, ConfigurationError, ControllerError, InvalidStateError, StepError, StepResult,
};
pub use executor::StepExecutor;
pub use session::BuildSession;
pub use steps::{CommandStepExecutor, CLEAN_STEP};
pub use supervisor::{
    BuildSupervisor, StopHandle, CANCELLED_MESSAGE, COMPLETED_MESSAGE, DEFAULT_POLL_INTERVAL,
};
pub use types::{
    AlwaysContinue, BuildContext, BuildOptions, BuildState, ContinueFlag, ContinueSignal,
    ErrorMode, StepName,
};
