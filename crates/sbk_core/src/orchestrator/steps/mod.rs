//! Stock step executors.

mod command;

pub use command::{CommandStepExecutor, CLEAN_STEP};
