//! Build session: a prepared songbook context plus the executor that runs
//! its steps.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::errors::{BuildStepError, ConfigurationError};
use super::executor::StepExecutor;
use super::types::{BuildContext, BuildOptions, StepName};
use crate::songbook::SongbookDescriptor;

/// One songbook prepared for building.
///
/// The context is fixed at construction; `run_step` only delegates to the
/// executor and may be called any number of times. Step ordering is the
/// caller's business.
pub struct BuildSession {
    context: BuildContext,
    executor: Arc<dyn StepExecutor>,
}

impl BuildSession {
    /// Prepare a session from a loaded descriptor.
    ///
    /// Validates the descriptor, derives the output basename from the
    /// source file stem and enables the cache.
    pub fn new(
        descriptor: SongbookDescriptor,
        options: BuildOptions,
        executor: Arc<dyn StepExecutor>,
    ) -> Result<Self, ConfigurationError> {
        descriptor.validate()?;

        let output_basename = descriptor
            .file_stem()
            .map(str::to_string)
            .ok_or_else(|| ConfigurationError::MissingStem {
                path: descriptor.source_path().to_path_buf(),
            })?;

        tracing::info!(
            "Songbook session ready: {} -> {}",
            descriptor.source_path().display(),
            output_basename
        );

        Ok(Self {
            context: BuildContext::new(descriptor, options, output_basename),
            executor,
        })
    }

    /// Load the songbook at `path` and prepare a session for it.
    pub fn open(
        path: impl AsRef<Path>,
        options: BuildOptions,
        executor: Arc<dyn StepExecutor>,
    ) -> Result<Self, ConfigurationError> {
        let descriptor = SongbookDescriptor::load(path)?;
        Self::new(descriptor, options, executor)
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    pub fn output_basename(&self) -> &str {
        self.context.output_basename()
    }

    pub fn cache_enabled(&self) -> bool {
        self.context.cache_enabled()
    }

    /// Run one named step.
    ///
    /// Executor failures are wrapped with the step name. Side effects the
    /// step already produced are left in place.
    pub fn run_step(&self, step: &StepName) -> Result<(), BuildStepError> {
        tracing::debug!("Running step '{}' with {}", step, self.executor.name());
        self.executor
            .execute(&self.context, step)
            .map_err(|e| BuildStepError::from_step_error(step.clone(), &e))
    }
}

impl fmt::Debug for BuildSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildSession")
            .field("context", &self.context)
            .field("executor", &self.executor.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::errors::{StepError, StepResult};
    use parking_lot::Mutex;
    use std::fs;
    use tempfile::tempdir;

    #[derive(Default)]
    struct ScriptedExecutor {
        calls: Mutex<Vec<String>>,
    }

    impl StepExecutor for ScriptedExecutor {
        fn execute(&self, ctx: &BuildContext, step: &StepName) -> StepResult<()> {
            self.calls
                .lock()
                .push(format!("{}:{}", ctx.output_basename(), step));
            match step.as_str() {
                "pdf" => Err(StepError::command_failed("lualatex", 1, "missing font")),
                _ => Ok(()),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn descriptor(path: &str) -> SongbookDescriptor {
        SongbookDescriptor::parse(path, "book:\n  template: patacrep.tex\n").unwrap()
    }

    #[test]
    fn derives_basename_and_cache() {
        let session = BuildSession::new(
            descriptor("/books/campfire.sb"),
            BuildOptions::default(),
            Arc::new(ScriptedExecutor::default()),
        )
        .unwrap();

        assert_eq!(session.output_basename(), "campfire");
        assert!(session.cache_enabled());
        assert_eq!(session.context().source_path(), Path::new("/books/campfire.sb"));
    }

    #[test]
    fn run_step_delegates_to_executor() {
        let executor = Arc::new(ScriptedExecutor::default());
        let session = BuildSession::new(
            descriptor("campfire.sb"),
            BuildOptions::default(),
            executor.clone(),
        )
        .unwrap();

        session.run_step(&StepName::from("tex")).unwrap();
        session.run_step(&StepName::from("tex")).unwrap();

        assert_eq!(*executor.calls.lock(), vec!["campfire:tex", "campfire:tex"]);
    }

    #[test]
    fn run_step_wraps_failures_with_step_name() {
        let session = BuildSession::new(
            descriptor("campfire.sb"),
            BuildOptions::default(),
            Arc::new(ScriptedExecutor::default()),
        )
        .unwrap();

        let err = session.run_step(&StepName::from("pdf")).unwrap_err();
        assert_eq!(err.step().as_str(), "pdf");
        assert!(err.message().contains("missing font"));
    }

    #[test]
    fn open_missing_file_fails_with_configuration_error() {
        let dir = tempdir().unwrap();
        let result = BuildSession::open(
            dir.path().join("missing.sb"),
            BuildOptions::default(),
            Arc::new(ScriptedExecutor::default()),
        );
        assert!(matches!(result, Err(ConfigurationError::NotFound { .. })));
    }

    #[test]
    fn open_malformed_file_fails_with_configuration_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.sb");
        fs::write(&path, "content: [a, b\n").unwrap();

        let result = BuildSession::open(
            &path,
            BuildOptions::default(),
            Arc::new(ScriptedExecutor::default()),
        );
        assert!(matches!(result, Err(ConfigurationError::Malformed { .. })));
    }

    #[test]
    fn invalid_fields_fail_setup() {
        let descriptor = SongbookDescriptor::parse("x.sb", "book: [1, 2]\n").unwrap();
        let result = BuildSession::new(
            descriptor,
            BuildOptions::default(),
            Arc::new(ScriptedExecutor::default()),
        );
        assert!(matches!(result, Err(ConfigurationError::InvalidField { .. })));
    }

    #[test]
    fn path_without_stem_fails_setup() {
        let descriptor = SongbookDescriptor::from_entries("/", Default::default());
        let result = BuildSession::new(
            descriptor,
            BuildOptions::default(),
            Arc::new(ScriptedExecutor::default()),
        );
        assert!(matches!(result, Err(ConfigurationError::MissingStem { .. })));
    }
}
