//! Step executor trait definition.
//!
//! The executor is the only collaborator whose behavior varies by step:
//! given the session's context and a step name it performs the work and
//! either completes or fails with a descriptive [`StepError`].

use super::errors::StepResult;
use super::types::{BuildContext, StepName};

/// Trait for running individual build steps.
///
/// Executors are shared between the controlling thread and the build
/// worker, hence `Send + Sync`. A session never calls `execute`
/// concurrently with itself.
///
/// # Example
///
/// ```ignore
/// struct EchoExecutor;
///
/// impl StepExecutor for EchoExecutor {
///     fn execute(&self, ctx: &BuildContext, step: &StepName) -> StepResult<()> {
///         println!("{} for {}", step, ctx.output_basename());
///         Ok(())
///     }
/// }
/// ```
pub trait StepExecutor: Send + Sync {
    /// Perform one step against the context.
    fn execute(&self, ctx: &BuildContext, step: &StepName) -> StepResult<()>;

    /// Short name for logging.
    fn name(&self) -> &str {
        "executor"
    }
}

impl<F> StepExecutor for F
where
    F: Fn(&BuildContext, &StepName) -> StepResult<()> + Send + Sync,
{
    fn execute(&self, ctx: &BuildContext, step: &StepName) -> StepResult<()> {
        self(ctx, step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::errors::StepError;
    use crate::orchestrator::types::BuildOptions;
    use crate::songbook::SongbookDescriptor;

    fn context() -> BuildContext {
        let descriptor = SongbookDescriptor::from_entries("book.sb", Default::default());
        BuildContext::new(descriptor, BuildOptions::default(), "book".to_string())
    }

    #[test]
    fn closures_are_executors() {
        let executor: Box<dyn StepExecutor> = Box::new(|_ctx: &BuildContext, step: &StepName| {
            if step.as_str() == "pdf" {
                Err(StepError::other("no pdf today"))
            } else {
                Ok(())
            }
        });

        let ctx = context();
        assert!(executor.execute(&ctx, &StepName::from("tex")).is_ok());
        assert!(executor.execute(&ctx, &StepName::from("pdf")).is_err());
        assert_eq!(executor.name(), "executor");
    }
}
