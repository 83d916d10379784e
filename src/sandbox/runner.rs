use std::path::Path;

use anyhow::Result;

use crate::config::{LanguageConfig, LimitsConfig};

use super::{ExecutionOutcome, ProcessOutput, Stage, Submission};

/// Trait for different sandbox execution implementations
///
/// This trait abstracts the core functionality needed for compiling and running
/// user code in different environments - from full isolation with `isolate`
/// to simple process execution without sandboxing.
///
/// Every runner owns one scratch directory, so a runner must never be used by
/// two executions at the same time. Workers guarantee that by owning theirs.
pub trait SandboxRunner: Send + Sync {
    /// Creates a new sandbox runner instance with the given ID
    fn build(id: u8, scratch_root: &Path, limits: LimitsConfig) -> Result<Self>
    where
        Self: Sized;

    fn id(&self) -> u8;

    /// Resets the scratch directory and writes the source file into it
    fn prepare(&self, submission: &Submission, language: &LanguageConfig) -> Result<()>;

    /// Runs the compile command of `language`
    fn compile_source_code(&self, language: &LanguageConfig) -> Result<ProcessOutput>;

    /// Runs the program with `input` on stdin
    fn run_program(&self, language: &LanguageConfig, input: &str) -> Result<ProcessOutput>;

    /// Deletes every scratch artifact of the last execution
    fn cleanup(&self) -> Result<()>;

    /// Main entry point for running a submission
    ///
    /// Scratch artifacts are removed whether or not the execution succeeded.
    fn execute(&self, submission: &Submission, language: &LanguageConfig) -> Result<ExecutionOutcome> {
        let outcome = self
            .prepare(submission, language)
            .and_then(|()| compile_and_run(self, submission, language));

        if let Err(e) = self.cleanup() {
            log::warn!("Runner {} failed to clean scratch directory: {e}", self.id());
        }

        outcome
    }
}

fn compile_and_run<R: SandboxRunner + ?Sized>(
    runner: &R,
    submission: &Submission,
    language: &LanguageConfig,
) -> Result<ExecutionOutcome> {
    if language.is_compiled() {
        let compiled = runner.compile_source_code(language)?;
        if !compiled.success() {
            log::debug!("Runner {}: {} compilation failed", runner.id(), language.name);
            return Ok(ExecutionOutcome {
                stage: Stage::Compile,
                process: compiled,
            });
        }
    }

    let process = runner.run_program(language, &submission.input)?;
    Ok(ExecutionOutcome {
        stage: Stage::Run,
        process,
    })
}
