mod isolate_runner;
mod runner;
mod simple_runner;

// Re-export the trait and both implementations
pub use isolate_runner::IsolateRunner;
pub use runner::SandboxRunner;
pub use simple_runner::SimpleRunner;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use crate::config::{LimitsConfig, SandboxKind};

/// Source and stdin of one execution request
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub code: String,
    pub input: String,
}

/// Stage at which an execution stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compile,
    Run,
}

/// What one child process left behind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub truncated: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Result of running a submission through a toolchain
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub stage: Stage,
    pub process: ProcessOutput,
}

/// Creates a sandbox runner according to the requested kind
///
/// `Auto` picks an `IsolateRunner` when the `isolate` binary is on PATH,
/// and falls back to a `SimpleRunner` otherwise.
pub fn create_sandbox_runner(
    id: u8,
    kind: SandboxKind,
    scratch_root: &Path,
    limits: &LimitsConfig,
) -> Result<Box<dyn SandboxRunner>> {
    let use_isolate = match kind {
        SandboxKind::Simple => false,
        SandboxKind::Isolate => true,
        SandboxKind::Auto => isolate_available(),
    };

    if use_isolate {
        log::info!("Creating IsolateRunner {id} (full isolation mode)");
        let runner = IsolateRunner::build(id, scratch_root, limits.clone())?;
        Ok(Box::new(runner))
    } else {
        log::info!("Creating SimpleRunner {id} (no isolation)");
        let runner = SimpleRunner::build(id, scratch_root, limits.clone())?;
        Ok(Box::new(runner))
    }
}

pub fn isolate_available() -> bool {
    std::process::Command::new("which")
        .arg("isolate")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Keeps at most `limit` bytes of captured output
///
/// Returns the (lossily decoded) kept prefix and whether anything was cut.
pub(crate) fn cap_output(mut bytes: Vec<u8>, limit: usize) -> (String, bool) {
    let truncated = bytes.len() > limit;
    bytes.truncate(limit);
    (String::from_utf8_lossy(&bytes).into_owned(), truncated)
}

/// Removes everything inside `dir`, leaving the directory itself in place
pub(crate) fn clear_dir(dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
