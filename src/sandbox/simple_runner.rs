use std::fs;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::{LanguageConfig, LimitsConfig};
use crate::toolchain::{Placeholders, apply_template};

use super::{ProcessOutput, SandboxRunner, Submission, cap_output, clear_dir};

const READ_CHUNK: usize = 8192;
/// How long output pipes may stay open after the program has been reaped
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// A simple runner that executes code without sandboxing
///
/// SimpleRunner provides basic code compilation and execution without the security
/// restrictions of isolate. It enforces wall-clock timeouts (killing the whole
/// process group) and caps captured output, but has no memory, file system, or
/// permission controls. This is intended for development/testing environments
/// where security isolation is not critical.
pub struct SimpleRunner {
    /// Unique identifier for this instance
    id: u8,
    /// Path to the working directory for this runner
    work_dir: PathBuf,
    limits: LimitsConfig,
}

impl SandboxRunner for SimpleRunner {
    fn build(id: u8, scratch_root: &Path, limits: LimitsConfig) -> Result<Self> {
        let work_dir = scratch_root.join(format!("simple-{id}"));
        fs::create_dir_all(&work_dir)?;
        let work_dir = work_dir.canonicalize()?;

        log::info!("SimpleRunner {id} initialized at {}", work_dir.display());
        log::warn!(
            "SimpleRunner provides NO security isolation - use only in trusted environments"
        );

        Ok(Self {
            id,
            work_dir,
            limits,
        })
    }

    fn id(&self) -> u8 {
        self.id
    }

    fn prepare(&self, submission: &Submission, language: &LanguageConfig) -> Result<()> {
        self.cleanup()?;
        fs::write(
            self.work_dir.join(&language.file_name),
            format!("{}\n", &submission.code),
        )?;
        Ok(())
    }

    fn compile_source_code(&self, language: &LanguageConfig) -> Result<ProcessOutput> {
        let template = language
            .compile
            .as_ref()
            .ok_or_else(|| anyhow!("Language {} has no compile command", language.name))?;
        let command = self.generate_command(template, language);

        self.execute_command(&command, "", self.limits.compile_time_limit.into())
    }

    fn run_program(&self, language: &LanguageConfig, input: &str) -> Result<ProcessOutput> {
        let command = self.generate_command(&language.run, language);
        self.execute_command(&command, input, self.limits.run_time_limit.into())
    }

    fn cleanup(&self) -> Result<()> {
        if self.work_dir.exists() {
            clear_dir(&self.work_dir)?;
        } else {
            fs::create_dir_all(&self.work_dir)?;
        }
        Ok(())
    }
}

impl SimpleRunner {
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Generates a command by applying template substitutions with absolute paths
    fn generate_command(&self, template: &[String], language: &LanguageConfig) -> Vec<String> {
        let source_path = self.work_dir.join(&language.file_name);
        let executable_path = self.work_dir.join("main");
        let dir = self.work_dir.to_string_lossy();

        apply_template(
            template,
            &Placeholders {
                input: &source_path.to_string_lossy(),
                output: &executable_path.to_string_lossy(),
                dir: &dir,
            },
        )
    }

    /// Runs `command` to completion on the current runtime
    ///
    /// Must be called from a blocking context (e.g. `spawn_blocking`).
    fn execute_command(
        &self,
        command: &[String],
        input: &str,
        time_limit: Duration,
    ) -> Result<ProcessOutput> {
        let output_limit = self.limits.output_limit.0 as usize;
        tokio::runtime::Handle::current().block_on(spawn_and_collect(
            command,
            &self.work_dir,
            input,
            time_limit,
            output_limit,
        ))
    }
}

/// Spawns `command` in its own process group, feeds stdin, and collects capped output
///
/// When `time_limit` elapses the whole process group is killed and whatever
/// was captured up to that point is returned with `timed_out` set.
async fn spawn_and_collect(
    command: &[String],
    work_dir: &Path,
    input: &str,
    time_limit: Duration,
    output_limit: usize,
) -> Result<ProcessOutput> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow!("Empty command"))?;

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .current_dir(work_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let start_time = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn `{program}`: {e}"))?;
    let pid = child.id();

    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("Child stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("Child stderr was not captured"))?;

    // Cancelled once the child has been reaped and its process group killed
    let exited = CancellationToken::new();

    let input = input.as_bytes().to_vec();
    let feed_stdin = async {
        if let Some(mut stdin) = stdin {
            tokio::select! {
                written = stdin.write_all(&input) => {
                    // The program may exit without reading stdin; a broken pipe is expected then
                    if let Err(e) = written {
                        log::debug!("Stopped writing stdin: {e}");
                    }
                }
                _ = exited.cancelled() => log::debug!("Program exited before reading all of stdin"),
            }
        }
    };

    let wait_child = async {
        let waited = timeout(time_limit, child.wait()).await;
        // Reap any background processes left in the group either way
        kill_process_group(pid);
        let waited = match waited {
            Ok(status) => status.map(|s| (s, false)),
            Err(_) => {
                child.start_kill().ok();
                child.wait().await.map(|s| (s, true))
            }
        };
        exited.cancel();
        waited
    };

    let (_, stdout, stderr, waited) = tokio::join!(
        feed_stdin,
        read_capped(stdout, output_limit, &exited),
        read_capped(stderr, output_limit, &exited),
        wait_child,
    );
    let elapsed = start_time.elapsed();

    let (status, timed_out): (ExitStatus, bool) = waited?;
    let (stdout, stdout_truncated) = stdout?;
    let (stderr, stderr_truncated) = stderr?;

    Ok(ProcessOutput {
        stdout,
        stderr,
        exit_code: if timed_out { None } else { status.code() },
        timed_out,
        truncated: stdout_truncated || stderr_truncated,
        elapsed,
    })
}

/// Reads a stream to its end, keeping at most `limit` bytes
///
/// Keeps draining past the limit so the writer never blocks on a full pipe.
/// Once `exited` fires the stream gets `DRAIN_GRACE` to reach EOF. A process
/// that left the group (e.g. via `setsid`) may hold the pipe open forever, so
/// after the grace period the pipe is dropped and the bytes read so far are kept.
async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
    exited: &CancellationToken,
) -> std::io::Result<(String, bool)> {
    let mut kept = Vec::with_capacity(limit.min(READ_CHUNK));
    let mut buf = [0u8; READ_CHUNK];
    let mut overflowed = false;

    let deadline = async {
        exited.cancelled().await;
        tokio::time::sleep(DRAIN_GRACE).await;
    };
    tokio::pin!(deadline);

    loop {
        let n = tokio::select! {
            read = reader.read(&mut buf) => read?,
            _ = &mut deadline => {
                log::warn!("Output pipe still open {DRAIN_GRACE:?} after exit, dropping it");
                break;
            }
        };
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        if n > room {
            overflowed = true;
        }
        kept.extend_from_slice(&buf[..n.min(room)]);
    }

    let (text, _) = cap_output(kept, limit);
    Ok((text, overflowed))
}

fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // SAFETY: killpg only sends a signal; the group was created for this child
        // via `process_group(0)`, so its id equals the child's pid. ESRCH
        // (group already gone) is ignored.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}
