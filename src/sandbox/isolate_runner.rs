use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};

use crate::config::{LanguageConfig, LimitsConfig, Second};
use crate::toolchain::{Placeholders, apply_template};

use super::{ProcessOutput, SandboxRunner, Submission, cap_output, clear_dir};

// Sandbox configuration constants
const COMPILE_MEMORY_LIMIT: u64 = 524288; // KB
const COMPILE_PROCESSES: u32 = 10;
const COMPILE_OPEN_FILES: u32 = 512;
const COMPILE_FILE_SIZE: u32 = 65536; // KB

// JVMs start a few dozen threads
const RUNTIME_PROCESSES: u32 = 64;
const RUNTIME_OPEN_FILES: u32 = 64;
const RUNTIME_FILE_SIZE: u32 = 16384; // KB

const WALL_TIME_SLACK: f64 = 0.5; // seconds

const SANDBOX_PATH: &str =
    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const BOX_DIR_INSIDE: &str = "/box";
const EXECUTABLE_NAME: &str = "main";
const STDIN_NAME: &str = "stdin.txt";
const STDOUT_NAME: &str = "stdout.txt";
const STDERR_NAME: &str = "stderr.txt";

/// Resource limits of one isolate invocation
#[derive(Debug)]
struct StageLimits {
    time: Second,
    memory_kb: u64,
    processes: u32,
    open_files: u32,
    file_size_kb: u32,
}

/// Execution facts isolate writes to its meta file
#[derive(Debug, Default, PartialEq)]
struct Meta {
    status: Option<String>,
    exit_code: Option<i32>,
    exit_signal: Option<i32>,
    time_wall: Option<f64>,
    message: Option<String>,
}

/// A sandbox environment for compiling and executing code safely using isolate
///
/// The IsolateRunner provides an isolated environment where user-submitted code can be
/// compiled and executed with resource limits and security restrictions using Linux isolate.
pub struct IsolateRunner {
    /// Unique identifier for this sandbox instance (the isolate box id)
    id: u8,
    /// Path to the sandbox's working directory (inside isolate)
    box_dir: PathBuf,
    /// Meta files live outside the box so user code cannot forge them
    meta_dir: PathBuf,
    limits: LimitsConfig,
}

impl SandboxRunner for IsolateRunner {
    fn build(id: u8, scratch_root: &Path, limits: LimitsConfig) -> Result<Self> {
        let meta_dir = scratch_root.join(format!("isolate-{id}"));
        fs::create_dir_all(&meta_dir)?;

        // A previous process may have left the box behind
        let _ = Self::isolate_command(id).arg("--cleanup").output();
        let box_dir = Self::initialize_isolate_sandbox(id)?;

        log::info!("IsolateRunner {id} initialized at {}", box_dir.display());
        Ok(Self {
            id,
            box_dir,
            meta_dir,
            limits,
        })
    }

    fn id(&self) -> u8 {
        self.id
    }

    fn prepare(&self, submission: &Submission, language: &LanguageConfig) -> Result<()> {
        self.cleanup()?;
        fs::write(
            self.box_dir.join(&language.file_name),
            format!("{}\n", &submission.code),
        )?;
        Ok(())
    }

    fn compile_source_code(&self, language: &LanguageConfig) -> Result<ProcessOutput> {
        let template = language
            .compile
            .as_ref()
            .ok_or_else(|| anyhow!("Language {} has no compile command", language.name))?;
        let command = generate_command(template, language);
        let limits = StageLimits {
            time: Second::from(self.limits.compile_time_limit),
            memory_kb: COMPILE_MEMORY_LIMIT.max(self.limits.memory_limit.0),
            processes: COMPILE_PROCESSES,
            open_files: COMPILE_OPEN_FILES,
            file_size_kb: COMPILE_FILE_SIZE,
        };

        self.run_in_box(&command, None, &limits, "compile.meta")
    }

    fn run_program(&self, language: &LanguageConfig, input: &str) -> Result<ProcessOutput> {
        let command = generate_command(&language.run, language);
        fs::write(self.box_dir.join(STDIN_NAME), input)?;
        let limits = StageLimits {
            time: Second::from(self.limits.run_time_limit),
            memory_kb: self.limits.memory_limit.0,
            processes: RUNTIME_PROCESSES,
            open_files: RUNTIME_OPEN_FILES,
            file_size_kb: RUNTIME_FILE_SIZE,
        };

        self.run_in_box(&command, Some(STDIN_NAME), &limits, "run.meta")
    }

    fn cleanup(&self) -> Result<()> {
        clear_dir(&self.meta_dir)?;
        self.reinit()
    }
}

impl IsolateRunner {
    fn isolate_command(id: u8) -> Command {
        let mut command = Command::new("isolate");
        command.arg("-b").arg(id.to_string()).arg("--cg");
        command
    }

    /// Initializes the isolate sandbox and returns the box directory
    fn initialize_isolate_sandbox(id: u8) -> Result<PathBuf> {
        let output = Self::isolate_command(id)
            .arg("--init")
            .output()
            .map_err(|e| anyhow!("Failed to spawn isolate --init: {}", e))?;

        if !output.status.success() {
            bail!(
                "isolate --init exited with non-zero status; stderr={}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let root_dir_absolute = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root_dir_absolute.is_empty() {
            bail!(
                "isolate --init produced empty stdout; stderr={}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(PathBuf::from(root_dir_absolute).join("box"))
    }

    /// Reinitializes the sandbox, which empties the box directory
    fn reinit(&self) -> Result<()> {
        let _ = Self::isolate_command(self.id).arg("--cleanup").output();
        let box_dir = Self::initialize_isolate_sandbox(self.id)?;
        if box_dir != self.box_dir {
            bail!(
                "isolate box {} moved from {} to {}",
                self.id,
                self.box_dir.display(),
                box_dir.display()
            );
        }

        log::debug!("Sandbox {} reinitialized", self.id);
        Ok(())
    }

    /// Runs `command` inside the box and collects its output files
    fn run_in_box(
        &self,
        command: &[String],
        stdin_name: Option<&str>,
        limits: &StageLimits,
        meta_name: &str,
    ) -> Result<ProcessOutput> {
        let meta_path = self.meta_dir.join(meta_name);
        let dir_args = if Path::new("/etc/alternatives").exists() {
            vec!["--dir=/etc/alternatives"]
        } else {
            vec![]
        };

        let mut isolate = Self::isolate_command(self.id);
        isolate
            .args(dir_args)
            .arg("--run")
            .arg(format!("--processes={}", limits.processes))
            .arg(format!("--open-files={}", limits.open_files))
            .arg(format!("--fsize={}", limits.file_size_kb))
            .arg(format!("--time={:.3}", limits.time.0))
            .arg(format!("--wall-time={:.3}", limits.time.0 + WALL_TIME_SLACK))
            .arg(format!("--cg-mem={}", limits.memory_kb))
            .args(["-E", SANDBOX_PATH, "-E", "HOME=/box"])
            .arg(format!("--meta={}", meta_path.display()))
            .args(["--silent", "-o", STDOUT_NAME, "-r", STDERR_NAME]);
        if let Some(stdin_name) = stdin_name {
            isolate.args(["-i", stdin_name]);
        }
        let script = shell_join(command);
        isolate.args(["--", "/bin/sh", "-c", script.as_str()]);

        let start_time = Instant::now();
        let status = isolate
            .status()
            .map_err(|e| anyhow!("Failed to spawn isolate --run: {e}"))?;
        let elapsed = start_time.elapsed();

        let meta_content = fs::read_to_string(&meta_path)
            .map_err(|e| anyhow!("Failed to read isolate meta file (exit {status}): {e}"))?;
        let meta = parse_meta(&meta_content);
        log::debug!("Runner {} meta: {meta:?}", self.id);

        if meta.status.as_deref() == Some("XX") {
            bail!(
                "isolate internal error: {}",
                meta.message.unwrap_or_default()
            );
        }

        let output_limit = self.limits.output_limit.0 as usize;
        let (stdout, stdout_truncated) = self.read_box_file(STDOUT_NAME, output_limit);
        let (mut stderr, stderr_truncated) = self.read_box_file(STDERR_NAME, output_limit);

        let timed_out = meta.status.as_deref() == Some("TO");
        if let (Some(signal), false) = (meta.exit_signal, timed_out) {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!("Killed by signal {signal}"));
            if let Some(message) = &meta.message {
                stderr.push_str(&format!(" ({message})"));
            }
        }

        let exit_code = match meta.status.as_deref() {
            None => Some(0),
            Some("RE") => meta.exit_code,
            _ => None,
        };

        Ok(ProcessOutput {
            stdout,
            stderr,
            exit_code,
            timed_out,
            truncated: stdout_truncated || stderr_truncated,
            elapsed: meta
                .time_wall
                .map(Duration::from_secs_f64)
                .unwrap_or(elapsed),
        })
    }

    fn read_box_file(&self, name: &str, limit: usize) -> (String, bool) {
        match fs::read(self.box_dir.join(name)) {
            Ok(bytes) => cap_output(bytes, limit),
            Err(e) => {
                log::warn!("Runner {}: failed to read {name}: {e}", self.id);
                (String::new(), false)
            }
        }
    }
}

/// Applies template substitutions with paths as seen from inside the box
fn generate_command(template: &[String], language: &LanguageConfig) -> Vec<String> {
    let executable = format!("{BOX_DIR_INSIDE}/{EXECUTABLE_NAME}");
    apply_template(
        template,
        &Placeholders {
            input: &language.file_name,
            output: &executable,
            dir: BOX_DIR_INSIDE,
        },
    )
}

/// Quotes each argument for `/bin/sh -c`, so PATH lookup happens inside the box
fn shell_join(command: &[String]) -> String {
    command
        .iter()
        .map(|arg| format!("'{}'", arg.replace('\'', r"'\''")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses isolate's `key:value` meta file
fn parse_meta(content: &str) -> Meta {
    let mut meta = Meta::default();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key {
            "status" => meta.status = Some(value.to_string()),
            "exitcode" => meta.exit_code = value.parse().ok(),
            "exitsig" => meta.exit_signal = value.parse().ok(),
            "time-wall" => meta.time_wall = value.parse().ok(),
            "message" => meta.message = Some(value.to_string()),
            _ => {}
        }
    }

    meta
}

impl Drop for IsolateRunner {
    fn drop(&mut self) {
        if let Err(e) = Self::isolate_command(self.id).arg("--cleanup").output() {
            log::warn!("Failed to clean up isolate box {}: {e}", self.id);
        }
    }
}
