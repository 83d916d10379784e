use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::toolchain::Language;

#[derive(Parser, Debug)]
#[command(name = "coderun", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to an optional JSON configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<PathBuf>,

    /// Number of execution workers
    #[arg(long = "workers", short = 'w', default_value_t = 2)]
    pub workers: u8,

    /// Which runner executes submitted code
    #[arg(long = "sandbox", value_enum, default_value_t = SandboxKind::Auto)]
    pub sandbox: SandboxKind,
}

impl CliArgs {
    /// Load the configuration from the specified file, or the built-in one
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let config = match &self.config_path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SandboxKind {
    /// Use `isolate` when it is installed, plain processes otherwise
    Auto,
    /// Plain child processes with a timeout and an output cap
    Simple,
    /// Linux `isolate` boxes
    Isolate,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub languages: Vec<LanguageConfig>,
    /// Root under which every runner gets its scratch directory
    pub scratch_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
            languages: default_languages(),
            scratch_dir: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Unable to open config file {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("Malformed config file {}", path.display()))
    }

    /// Rejects toolchain tables the runners cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.languages.is_empty() {
            bail!("At least one language must be configured");
        }

        let mut seen = HashSet::new();
        for language in &self.languages {
            if !seen.insert(language.name) {
                bail!("Language {} is configured twice", language.name);
            }
            if language.file_name.is_empty()
                || language.file_name.contains('/')
                || language.file_name.starts_with('.')
            {
                bail!(
                    "Language {} has an invalid source file name {:?}",
                    language.name,
                    language.file_name
                );
            }
            if language.run.is_empty() {
                bail!("Language {} has an empty run command", language.name);
            }
            if language.compile.as_ref().is_some_and(Vec::is_empty) {
                bail!("Language {} has an empty compile command", language.name);
            }
        }

        if self.limits.output_limit.0 == 0 {
            bail!("Output limit must not be 0");
        }

        Ok(())
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(default_scratch_root)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub compile_time_limit: MicroSecond,
    pub run_time_limit: MicroSecond,
    /// Captured bytes kept per stream
    pub output_limit: ByteSize,
    /// Only enforced by the isolate runner
    pub memory_limit: KiloByte,
    pub max_code_size: ByteSize,
    pub max_queue: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            compile_time_limit: MicroSecond(10_000_000),
            run_time_limit: MicroSecond(5_000_000),
            output_limit: ByteSize(64 * 1024),
            memory_limit: KiloByte(262_144),
            max_code_size: ByteSize(64 * 1024),
            max_queue: 64,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MicroSecond(pub u64);

impl From<MicroSecond> for Duration {
    fn from(value: MicroSecond) -> Self {
        Duration::from_micros(value.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Second(pub f64);

impl From<MicroSecond> for Second {
    fn from(value: MicroSecond) -> Self {
        Second(value.0 as f64 / 1_000_000.0)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KiloByte(pub u64);

/// One row of the toolchain table.
///
/// Command templates accept the placeholders `%INPUT%` (source file),
/// `%OUTPUT%` (executable) and `%DIR%` (scratch directory).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LanguageConfig {
    pub name: Language,
    pub file_name: String,
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
}

impl LanguageConfig {
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

pub fn default_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig {
            name: Language::Python,
            file_name: "main.py".to_string(),
            compile: None,
            run: strings(&["python3", "%INPUT%"]),
        },
        LanguageConfig {
            name: Language::Java,
            file_name: "Main.java".to_string(),
            compile: Some(strings(&["javac", "%INPUT%"])),
            run: strings(&["java", "-cp", "%DIR%", "Main"]),
        },
        LanguageConfig {
            name: Language::Cpp,
            file_name: "main.cpp".to_string(),
            compile: Some(strings(&["g++", "-O2", "-o", "%OUTPUT%", "%INPUT%"])),
            run: strings(&["%OUTPUT%"]),
        },
    ]
}

fn default_scratch_root() -> PathBuf {
    use directories::ProjectDirs;

    match ProjectDirs::from("", "", "coderun") {
        Some(proj_dirs) => proj_dirs.cache_dir().join("scratch"),
        None => std::env::temp_dir().join("coderun"),
    }
}
