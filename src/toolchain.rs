use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::config::LanguageConfig;

/// Languages a submission may be written in
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    Cpp,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Java => "java",
            Self::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(Self::Python),
            "java" => Ok(Self::Java),
            "cpp" => Ok(Self::Cpp),
            other => Err(anyhow!("Unsupported language: {other}")),
        }
    }
}

/// Lookup table from language tag to its toolchain
#[derive(Debug, Clone)]
pub struct ToolchainTable {
    entries: Vec<LanguageConfig>,
}

impl ToolchainTable {
    pub fn new(entries: Vec<LanguageConfig>) -> Self {
        Self { entries }
    }

    pub fn get(&self, language: Language) -> Option<&LanguageConfig> {
        self.entries.iter().find(|l| l.name == language)
    }

    /// Resolves a raw language tag as sent by a client
    pub fn resolve(&self, tag: &str) -> Option<&LanguageConfig> {
        tag.parse::<Language>().ok().and_then(|l| self.get(l))
    }

    pub fn iter(&self) -> impl Iterator<Item = &LanguageConfig> {
        self.entries.iter()
    }
}

/// Concrete values substituted into a command template
#[derive(Debug, Clone, Copy)]
pub struct Placeholders<'a> {
    pub input: &'a str,
    pub output: &'a str,
    pub dir: &'a str,
}

/// Applies template substitutions to every argument of a command
///
/// Each argument is scanned once, so substituted values are never expanded again.
pub fn apply_template(cmd_template: &[String], values: &Placeholders<'_>) -> Vec<String> {
    let mapping = [
        ("%INPUT%", values.input),
        ("%OUTPUT%", values.output),
        ("%DIR%", values.dir),
    ];

    cmd_template
        .iter()
        .map(|s| substitute(s, &mapping))
        .collect()
}

fn substitute(arg: &str, mapping: &[(&str, &str)]) -> String {
    let mut result = String::with_capacity(arg.len());
    let mut rest = arg;

    'scan: while !rest.is_empty() {
        for (token, value) in mapping {
            if let Some(tail) = rest.strip_prefix(token) {
                result.push_str(value);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            result.push(c);
        }
        rest = chars.as_str();
    }

    result
}
