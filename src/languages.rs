//! Language profiles for compilation and execution

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Placeholder for the staged source file path
pub const SOURCE_PLACEHOLDER: &str = "{src}";
/// Placeholder for the writable build directory
pub const OUTPUT_PLACEHOLDER: &str = "{out}";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How to build and run one supported language
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageProfile {
    /// Canonical language name (e.g., "python")
    pub name: String,
    /// Name of the source file (e.g., "main.cpp")
    pub source_file: String,
    /// Compile command template (None for interpreted languages)
    pub compile_command: Option<Vec<String>>,
    /// Run command template
    pub run_command: Vec<String>,
    /// Container image used by the sandbox
    pub image: String,
    /// Default wall-clock limit for one run
    pub timeout: Duration,
    /// Whether the local executor may run this language
    pub local: bool,
}

impl LanguageProfile {
    pub fn is_compiled(&self) -> bool {
        self.compile_command.is_some()
    }

    /// Compile argv with placeholders substituted
    pub fn compile_argv(&self, src: &str, out: &str) -> Option<Vec<String>> {
        self.compile_command
            .as_ref()
            .map(|cmd| expand_command(cmd, src, out))
    }

    /// Run argv with placeholders substituted
    pub fn run_argv(&self, src: &str, out: &str) -> Vec<String> {
        expand_command(&self.run_command, src, out)
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    source_file: String,
    compile_command: Option<String>,
    run_command: String,
    image: String,
    timeout_secs: Option<u64>,
    #[serde(default = "default_local")]
    local: bool,
    #[serde(default)]
    aliases: Vec<String>,
}

fn default_local() -> bool {
    true
}

/// Lookup table from normalized language key to profile.
///
/// Built once at startup and never mutated, so it can be shared freely.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: HashMap<String, Arc<LanguageProfile>>,
    names: Vec<String>,
}

impl LanguageRegistry {
    /// Registry from the language table compiled into the binary
    pub fn builtin() -> anyhow::Result<Self> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::from_toml_str(content)
    }

    /// Registry from a TOML file on disk
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read language config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid language config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawLanguageConfig> = toml::from_str(content)?;

        let mut profiles: HashMap<String, Arc<LanguageProfile>> = HashMap::new();
        let mut names = Vec::with_capacity(raw_configs.len());

        for (name, raw) in raw_configs {
            let name = normalize_key(&name);
            let run_command = into_command(&raw.run_command);
            if run_command.is_empty() {
                anyhow::bail!("Empty run command for {}", name);
            }
            let compile_command = match raw.compile_command {
                Some(cmd) => {
                    let cmd = into_command(&cmd);
                    if cmd.is_empty() {
                        anyhow::bail!("Empty compile command for {}", name);
                    }
                    Some(cmd)
                }
                None => None,
            };

            let profile = Arc::new(LanguageProfile {
                name: name.clone(),
                source_file: raw.source_file,
                compile_command,
                run_command,
                image: raw.image,
                timeout: Duration::from_secs(raw.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
                local: raw.local,
            });

            let keys = std::iter::once(name.clone()).chain(raw.aliases.iter().map(|a| normalize_key(a)));
            for key in keys {
                if let Some(existing) = profiles.get(&key) {
                    if existing.name != name {
                        anyhow::bail!(
                            "Language key '{}' maps to both {} and {}",
                            key,
                            existing.name,
                            name
                        );
                    }
                }
                profiles.insert(key, profile.clone());
            }

            names.push(name);
        }

        names.sort();

        Ok(Self { profiles, names })
    }

    /// Resolve a language key (case-insensitive, aliases folded) to its profile
    pub fn resolve(&self, language: &str) -> Result<Arc<LanguageProfile>> {
        self.profiles
            .get(&normalize_key(language))
            .cloned()
            .ok_or_else(|| Error::UnsupportedLanguage(language.to_string()))
    }

    /// Canonical names of all supported languages, sorted
    pub fn languages(&self) -> &[String] {
        &self.names
    }
}

fn normalize_key(language: &str) -> String {
    language.trim().to_lowercase()
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

fn expand_command(template: &[String], src: &str, out: &str) -> Vec<String> {
    template
        .iter()
        .map(|part| {
            part.replace(SOURCE_PLACEHOLDER, src)
                .replace(OUTPUT_PLACEHOLDER, out)
        })
        .collect()
}
