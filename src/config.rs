//! Service configuration
//!
//! Loaded once from the environment at startup and passed down by value.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::executor::process::DEFAULT_MAX_OUTPUT_BYTES;
use crate::executor::{LocalExecutor, SandboxConfig};
use crate::languages::LanguageRegistry;

/// Which executor to prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMode {
    Sandbox,
    Local,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub mode: ExecutorMode,
    /// Language table override, the embedded table is used when unset
    pub languages_config: Option<PathBuf>,
    pub sandbox: SandboxConfig,
    pub compile_timeout: Duration,
    /// Hard limit for one local run
    pub local_timeout: Duration,
    pub temp_root: PathBuf,
    pub max_output_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` uses the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = parse_or(&get, "PORT", 8080u16)?;

        // Production means a privileged host with a container engine
        let production = get("ENVIRONMENT")
            .map(|v| v.trim().eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        let mode = match get("EXECUTOR").map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "sandbox" || v == "docker" => ExecutorMode::Sandbox,
            Some(v) if v == "local" => ExecutorMode::Local,
            Some(v) => anyhow::bail!("EXECUTOR must be 'sandbox' or 'local', got '{}'", v),
            None if production => ExecutorMode::Sandbox,
            None => ExecutorMode::Local,
        };

        let compile_timeout = Duration::from_secs(parse_or(&get, "COMPILE_TIMEOUT_SECS", 30u64)?);
        let local_timeout = Duration::from_secs(parse_or(&get, "LOCAL_TIMEOUT_SECS", 30u64)?);
        let temp_root = get("EXECUTION_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let max_output_bytes = parse_or(&get, "MAX_OUTPUT_BYTES", DEFAULT_MAX_OUTPUT_BYTES)?;

        let defaults = SandboxConfig::default();
        let sandbox = SandboxConfig {
            docker_bin: get("DOCKER_BIN").unwrap_or(defaults.docker_bin),
            timeout: Duration::from_secs(parse_or(
                &get,
                "SANDBOX_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )?),
            compile_timeout,
            memory_mb: parse_or(&get, "SANDBOX_MEMORY_MB", defaults.memory_mb)?,
            cpus: parse_or(&get, "SANDBOX_CPUS", defaults.cpus)?,
            pids_limit: parse_or(&get, "SANDBOX_PIDS_LIMIT", defaults.pids_limit)?,
            max_output_bytes,
            temp_root: temp_root.clone(),
        };

        Ok(Self {
            port,
            mode,
            languages_config: get("LANGUAGES_CONFIG").map(PathBuf::from),
            sandbox,
            compile_timeout,
            local_timeout,
            temp_root,
            max_output_bytes,
        })
    }

    pub fn prefers_sandbox(&self) -> bool {
        self.mode == ExecutorMode::Sandbox
    }

    pub fn load_registry(&self) -> Result<LanguageRegistry> {
        match &self.languages_config {
            Some(path) => LanguageRegistry::from_file(path),
            None => LanguageRegistry::builtin(),
        }
    }

    pub fn local_executor(&self, registry: Arc<LanguageRegistry>) -> LocalExecutor {
        LocalExecutor::new(registry)
            .with_temp_root(&self.temp_root)
            .with_compile_timeout(self.compile_timeout)
            .with_max_timeout(self.local_timeout)
            .with_max_output(self.max_output_bytes)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: '{}'", key, value)),
        None => Ok(default),
    }
}
