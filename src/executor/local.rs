//! Local executor
//!
//! Runs submissions as native child processes, without containment. Used when
//! no container engine is available.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::process::{run_with_deadline, ProcessLimits, ProcessOutput, DEFAULT_MAX_OUTPUT_BYTES};
use super::{ExecutionRequest, ExecutionResult, Executor};
use crate::error::{Error, Result};
use crate::languages::{LanguageProfile, LanguageRegistry};

/// Executor that runs code directly on the host
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    registry: Arc<LanguageRegistry>,
    /// Directory under which per-run staging directories are created
    temp_root: PathBuf,
    compile_timeout: Duration,
    /// Upper bound for any run, whatever the request asks for
    max_timeout: Duration,
    max_output_bytes: usize,
}

impl LocalExecutor {
    pub fn new(registry: Arc<LanguageRegistry>) -> Self {
        Self {
            registry,
            temp_root: std::env::temp_dir(),
            compile_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(30),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_temp_root(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        self.temp_root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
        self
    }

    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = timeout;
        self
    }

    pub fn with_max_output(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Write the source into a fresh, uniquely named directory
    async fn stage(&self, profile: &LanguageProfile, code: &str) -> Result<TempDir> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-exec-", profile.name))
            .tempdir_in(&self.temp_root)
            .map_err(|e| Error::io("Failed to create staging directory", e))?;

        let source_path = dir.path().join(&profile.source_file);
        tokio::fs::write(&source_path, code)
            .await
            .map_err(|e| Error::io("Failed to write source file", e))?;

        debug!("Staged {} source at {:?}", profile.name, source_path);
        Ok(dir)
    }

    async fn run_staged(
        &self,
        profile: &LanguageProfile,
        dir: &Path,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let src = dir.join(&profile.source_file);
        let src = src.to_string_lossy();
        let out = dir.to_string_lossy();

        if let Some(compile_argv) = profile.compile_argv(&src, &out) {
            let limits = ProcessLimits::new(self.compile_timeout).with_max_output(self.max_output_bytes);
            let compiled = match self.spawn(&compile_argv, dir, b"", limits).await? {
                Some(output) => output,
                None => return Ok(ExecutionResult::not_available(&profile.name)),
            };

            if compiled.timed_out {
                return Ok(ExecutionResult::compile_error(format!(
                    "Compilation timed out after {:?}",
                    self.compile_timeout
                )));
            }
            if compiled.exit_code != 0 {
                let diagnostic = if compiled.stderr.is_empty() {
                    compiled.stdout
                } else {
                    compiled.stderr
                };
                debug!("Compilation failed with exit code {}", compiled.exit_code);
                return Ok(ExecutionResult::compile_error(diagnostic));
            }
        }

        let timeout = self.run_timeout(profile, request);
        let limits = ProcessLimits::new(timeout).with_max_output(self.max_output_bytes);
        let run_argv = profile.run_argv(&src, &out);

        let output = match self.spawn(&run_argv, dir, &request.stdin_bytes(), limits).await? {
            Some(output) => output,
            None => return Ok(ExecutionResult::not_available(&profile.name)),
        };

        if output.timed_out {
            warn!("Local {} execution timed out after {:?}", profile.name, timeout);
            return Ok(ExecutionResult::timeout(timeout));
        }

        Ok(ExecutionResult {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            ..Default::default()
        })
    }

    /// Requested or language limit, never above `max_timeout`
    fn run_timeout(&self, profile: &LanguageProfile, request: &ExecutionRequest) -> Duration {
        request
            .timeout
            .unwrap_or(profile.timeout)
            .min(self.max_timeout)
    }

    /// Run one argv in `dir`. `None` means the toolchain is not installed.
    async fn spawn(
        &self,
        argv: &[String],
        dir: &Path,
        stdin: &[u8],
        limits: ProcessLimits,
    ) -> Result<Option<ProcessOutput>> {
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::io(
                "Empty command",
                io::Error::new(io::ErrorKind::InvalidInput, "no program"),
            ));
        };

        debug!("Running locally: {:?}", argv);

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(dir);

        match run_with_deadline(cmd, stdin, limits).await {
            Ok(output) => Ok(Some(output)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("{} is not installed: {}", program, e);
                Ok(None)
            }
            Err(e) => Err(Error::io(format!("Failed to run {}", program), e)),
        }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let profile = self.registry.resolve(&request.language)?;

        if !profile.local {
            info!("{} is not available for local execution", profile.name);
            return Ok(ExecutionResult::not_available(&profile.name));
        }

        info!(
            "Executing {} code locally, length: {} chars",
            profile.name,
            request.code.len()
        );

        let staging = self.stage(&profile, &request.code).await?;
        let result = self.run_staged(&profile, staging.path(), request).await;

        if let Err(e) = staging.close() {
            warn!("Failed to remove staging directory: {}", e);
        }

        result
    }
}
