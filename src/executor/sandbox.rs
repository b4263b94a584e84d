//! Sandbox execution using a container engine
//!
//! Each run gets its own throwaway container: no network, capped memory, CPU
//! and process count, source mounted read-only. The engine is driven through
//! its CLI (`docker` by default), so anything CLI-compatible works.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::process::{run_with_deadline, ProcessLimits, ProcessOutput, DEFAULT_MAX_OUTPUT_BYTES};
use super::{ExecutionRequest, ExecutionResult, Executor};
use crate::error::{Error, Result};
use crate::languages::{LanguageProfile, LanguageRegistry};

/// Mount point of the read-only source directory inside the container
const CODE_MOUNT: &str = "/code";
/// Mount point of the writable build directory inside the container
const BUILD_MOUNT: &str = "/build";
/// `docker run` exits with 125 when the engine itself failed
const ENGINE_ERROR_EXIT_CODE: i32 = 125;
/// Deadline for engine housekeeping commands (version, rm)
const ENGINE_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Sandbox limits and engine settings
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Container engine CLI
    pub docker_bin: String,
    /// Hard wall-clock limit for one run (default: 30s)
    pub timeout: Duration,
    /// Compile step limit (default: 30s)
    pub compile_timeout: Duration,
    /// Memory limit in MB, swap disabled (default: 100MB)
    pub memory_mb: u32,
    /// CPU share (default: 0.5 core)
    pub cpus: f64,
    /// Maximum number of processes in the container
    pub pids_limit: u32,
    pub max_output_bytes: usize,
    /// Directory under which staging directories are created
    pub temp_root: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            timeout: Duration::from_secs(30),
            compile_timeout: Duration::from_secs(30),
            memory_mb: 100,
            cpus: 0.5,
            pids_limit: 64,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            temp_root: std::env::temp_dir(),
        }
    }
}

/// Per-run directories shared with the container
struct Staging {
    dir: TempDir,
    src_dir: PathBuf,
    build_dir: PathBuf,
}

/// Executor that runs code in an isolated container
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    registry: Arc<LanguageRegistry>,
    config: SandboxConfig,
}

impl SandboxExecutor {
    /// Check that the engine answers, then build the executor.
    ///
    /// Fails with `SandboxUnavailable` when the CLI is missing or the daemon is down.
    pub async fn connect(registry: Arc<LanguageRegistry>, mut config: SandboxConfig) -> Result<Self> {
        // Bind mounts need absolute host paths
        if let Ok(root) = std::path::absolute(&config.temp_root) {
            config.temp_root = root;
        }

        let mut cmd = Command::new(&config.docker_bin);
        cmd.args(["version", "--format", "{{.Server.Version}}"]);

        let output = run_with_deadline(cmd, b"", ProcessLimits::new(ENGINE_COMMAND_TIMEOUT))
            .await
            .map_err(|e| engine_spawn_error(&config.docker_bin, e))?;

        if output.timed_out {
            return Err(Error::SandboxUnavailable(format!(
                "{} did not respond within {:?}",
                config.docker_bin, ENGINE_COMMAND_TIMEOUT
            )));
        }
        if output.exit_code != 0 {
            return Err(Error::SandboxUnavailable(output.stderr.trim().to_string()));
        }

        info!(
            "Connected to container engine {} (server {})",
            config.docker_bin,
            output.stdout.trim()
        );

        Ok(Self { registry, config })
    }

    async fn stage(&self, profile: &LanguageProfile, code: &str) -> Result<Staging> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-sandbox-", profile.name))
            .tempdir_in(&self.config.temp_root)
            .map_err(|e| Error::io("Failed to create staging directory", e))?;

        let src_dir = dir.path().join("src");
        let build_dir = dir.path().join("build");
        for sub in [&src_dir, &build_dir] {
            tokio::fs::create_dir(sub)
                .await
                .map_err(|e| Error::io("Failed to create staging directory", e))?;
        }
        // The container user is not necessarily the host user
        tokio::fs::set_permissions(&build_dir, std::fs::Permissions::from_mode(0o777))
            .await
            .map_err(|e| Error::io("Failed to prepare build directory", e))?;
        tokio::fs::set_permissions(&src_dir, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| Error::io("Failed to prepare source directory", e))?;

        let source_path = src_dir.join(&profile.source_file);
        tokio::fs::write(&source_path, code)
            .await
            .map_err(|e| Error::io("Failed to write source file", e))?;
        tokio::fs::set_permissions(&source_path, std::fs::Permissions::from_mode(0o644))
            .await
            .map_err(|e| Error::io("Failed to prepare source file", e))?;

        Ok(Staging {
            dir,
            src_dir,
            build_dir,
        })
    }

    /// Arguments for `docker run` of one isolated unit
    fn run_args(&self, name: &str, staging: &Staging, image: &str, argv: &[String]) -> Vec<String> {
        let memory = format!("{}m", self.config.memory_mb);
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--interactive".to_string(),
            format!("--name={}", name),
            "--network=none".to_string(),
            format!("--memory={}", memory),
            format!("--memory-swap={}", memory),
            format!("--cpus={}", self.config.cpus),
            format!("--pids-limit={}", self.config.pids_limit),
            "--cap-drop=ALL".to_string(),
            "--security-opt=no-new-privileges".to_string(),
            format!(
                "--volume={}:{}:ro",
                staging.src_dir.to_string_lossy(),
                CODE_MOUNT
            ),
            format!(
                "--volume={}:{}",
                staging.build_dir.to_string_lossy(),
                BUILD_MOUNT
            ),
            format!("--workdir={}", CODE_MOUNT),
            image.to_string(),
        ];
        args.extend(argv.iter().cloned());
        args
    }

    /// Run one container to completion or timeout, removing it on every path
    async fn run_unit(
        &self,
        staging: &Staging,
        image: &str,
        argv: &[String],
        stdin: &[u8],
        timeout: Duration,
    ) -> Result<ProcessOutput> {
        let name = format!("code-exec-{}", Uuid::new_v4());
        let args = self.run_args(&name, staging, image, argv);
        debug!("Running sandbox unit {}: {:?}", name, argv);

        let mut cmd = Command::new(&self.config.docker_bin);
        cmd.args(&args);

        let limits = ProcessLimits::new(timeout).with_max_output(self.config.max_output_bytes);
        let output = match run_with_deadline(cmd, stdin, limits).await {
            Ok(output) => output,
            Err(e) => {
                self.remove_container(&name).await;
                return Err(engine_spawn_error(&self.config.docker_bin, e));
            }
        };

        if output.timed_out {
            // Killing the CLI leaves the container running
            self.remove_container(&name).await;
        } else if is_engine_failure(&output) {
            self.remove_container(&name).await;
            return Err(Error::SandboxUnavailable(output.stderr.trim().to_string()));
        }

        Ok(output)
    }

    async fn remove_container(&self, name: &str) {
        let mut cmd = Command::new(&self.config.docker_bin);
        cmd.args(["rm", "--force", name]);

        match run_with_deadline(cmd, b"", ProcessLimits::new(ENGINE_COMMAND_TIMEOUT)).await {
            Ok(output) if output.exit_code == 0 => info!("Removed container {}", name),
            Ok(output) => debug!("Container {} not removed: {}", name, output.stderr.trim()),
            Err(e) => warn!("Failed to remove container {}: {}", name, e),
        }
    }

    async fn run_staged(
        &self,
        profile: &LanguageProfile,
        staging: &Staging,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let src = format!("{}/{}", CODE_MOUNT, profile.source_file);

        if let Some(compile_argv) = profile.compile_argv(&src, BUILD_MOUNT) {
            let compiled = self
                .run_unit(
                    staging,
                    &profile.image,
                    &compile_argv,
                    b"",
                    self.config.compile_timeout,
                )
                .await?;

            if compiled.timed_out {
                return Ok(ExecutionResult::compile_error(format!(
                    "Compilation timed out after {:?}",
                    self.config.compile_timeout
                )));
            }
            if compiled.exit_code != 0 {
                let diagnostic = if compiled.stderr.is_empty() {
                    compiled.stdout
                } else {
                    compiled.stderr
                };
                return Ok(ExecutionResult::compile_error(diagnostic));
            }
        }

        let timeout = self.run_timeout(profile, request);
        let run_argv = profile.run_argv(&src, BUILD_MOUNT);
        let output = self
            .run_unit(
                staging,
                &profile.image,
                &run_argv,
                &request.stdin_bytes(),
                timeout,
            )
            .await?;

        if output.timed_out {
            warn!("Sandbox {} execution timed out after {:?}", profile.name, timeout);
            return Ok(ExecutionResult::timeout(timeout));
        }

        if output.exit_code == 0 {
            info!("Sandbox execution completed successfully");
        } else {
            info!("Sandbox execution completed with exit code {}", output.exit_code);
        }

        Ok(ExecutionResult {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            ..Default::default()
        })
    }

    /// Requested or language limit, never above the sandbox's hard limit
    fn run_timeout(&self, profile: &LanguageProfile, request: &ExecutionRequest) -> Duration {
        request
            .timeout
            .unwrap_or(profile.timeout)
            .min(self.config.timeout)
    }
}

#[async_trait]
impl Executor for SandboxExecutor {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let profile = self.registry.resolve(&request.language)?;

        info!(
            "Sandbox executing {} code, length: {} chars, stdin lines: {}",
            profile.name,
            request.code.len(),
            request.stdin.len()
        );

        let staging = self.stage(&profile, &request.code).await?;
        let result = self.run_staged(&profile, &staging, request).await;

        if let Err(e) = staging.dir.close() {
            warn!("Failed to remove staging directory: {}", e);
        }

        result
    }
}

fn engine_spawn_error(docker_bin: &str, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::SandboxUnavailable(format!("{} not found", docker_bin))
    } else {
        Error::SandboxUnavailable(format!("failed to run {}: {}", docker_bin, e))
    }
}

/// Whether a `docker run` result came from the engine rather than the program
fn is_engine_failure(output: &ProcessOutput) -> bool {
    if output.exit_code != ENGINE_ERROR_EXIT_CODE {
        return false;
    }
    let stderr = output.stderr.trim_start();
    stderr.starts_with("docker:")
        || stderr.contains("Error response from daemon")
        || stderr.contains("Cannot connect to the Docker daemon")
}
