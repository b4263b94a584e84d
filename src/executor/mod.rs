//! Executor module - Code execution abstraction layer
//!
//! This module provides a unified interface for running one submission:
//! - `SandboxExecutor`: untrusted code inside a resource-capped container
//! - `LocalExecutor`: the same contract as a native child process
//! - `ExecutorSelector`: picks one of the above and falls back to local
//!
//! The executor module does NOT:
//! - Compare outputs or determine verdicts
//! - Know about test cases

pub mod local;
pub mod process;
pub mod sandbox;
pub mod selector;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// One run of a submission with one stdin
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
    /// Lines fed to the program, newline-joined, followed by EOF
    pub stdin: Vec<String>,
    /// Overrides the profile's default wall-clock limit
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
            stdin: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_stdin(mut self, lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stdin = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bytes written to the program's stdin
    pub fn stdin_bytes(&self) -> Vec<u8> {
        if self.stdin.is_empty() {
            return Vec::new();
        }
        let mut input = self.stdin.join("\n");
        input.push('\n');
        input.into_bytes()
    }
}

/// Outcome of running one request.
///
/// Program failures (non-zero exit, compile error, timeout) are described here,
/// never raised as errors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Compilation failed; no run was attempted
    pub compilation_failed: bool,
    pub failure_reason: Option<String>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && self.failure_reason.is_none()
    }

    pub fn timeout(limit: Duration) -> Self {
        Self {
            exit_code: -1,
            timed_out: true,
            failure_reason: Some(timeout_message(limit)),
            ..Default::default()
        }
    }

    pub fn compile_error(diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        let reason = if diagnostic.trim().is_empty() {
            "compilation failed".to_string()
        } else {
            format!("compilation failed:\n{}", diagnostic.trim_end())
        };
        Self {
            exit_code: 1,
            stderr: diagnostic,
            compilation_failed: true,
            failure_reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn not_available(language: &str) -> Self {
        Self {
            exit_code: 1,
            failure_reason: Some(format!(
                "{} execution is not available in this environment",
                language
            )),
            ..Default::default()
        }
    }
}

pub fn timeout_message(limit: Duration) -> String {
    format!("execution timeout ({:?})", limit)
}

/// Something that can run a submission
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Executor: Send + Sync {
    /// Short name for logs ("sandbox", "local")
    fn name(&self) -> &'static str;

    /// Run one request to completion or timeout
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult>;
}

// Re-exports
pub use local::LocalExecutor;
pub use sandbox::{SandboxConfig, SandboxExecutor};
pub use selector::ExecutorSelector;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdin_bytes() {
        let empty = ExecutionRequest::new("x", "python");
        assert!(empty.stdin_bytes().is_empty());

        let req = ExecutionRequest::new("x", "python").with_stdin(["5", "3"]);
        assert_eq!(req.stdin_bytes(), b"5\n3\n");
    }

    #[test]
    fn test_timeout_result() {
        let result = ExecutionResult::timeout(Duration::from_secs(30));
        assert!(result.timed_out);
        assert!(result.stdout.is_empty());
        assert_eq!(
            result.failure_reason.as_deref(),
            Some("execution timeout (30s)")
        );
        assert!(!result.is_success());
    }

    #[test]
    fn test_compile_error_result() {
        let result = ExecutionResult::compile_error("main.cpp:3: error: expected ';'\n");
        assert!(result.compilation_failed);
        assert_eq!(result.exit_code, 1);
        assert_eq!(
            result.failure_reason.as_deref(),
            Some("compilation failed:\nmain.cpp:3: error: expected ';'")
        );
    }
}
