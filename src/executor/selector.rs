//! Executor selection and sandbox fallback
//!
//! The selector is built once at startup and injected wherever an `Executor`
//! is needed. It prefers the sandbox when asked to and the sandbox came up,
//! and demotes a single request to the local executor when the engine
//! disappears after startup.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{ExecutionRequest, ExecutionResult, Executor};
use crate::error::Result;

pub struct ExecutorSelector {
    sandbox: Option<Arc<dyn Executor>>,
    local: Arc<dyn Executor>,
}

impl ExecutorSelector {
    pub fn new(sandbox: Option<Arc<dyn Executor>>, local: Arc<dyn Executor>) -> Self {
        Self { sandbox, local }
    }

    pub fn local_only(local: Arc<dyn Executor>) -> Self {
        Self::new(None, local)
    }

    /// Startup factory.
    ///
    /// `init_sandbox` is only awaited when `prefer_sandbox` is set; if it fails
    /// the selector runs everything locally.
    pub async fn build<F>(prefer_sandbox: bool, init_sandbox: F, local: Arc<dyn Executor>) -> Self
    where
        F: Future<Output = Result<Arc<dyn Executor>>>,
    {
        if !prefer_sandbox {
            info!("Sandbox not requested, using {} executor", local.name());
            return Self::local_only(local);
        }

        match init_sandbox.await {
            Ok(sandbox) => {
                info!("Using {} executor", sandbox.name());
                Self::new(Some(sandbox), local)
            }
            Err(e) => {
                warn!("Sandbox initialization failed, falling back to local: {}", e);
                Self::local_only(local)
            }
        }
    }

    /// The executor requests go to first
    pub fn current(&self) -> Arc<dyn Executor> {
        self.sandbox.as_ref().unwrap_or(&self.local).clone()
    }

    pub fn uses_sandbox(&self) -> bool {
        self.sandbox.is_some()
    }
}

#[async_trait]
impl Executor for ExecutorSelector {
    fn name(&self) -> &'static str {
        self.sandbox.as_ref().unwrap_or(&self.local).name()
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let Some(sandbox) = &self.sandbox else {
            return self.local.execute(request).await;
        };

        match sandbox.execute(request).await {
            Err(e) if e.is_sandbox_unavailable() => {
                // One retry only, whatever the local executor answers is final
                warn!("Sandbox failed at runtime, retrying locally: {}", e);
                self.local.execute(request).await
            }
            other => other,
        }
    }
}
