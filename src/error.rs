//! Error taxonomy for the execution core
//!
//! Only request-level failures surface as `Err`. Timeouts, compile errors and
//! non-zero exits are reported through `ExecutionResult` instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("code is required")]
    EmptyCode,

    #[error("language is required")]
    EmptyLanguage,

    #[error("no tests to run")]
    NoTests,

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Container engine missing, unreachable or misconfigured
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Structural problems with the request itself, rejected before running anything
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Error::EmptyCode | Error::EmptyLanguage | Error::NoTests)
    }

    pub fn is_sandbox_unavailable(&self) -> bool {
        matches!(self, Error::SandboxUnavailable(_))
    }

    /// Whether the caller should see this as a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.is_invalid_request() || matches!(self, Error::UnsupportedLanguage(_))
    }
}
