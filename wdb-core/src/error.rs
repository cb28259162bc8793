//! Error types for the agent core.

use thiserror::Error;

/// Errors returned by agent initialization, mode switching and register access.
///
/// The suspend/resume transitions themselves have no failure path once the
/// external agent is initialized.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WdbError {
    /// The requested mode or capability is not configured in.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
    /// A mode value that is not exactly one of TASK or EXTERN.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// No handler is registered for the requested register-set type.
    #[error("no register set registered for {0:?}")]
    NotFound(crate::regs::RegSetType),
    /// A runtime callout failed (task creation, task resume).
    #[error("resource error: {0}")]
    Resource(String),
    /// The suspended system's state was requested while the system is running.
    #[error("target system is not suspended")]
    NotExternal,
    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, WdbError>;
