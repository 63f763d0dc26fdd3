//! Harness error taxonomy.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    /// The guest engine could not be launched or its baseline never staged.
    /// Fatal to the session's readiness.
    #[error("guest runtime failed to initialize: {0}")]
    RuntimeInitialization(String),

    /// A package install failed; the tier stays unstaged and is retried in full next time.
    #[error("failed to install package '{package}': {reason}")]
    PackageStaging { package: String, reason: String },

    #[error("{0}")]
    GuestExecution(String),

    #[error("guest program did not finish within {0:?}")]
    Timeout(Duration),

    /// Another guest operation is still in flight on this session.
    #[error("guest runtime is busy with another operation")]
    Busy,

    #[error("guest runtime is not ready")]
    NotReady,
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
