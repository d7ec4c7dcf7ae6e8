//! Error types for the bridge and for user operators.

use thiserror::Error;

/// Error type returned by user operator methods.
#[derive(Debug, Error)]
pub enum OpError {
    /// The operator rejected a shape combination.
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    /// Any other operator-level failure.
    #[error("{0}")]
    Other(String),
}

impl OpError {
    pub fn msg(msg: impl Into<String>) -> Self {
        OpError::Other(msg.into())
    }
}

/// Failures caught at the foreign-call boundary.
///
/// None of these ever cross the boundary as an unwind; each is logged and
/// reported to the native caller as a `false` return code.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Tensor tag outside the fixed 0..=4 table.
    #[error("unknown tensor tag {0}")]
    UnknownTag(i32),
    /// Write-request code outside the fixed 0..=3 table.
    #[error("unknown write mode {0}")]
    UnknownWriteMode(i32),
    /// Declared name count and inferred shape count disagree.
    #[error("{section} arity mismatch: declared {declared}, inferred {inferred}")]
    ArityMismatch {
        section: &'static str,
        declared: usize,
        inferred: usize,
    },
    /// An argument/output name cannot be handed to C.
    #[error("name {0:?} contains an interior nul byte")]
    InvalidName(String),
    /// The native caller passed a null pointer where one is not allowed.
    #[error("null {0} pointer from native caller")]
    NullArgument(&'static str),
    /// The operator method returned an error.
    #[error("operator {method} failed: {source}")]
    OperatorFailed {
        method: &'static str,
        #[source]
        source: OpError,
    },
    /// The operator method panicked; the panic was contained at the boundary.
    #[error("operator {method} panicked")]
    OperatorPanicked { method: &'static str },
    /// A callback arrived for a descriptor that has begun teardown.
    /// Indicates a use-after-teardown bug in the surrounding engine.
    #[error("descriptor {0} used after teardown")]
    UseAfterTeardown(u64),
    /// The host scheduler thread is no longer running.
    #[error("host scheduler is shut down")]
    SchedulerDown,
}

impl BridgeError {
    /// Lifetime/ownership violations are unrecoverable for the descriptor
    /// and are logged at error severity; everything else at warn.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::UseAfterTeardown(_) | BridgeError::SchedulerDown
        )
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
