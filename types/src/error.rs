//! Error taxonomy and scalar status codes.
//!
//! Every fallible framework call returns [`OpError`]. The variants map one-to-one onto the
//! failure categories callers have to distinguish:
//!
//! | Variant | Category | Surfaced |
//! |---------|----------|----------|
//! | `InvalidArgument` | ill-formed input | synchronously |
//! | `Pending` | status polled before completion | synchronously |
//! | `Transport` | native call submission/execution failed | terminal status |
//! | `Remote` | envelope parsed, remote reported failure | terminal status |
//! | `PartialFailure` | response body was not JSON | terminal status |
//! | `ResultSizeMismatch` | caller buffer size differs from recorded size | synchronously |
//! | `Usage` | API called in the wrong mode or order | synchronously |
//! | `Unexpected` | operation override panicked | terminal status |
//!
//! [`StatusCode`] is the scalar projection used at FFI-shaped boundaries and in logs:
//! zero is success, [`StatusCode::PENDING`] is the in-flight sentinel, and each category
//! owns one negative code.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("operation is still pending")]
    Pending,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("remote service returned {http_code} ({name}, error code {error_code}): {message}")]
    Remote {
        http_code: i64,
        error_code: i64,
        name: String,
        message: String,
    },
    #[error("failed to parse response: {0}")]
    PartialFailure(String),
    #[error("result buffer is {actual} bytes but the operation produced {expected}")]
    ResultSizeMismatch { expected: usize, actual: usize },
    #[error("usage error: {0}")]
    Usage(&'static str),
    #[error("unexpected failure inside an operation")]
    Unexpected,
    #[error("task queue has been terminated")]
    QueueTerminated,
    #[error("operation was aborted")]
    Aborted,
    #[error("context is still referenced by {live} other owner(s)")]
    ContextInUse { live: usize },
    #[error("failed to decode result payload: {0}")]
    Deserialize(String),
}

impl OpError {
    /// Whether this error is the in-flight sentinel rather than a real failure.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from(self)
    }
}

/// Scalar status: `0` success, [`StatusCode::PENDING`] in flight, negative values failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(i32);

impl StatusCode {
    pub const SUCCESS: Self = Self(0);
    pub const PENDING: Self = Self(0x0A);
    pub const INVALID_ARGUMENT: Self = Self(-1);
    pub const TRANSPORT: Self = Self(-2);
    pub const REMOTE: Self = Self(-3);
    pub const PARTIAL_FAILURE: Self = Self(-4);
    pub const RESULT_SIZE_MISMATCH: Self = Self(-5);
    pub const USAGE: Self = Self(-6);
    pub const UNEXPECTED: Self = Self(-7);
    pub const QUEUE_TERMINATED: Self = Self(-8);
    pub const ABORTED: Self = Self(-9);
    pub const CONTEXT_IN_USE: Self = Self(-10);
    pub const DESERIALIZE: Self = Self(-11);

    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_pending(self) -> bool {
        self.0 == Self::PENDING.0
    }

    #[must_use]
    pub const fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// Project a status result onto its scalar code.
    #[must_use]
    pub fn of<T>(result: &Result<T, OpError>) -> Self {
        match result {
            Ok(_) => Self::SUCCESS,
            Err(e) => Self::from(e),
        }
    }
}

impl From<&OpError> for StatusCode {
    fn from(err: &OpError) -> Self {
        match err {
            OpError::InvalidArgument(_) => Self::INVALID_ARGUMENT,
            OpError::Pending => Self::PENDING,
            OpError::Transport(_) => Self::TRANSPORT,
            OpError::Remote { .. } => Self::REMOTE,
            OpError::PartialFailure(_) => Self::PARTIAL_FAILURE,
            OpError::ResultSizeMismatch { .. } => Self::RESULT_SIZE_MISMATCH,
            OpError::Usage(_) => Self::USAGE,
            OpError::Unexpected => Self::UNEXPECTED,
            OpError::QueueTerminated => Self::QUEUE_TERMINATED,
            OpError::Aborted => Self::ABORTED,
            OpError::ContextInUse { .. } => Self::CONTEXT_IN_USE,
            OpError::Deserialize(_) => Self::DESERIALIZE,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
