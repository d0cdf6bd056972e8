//! Error types for the stream engine.
//!
//! Two families live here:
//!
//! - [`StreamError`] is returned synchronously to whoever called the
//!   scheduler (bad parameters, unknown ids, bad configuration).
//! - [`ExecutorError`] is what a [`PaymentExecutor`](crate::PaymentExecutor)
//!   reports for a single tick. It is never raised to callers; the scheduler
//!   records it on the stream and broadcasts it as a `Failure` event.

use thiserror::Error;

use crate::stream::StreamId;

/// Errors surfaced to callers of the scheduler API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Non-positive amount, an interval of zero or beyond
    /// [`MAX_INTERVAL_SECS`](crate::MAX_INTERVAL_SECS), empty recipient, or
    /// an inconsistent target total. The stream is never created.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No stream with this id was ever started on this scheduler.
    #[error("stream not found: {0}")]
    NotFound(StreamId),

    /// An environment value could not be parsed into engine configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Streams are driven by Tokio tasks and can only start inside a
    /// runtime.
    #[error("no Tokio runtime is running")]
    NoRuntime,
}

impl StreamError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}

/// How a failed payment attempt affects its stream.
///
/// Ordinary payment failures are `Retryable`: the stream stays active and
/// simply tries again on its next tick. `NonRetryable` marks an
/// unrecoverable executor condition and moves the stream to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Retryable,
    NonRetryable,
}

/// A single tick's payment attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecutorError {
    pub kind: FailureKind,
    pub message: String,
}

impl ExecutorError {
    /// An ordinary, non-fatal payment failure.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            message: message.into(),
        }
    }

    /// A catastrophic failure that ends the stream.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::NonRetryable,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == FailureKind::NonRetryable
    }
}

pub type Result<T, E = StreamError> = std::result::Result<T, E>;
