//! Pipeline error model.
//!
//! Every failure in the mutation pipeline is classified into one of these
//! variants. Consumers never swallow an error into a bare "log and return":
//! a classified error either signals a retry (transient) or a dead-letter
//! record (validation, unknown kind, permanent).

use thiserror::Error;

/// Result type used across the pipeline.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Classified pipeline failure.
///
/// The classification decides what happens next:
/// - `Validation` / `UnknownKind` / `PermanentStore` are terminal: the
///   envelope is dead-lettered, never retried.
/// - `TransientStore` is retried with backoff up to a bounded attempt count,
///   then escalated to permanent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// An envelope is missing required fields for its kind, or a field value
    /// failed validation (e.g. a non-numeric row id).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A mutation kind name was not recognized.
    ///
    /// Only arises at the wire-decode boundary; in-process kinds are a
    /// closed enum.
    #[error("unknown mutation kind: {0}")]
    UnknownKind(String),

    /// Connection/timeout/throttling from the relational store.
    #[error("transient store failure: {0}")]
    TransientStore(String),

    /// Constraint violation or malformed data rejected by the store.
    #[error("permanent store failure: {0}")]
    PermanentStore(String),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unknown_kind(name: impl Into<String>) -> Self {
        Self::UnknownKind(name.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientStore(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::PermanentStore(msg.into())
    }

    /// Whether redelivery/retry may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }
}
