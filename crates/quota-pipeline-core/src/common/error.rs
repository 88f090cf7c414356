//! Error types for the quota pipeline.
//!
//! Two enums live here:
//!
//! - [`StoreError`] is what a [`QuotaStore`](crate::QuotaStore) reports for a
//!   single operation. Each variant is either *recoverable* (scoped to the
//!   request that caused it) or *fatal* (the pipeline can no longer make
//!   correctness guarantees). The classification is carried by the variant
//!   itself; callers never inspect the message text.
//! - [`Error`] is the pipeline-level error surfaced to submitters and to
//!   whoever watches the pipeline status.
//!
//! ## Error Cases
//! - `UnknownMethod`: A request named a method the pipeline does not route.
//! - `Store`: A store operation failed with a fatal [`StoreError`].
//! - `ChannelError`: An internal communication failure between the pipeline
//!   and its submitters or consumer.
//! - `PipelineFailed`: A submission arrived after a fatal store error.
//! - `PipelineClosed`: A submission arrived after the pipeline stopped.

use crate::ErrorKind;

pub type Result<T> = core::result::Result<T, Error>;

/// Failure reported by a quota store operation.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The request referenced a bucket type the store has no definition for.
    #[error("undefined bucket type {bucket_type}")]
    UnknownBucketType { bucket_type: String },

    /// The request could never be satisfied by the store (e.g. a `WAIT` for
    /// more tokens than the bucket holds).
    #[error("invalid store request: {reason}")]
    InvalidRequest { reason: String },

    /// The backing store itself failed.
    #[error("store backend failure: {reason}")]
    Backend { reason: String },
}

impl StoreError {
    /// The typed error kind a caller receives for a recoverable error, or
    /// `None` if the error is fatal.
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::UnknownBucketType { .. } => Some(ErrorKind::UnknownBucketType),
            Self::InvalidRequest { .. } | Self::Backend { .. } => None,
        }
    }

    /// Returns `true` when the error is scoped to the request that caused it
    /// and the pipeline may keep running.
    pub const fn is_recoverable(&self) -> bool {
        self.error_kind().is_some()
    }
}

/// Unified error type for the quota pipeline.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The request's method is not one the pipeline routes.
    #[error("unknown method {method}")]
    UnknownMethod { method: String },

    /// A store operation failed in a way that invalidates the pipeline.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Internal channel send/receive failure (e.g., closed consumer).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The pipeline hit a fatal error and no longer accepts work.
    #[error("Pipeline failed: {reason}")]
    PipelineFailed { reason: String },

    /// The pipeline has stopped and no longer accepts work.
    #[error("Pipeline is closed")]
    PipelineClosed,
}
