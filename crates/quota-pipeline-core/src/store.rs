//! The interface a backing quota store exposes to the pipeline.
//!
//! The pipeline owns no accounting logic. It hands each request to a
//! [`QuotaStore`] and reacts to the outcome. Every operation completes
//! asynchronously with either a result or a [`StoreError`] whose variant
//! tells the pipeline whether the failure is recoverable.

use crate::{BucketState, Request, StatusQuery, StatusResult, StoreError};
use async_trait::async_trait;

/// Bucket-based quota accounting (token or leaky bucket).
///
/// Implementations must be shareable across tasks: the pipeline holds the
/// store behind an `Arc` and keeps any number of calls outstanding at once.
/// Calls are never cancelled by the pipeline once issued, and the pipeline
/// imposes no timeout; a store that needs one enforces it itself.
#[async_trait]
pub trait QuotaStore: Send + Sync + 'static {
    /// Consumes `request.count` tokens (or the whole bucket when
    /// `request.all`) if available.
    async fn take(&self, request: &Request) -> Result<BucketState, StoreError>;

    /// Like [`take`](Self::take), but waits until enough tokens accrue.
    async fn wait(&self, request: &Request) -> Result<BucketState, StoreError>;

    /// Returns tokens to the bucket.
    async fn put(&self, request: &Request) -> Result<BucketState, StoreError>;

    /// Reports the bucket without modifying it.
    async fn get(&self, request: &Request) -> Result<BucketState, StoreError>;

    /// Reports every bucket of `query.bucket_type` whose key starts with
    /// `query.prefix`.
    async fn status(&self, query: &StatusQuery) -> Result<StatusResult, StoreError>;
}
