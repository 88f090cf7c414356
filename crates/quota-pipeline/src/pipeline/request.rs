//! Internal message type carried on the inbound channel.
//!
//! [`Ingest`] is what a [`PipelineHandle`](super::PipelineHandle) sends to the
//! driver task: one ingestion unit (a single request or a batch) plus the
//! one-shot channel the driver uses to report the unit's outcome once every
//! item in it has settled.

use quota_pipeline_core::{Request, Result};
use std::sync::Arc;
use tokio::sync::oneshot;

/// One ingestion unit.
///
/// - `requests`: Items to dispatch, in submission order. They are shared
///   (not copied) with the store calls and output items that reference them.
/// - `ack`: Resolved with `Ok(())` or the first error reported by any item.
#[derive(Debug)]
pub(crate) struct Ingest {
    pub requests: Vec<Arc<Request>>,
    pub ack: oneshot::Sender<Result<()>>,
}
