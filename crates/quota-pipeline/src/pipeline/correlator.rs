//! Completion handling for store calls.
//!
//! [`correlate`] turns a finished store call into a [`Resolution`]: a
//! response to enqueue, nothing (suppressed by `skipResponse`), or a fatal
//! error for the driver to escalate. It also records the latency sample
//! and the per-operation log event.

use super::{
    batch::UnitId,
    metrics::{MetricTags, MetricsSink, STORE_LATENCY_MS},
};
use core::time::Duration;
use quota_pipeline_core::{BucketState, Request, Response, StatusResult, StoreError};
use std::sync::Arc;

/// Result of a store operation, split by the shape of its payload.
#[derive(Debug)]
pub(crate) enum Outcome {
    Bucket(Result<BucketState, StoreError>),
    Status(Result<StatusResult, StoreError>),
}

/// A finished store call, tagged with the unit and request it belongs to.
#[derive(Debug)]
pub(crate) struct Completion {
    pub unit: UnitId,
    pub request: Arc<Request>,
    pub took: Duration,
    pub outcome: Outcome,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Resolution {
    Respond(Response),
    Suppress,
    Fatal(StoreError),
}

pub(crate) fn correlate(
    request: &Request,
    took: Duration,
    outcome: Outcome,
    metrics: &dyn MetricsSink,
) -> Resolution {
    match outcome {
        // STATUS answers regardless of `skipResponse` and tolerates no error.
        Outcome::Status(Ok(result)) => Resolution::Respond(result.into()),
        Outcome::Status(Err(e)) => Resolution::Fatal(e),
        Outcome::Bucket(result) => correlate_bucket(request, took, result, metrics),
    }
}

fn correlate_bucket(
    request: &Request,
    took: Duration,
    result: Result<BucketState, StoreError>,
    metrics: &dyn MetricsSink,
) -> Resolution {
    let took_ms = took.as_secs_f64() * 1_000.0;

    metrics.record_histogram(
        STORE_LATENCY_MS,
        took_ms,
        &MetricTags {
            method: request.method.clone(),
            bucket_type: request.bucket_type.clone(),
            conformant: result.as_ref().ok().and_then(|state| state.conformant),
        },
    );

    match result {
        Ok(state) => {
            tracing::info!(
                took = took_ms,
                method = %request.method,
                r#type = %request.bucket_type,
                key = %request.key,
                conformant = ?state.conformant,
                "{}",
                request.method
            );
            if request.skip_response {
                Resolution::Suppress
            } else {
                Resolution::Respond(state.into())
            }
        }
        Err(e) => match e.error_kind() {
            Some(_) if request.skip_response => {
                tracing::info!(
                    log_type = "unknown_bucket_error",
                    request_id = request.id,
                    method = %request.method,
                    r#type = %request.bucket_type,
                    key = %request.key,
                    error = %e,
                    "Error detected in the request pipeline."
                );
                Resolution::Suppress
            }
            Some(kind) => Resolution::Respond(Response::error(kind)),
            None => Resolution::Fatal(e),
        },
    }
}
