//! The pipeline's single task.
//!
//! [`Driver::run`] owns every piece of mutable pipeline state (output queue,
//! ingestion units, in-flight store calls) and multiplexes three event
//! sources with `tokio::select!`:
//!
//! - a store call finished (any order; concurrency comes only from here),
//! - the consumer has room again after signalling "not ready",
//! - a new ingestion unit arrived on the inbound channel.
//!
//! Because all of this runs on one task, the output queue needs no lock.

use super::{
    PipelineStatus,
    batch::{IngestUnits, UnitId},
    correlator::{Completion, Resolution, correlate},
    dispatcher::{InFlight, Route, route, store_call},
    metrics::MetricsSink,
    output::OutputQueue,
    request::Ingest,
};
use futures::{StreamExt, stream::FuturesUnordered};
use quota_pipeline_core::{Error, QuotaStore, Request, Result, StoreError};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub(crate) struct Driver<S> {
    store: Arc<S>,
    metrics: Arc<dyn MetricsSink>,
    inbound: mpsc::Receiver<Ingest>,
    inbound_open: bool,
    output: OutputQueue,
    in_flight: FuturesUnordered<InFlight>,
    units: IngestUnits,
    status: watch::Sender<PipelineStatus>,
    failure: Option<Error>,
}

impl<S: QuotaStore> Driver<S> {
    pub(crate) fn new(
        store: Arc<S>,
        metrics: Arc<dyn MetricsSink>,
        inbound: mpsc::Receiver<Ingest>,
        output: OutputQueue,
        status: watch::Sender<PipelineStatus>,
    ) -> Self {
        Self {
            store,
            metrics,
            inbound,
            inbound_open: true,
            output,
            in_flight: FuturesUnordered::new(),
            units: IngestUnits::default(),
            status,
            failure: None,
        }
    }

    /// Runs until the inbound side is closed and everything accepted has
    /// been delivered, or until the consumer goes away.
    pub(crate) async fn run(mut self) {
        if let Err(e) = self.event_loop().await {
            tracing::warn!(
                in_flight = self.in_flight.len(),
                queued = self.output.len(),
                open_units = self.units.len(),
                "Pipeline stopped early: {}",
                e
            );
        }

        let status = match self.failure.take() {
            Some(failure) => PipelineStatus::Failed(failure),
            None => PipelineStatus::Stopped,
        };
        self.status.send_replace(status);
        tracing::debug!("Pipeline driver exited");
    }

    async fn event_loop(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                Some(completion) = self.in_flight.next() => {
                    self.complete(completion)?;
                }
                ready = self.output.consumer_ready(),
                    if !self.output.is_ready() && !self.output.is_empty() =>
                {
                    ready?;
                    self.output.on_consumer_ready()?;
                }
                ingest = self.inbound.recv(), if self.inbound_open => match ingest {
                    Some(ingest) => self.ingest(ingest)?,
                    None => self.inbound_open = false,
                },
                else => return Ok(()),
            }
        }
    }

    fn ingest(&mut self, ingest: Ingest) -> Result<()> {
        let Ingest { requests, ack } = ingest;

        if let Some(failure) = &self.failure {
            let _ = ack.send(Err(Error::PipelineFailed {
                reason: failure.to_string(),
            }));
            return Ok(());
        }

        // Every item is dispatched before any completion is looked at.
        let unit = self.units.open(requests.len(), ack);
        for request in requests {
            self.dispatch(unit, request)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, unit: UnitId, request: Arc<Request>) -> Result<()> {
        tracing::debug!(request = ?request, "request");

        match route(&request) {
            Route::Immediate(response) => {
                self.units.settle(unit, Ok(()));
                self.output.enqueue(request, response)?;
            }
            Route::Store(op) => {
                let call = store_call(Arc::clone(&self.store), op, unit, request);
                self.in_flight.push(call);
            }
            Route::Reject(e) => {
                tracing::debug!(request_id = request.id, "Rejected request: {}", e);
                self.units.settle(unit, Err(e));
            }
        }
        Ok(())
    }

    fn complete(&mut self, completion: Completion) -> Result<()> {
        let Completion {
            unit,
            request,
            took,
            outcome,
        } = completion;

        match correlate(&request, took, outcome, self.metrics.as_ref()) {
            Resolution::Respond(response) => {
                self.units.settle(unit, Ok(()));
                self.output.enqueue(request, response)?;
            }
            Resolution::Suppress => self.units.settle(unit, Ok(())),
            Resolution::Fatal(e) => {
                self.escalate(&request, e.clone());
                self.units.settle(unit, Err(e.into()));
            }
        }
        Ok(())
    }

    /// Marks the pipeline as failed on the first fatal store error.
    ///
    /// New work is refused from here on; calls already dispatched still run
    /// to completion and their responses are still delivered.
    fn escalate(&mut self, request: &Request, e: StoreError) {
        if self.failure.is_some() {
            tracing::warn!(
                request_id = request.id,
                method = %request.method,
                error = %e,
                "Store error after pipeline failure"
            );
            return;
        }

        tracing::error!(
            request_id = request.id,
            method = %request.method,
            bucket_type = %request.bucket_type,
            key = %request.key,
            error = %e,
            "Fatal store error, pipeline is no longer usable"
        );

        let failure = Error::Store(e);
        self.failure = Some(failure.clone());
        self.status.send_replace(PipelineStatus::Failed(failure));
        self.inbound.close();
    }
}
