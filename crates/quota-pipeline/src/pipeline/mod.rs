//! Request/response multiplexing between callers and a quota store.
//!
//! A [`Pipeline`] is spawned as a single driver task connected to the outside
//! by two bounded channels:
//!
//! - **inbound**: [`PipelineHandle::submit`] / [`PipelineHandle::submit_batch`]
//!   push requests in; a full channel makes submitters wait (input-side
//!   backpressure).
//! - **outbound**: [`ResponseStream`] yields one [`Delivery`] per response; a
//!   consumer that stops reading makes responses pile up in the pipeline's
//!   output queue until it reads again. Responses are deferred, never
//!   dropped.
//!
//! ## Ordering
//!
//! Requests are dispatched in submission order, but responses are delivered
//! in the order the store *completes* them. Callers that issue concurrent
//! requests must correlate responses by [`Delivery::request`] (or its id),
//! not by position.
//!
//! ## Failure model
//!
//! - An unknown method fails only the unit that carried it (see
//!   [`Receipt::wait`]).
//! - An unknown bucket type is answered with a typed error response, or
//!   logged and dropped when the request set `skipResponse`.
//! - Any other store error is fatal: the pipeline publishes
//!   [`PipelineStatus::Failed`], refuses new work, finishes what was already
//!   dispatched, and stops.

mod batch;
mod correlator;
mod dispatcher;
mod driver;
pub mod metrics;
mod output;
mod request;


pub use metrics::{MetricTags, MetricsSink, NoopMetrics, STORE_LATENCY_MS};
pub use output::Delivery;

use driver::Driver;
use output::OutputQueue;
use quota_pipeline_core::{Error, QuotaStore, Request, Result};
use request::Ingest;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::ReceiverStream;

/// Default capacity of both the inbound and the outbound channel.
pub const DEFAULT_BUFFER_SIZE: usize = 50;

/// Channel capacities of a [`Pipeline`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Ingestion units buffered before submitters have to wait.
    pub input_buffer: usize,
    /// Responses buffered before the consumer counts as "not ready".
    pub output_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_buffer: DEFAULT_BUFFER_SIZE,
            output_buffer: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Lifecycle of a spawned pipeline.
#[derive(Clone, Debug)]
pub enum PipelineStatus {
    Running,
    /// A fatal store error occurred. The pipeline makes no further
    /// correctness guarantees.
    Failed(Error),
    /// Every handle was dropped and all accepted work was delivered, or the
    /// consumer went away.
    Stopped,
}

impl PipelineStatus {
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Builder for the pipeline driver task.
pub struct Pipeline<S> {
    store: Arc<S>,
    config: PipelineConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl<S: QuotaStore> Pipeline<S> {
    pub fn new(store: Arc<S>, config: PipelineConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(NoopMetrics),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Spawns the driver task on the current Tokio runtime.
    ///
    /// The pipeline runs until every [`PipelineHandle`] clone is dropped and
    /// all accepted work has been delivered, or until the [`ResponseStream`]
    /// is dropped.
    pub fn spawn(self) -> (PipelineHandle, ResponseStream) {
        let (in_tx, in_rx) = mpsc::channel(self.config.input_buffer.max(1));
        let (out_tx, out_rx) = mpsc::channel(self.config.output_buffer.max(1));
        let (status_tx, status_rx) = watch::channel(PipelineStatus::Running);

        let driver = Driver::new(
            self.store,
            self.metrics,
            in_rx,
            OutputQueue::new(out_tx),
            status_tx,
        );
        tokio::spawn(driver.run());

        (
            PipelineHandle {
                tx: in_tx,
                status: status_rx,
            },
            ResponseStream { rx: out_rx },
        )
    }
}

/// Submission side of a running pipeline. Cheap to clone.
#[derive(Clone, Debug)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Ingest>,
    status: watch::Receiver<PipelineStatus>,
}

impl PipelineHandle {
    /// Submits a single request. Equivalent to a batch of one.
    ///
    /// # Errors
    ///
    /// See [`submit_batch`](Self::submit_batch).
    pub async fn submit(&self, request: Request) -> Result<Receipt> {
        self.submit_batch(vec![request]).await
    }

    /// Submits `requests` as one ingestion unit.
    ///
    /// Resolves as soon as the unit is accepted into the inbound buffer. All
    /// items are dispatched without waiting on each other; the returned
    /// [`Receipt`] reports once every item has settled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PipelineFailed`] after a fatal store error, or
    /// [`Error::PipelineClosed`] once the pipeline has stopped.
    pub async fn submit_batch(&self, requests: Vec<Request>) -> Result<Receipt> {
        let (ack, rx) = oneshot::channel();
        let ingest = Ingest {
            requests: requests.into_iter().map(Arc::new).collect(),
            ack,
        };

        match self.tx.send(ingest).await {
            Ok(()) => Ok(Receipt { rx }),
            Err(_) => Err(self.refusal()),
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    /// Waits until the pipeline leaves [`PipelineStatus::Running`] and
    /// returns the new state.
    pub async fn terminated(&self) -> PipelineStatus {
        wait_terminated(self.status.clone()).await
    }

    /// Drops this handle and waits for the pipeline to stop.
    ///
    /// The pipeline only stops once *every* clone of the handle is gone and
    /// all accepted work has been delivered, so the consumer must keep
    /// reading while this is pending.
    ///
    /// # Errors
    ///
    /// Returns the fatal error if the pipeline failed.
    pub async fn shutdown(self) -> Result<()> {
        let Self { tx, status } = self;
        drop(tx);

        match wait_terminated(status).await {
            PipelineStatus::Failed(e) => Err(e),
            PipelineStatus::Running | PipelineStatus::Stopped => Ok(()),
        }
    }

    fn refusal(&self) -> Error {
        match &*self.status.borrow() {
            PipelineStatus::Failed(e) => Error::PipelineFailed {
                reason: e.to_string(),
            },
            PipelineStatus::Running | PipelineStatus::Stopped => Error::PipelineClosed,
        }
    }
}

async fn wait_terminated(mut status: watch::Receiver<PipelineStatus>) -> PipelineStatus {
    match status.wait_for(|s| !s.is_running()).await {
        Ok(s) => s.clone(),
        // The driver publishes its final state before it goes away.
        Err(_) => PipelineStatus::Stopped,
    }
}

/// Outcome of one ingestion unit.
#[derive(Debug)]
pub struct Receipt {
    rx: oneshot::Receiver<Result<()>>,
}

impl Receipt {
    /// Waits until every item of the unit has settled.
    ///
    /// # Errors
    ///
    /// Returns the first error any item reported: [`Error::UnknownMethod`]
    /// for an unroutable item, [`Error::Store`] for a fatal store failure,
    /// [`Error::PipelineFailed`] if the unit arrived after a failure, or
    /// [`Error::PipelineClosed`] if the pipeline stopped before settling it.
    pub async fn wait(self) -> Result<()> {
        self.rx.await.unwrap_or(Err(Error::PipelineClosed))
    }
}

/// Consumer side of a running pipeline.
///
/// Reading is the readiness signal: while the stream is not read, its
/// buffer fills up and the pipeline holds further responses back.
#[derive(Debug)]
pub struct ResponseStream {
    rx: mpsc::Receiver<Delivery>,
}

impl ResponseStream {
    /// Receives the next response, or `None` once the pipeline has stopped
    /// and everything has been delivered.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> ReceiverStream<Delivery> {
        ReceiverStream::new(self.rx)
    }
}
