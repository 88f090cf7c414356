//! Output queue and flow control towards the response consumer.
//!
//! Completed responses are appended to an in-memory queue in completion
//! order. The queue drains into a bounded channel one item at a time; a full
//! channel is the consumer saying "not ready", at which point draining stops
//! and the undelivered remainder waits for the next readiness signal.
//! Nothing is dropped or delivered twice across those transitions.

use quota_pipeline_core::{Error, Request, Response, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// A response paired with the request that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub request: Arc<Request>,
    pub response: Response,
}

pub(crate) struct OutputQueue {
    queue: VecDeque<Delivery>,
    tx: mpsc::Sender<Delivery>,
    ready: bool,
}

impl OutputQueue {
    pub(crate) const fn new(tx: mpsc::Sender<Delivery>) -> Self {
        Self {
            queue: VecDeque::new(),
            tx,
            ready: false,
        }
    }

    /// Appends a response and delivers immediately if the consumer is ready.
    pub(crate) fn enqueue(&mut self, request: Arc<Request>, response: Response) -> Result<()> {
        self.queue.push_back(Delivery { request, response });
        if self.ready { self.drain() } else { Ok(()) }
    }

    /// Hands queued items to the consumer until it stops accepting them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelError`] if the consumer has gone away. The
    /// undelivered item stays at the head of the queue.
    pub(crate) fn drain(&mut self) -> Result<()> {
        while self.ready {
            let Some(item) = self.queue.pop_front() else {
                break;
            };
            match self.tx.try_send(item) {
                Ok(()) => {}
                Err(TrySendError::Full(item)) => {
                    self.queue.push_front(item);
                    self.ready = false;
                }
                Err(TrySendError::Closed(item)) => {
                    self.queue.push_front(item);
                    self.ready = false;
                    return Err(consumer_closed());
                }
            }
        }
        Ok(())
    }

    /// Resolves once the consumer can accept another item.
    pub(crate) async fn consumer_ready(&self) -> Result<()> {
        // The permit is released right away; only this queue sends on `tx`,
        // so the freed slot is still there when `drain` runs.
        self.tx.reserve().await.map(drop).map_err(|_| consumer_closed())
    }

    pub(crate) fn on_consumer_ready(&mut self) -> Result<()> {
        self.ready = true;
        self.drain()
    }

    pub(crate) const fn is_ready(&self) -> bool {
        self.ready
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

fn consumer_closed() -> Error {
    Error::ChannelError {
        context: "Response consumer closed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping(id: u64) -> (Arc<Request>, Response) {
        (Arc::new(Request::ping(id)), Response::pong(id))
    }

    fn ids(rx: &mut mpsc::Receiver<Delivery>) -> Vec<u64> {
        let mut ids = Vec::new();
        while let Ok(item) = rx.try_recv() {
            ids.push(item.request.id);
        }
        ids
    }

    #[test]
    fn holds_items_until_consumer_is_ready() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut output = OutputQueue::new(tx);

        for id in 1..=3 {
            let (request, response) = ping(id);
            output.enqueue(request, response).unwrap();
        }

        assert!(ids(&mut rx).is_empty());
        assert_eq!(output.len(), 3);

        output.on_consumer_ready().unwrap();
        assert_eq!(ids(&mut rx), vec![1, 2, 3]);
        assert!(output.is_empty());
        assert!(output.is_ready());
    }

    #[test]
    fn retains_remainder_under_backpressure() {
        let (tx, mut rx) = mpsc::channel(2);
        let mut output = OutputQueue::new(tx);
        output.on_consumer_ready().unwrap();

        for id in 1..=5 {
            let (request, response) = ping(id);
            output.enqueue(request, response).unwrap();
        }

        // Two fit in the channel, the consumer is now "not ready".
        assert!(!output.is_ready());
        assert_eq!(output.len(), 3);
        assert_eq!(ids(&mut rx), vec![1, 2]);

        output.on_consumer_ready().unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(ids(&mut rx), vec![3, 4]);

        output.on_consumer_ready().unwrap();
        assert!(output.is_empty());
        assert_eq!(ids(&mut rx), vec![5]);
    }

    #[tokio::test]
    async fn readiness_resolves_when_capacity_frees_up() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut output = OutputQueue::new(tx);
        output.on_consumer_ready().unwrap();

        for id in 1..=2 {
            let (request, response) = ping(id);
            output.enqueue(request, response).unwrap();
        }
        assert_eq!(output.len(), 1);

        assert_eq!(rx.recv().await.map(|d| d.request.id), Some(1));
        output.consumer_ready().await.unwrap();
        output.on_consumer_ready().unwrap();
        assert_eq!(rx.recv().await.map(|d| d.request.id), Some(2));
    }

    #[tokio::test]
    async fn reports_closed_consumer_without_losing_the_item() {
        let (tx, rx) = mpsc::channel(1);
        let mut output = OutputQueue::new(tx);
        drop(rx);

        let (request, response) = ping(1);
        output.enqueue(request, response).unwrap();

        assert!(matches!(
            output.on_consumer_ready(),
            Err(Error::ChannelError { .. })
        ));
        assert_eq!(output.len(), 1);
        assert!(output.consumer_ready().await.is_err());
    }
}
