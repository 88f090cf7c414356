//! Request classification and store dispatch.
//!
//! [`route`] decides what a request needs: an immediate answer (`PING`), a
//! store call, or rejection of that single item (unknown method).
//! [`store_call`] builds the future for a store call. The dispatch instant
//! is taken when the call is built and elapsed time is measured as soon as
//! the store answers.

use super::{
    batch::UnitId,
    correlator::{Completion, Outcome},
};
use futures::future::BoxFuture;
use quota_pipeline_core::{Error, Method, QuotaStore, Request, Response, StatusQuery};
use std::sync::Arc;
use tokio::time::Instant;

/// The store operation a request maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StoreOp {
    Take,
    Wait,
    Put,
    Get,
    Status,
}

#[derive(Debug)]
pub(crate) enum Route {
    Immediate(Response),
    Store(StoreOp),
    Reject(Error),
}

pub(crate) fn route(request: &Request) -> Route {
    match &request.method {
        Method::Ping => Route::Immediate(Response::pong(request.id)),
        Method::Take => Route::Store(StoreOp::Take),
        Method::Wait => Route::Store(StoreOp::Wait),
        Method::Put => Route::Store(StoreOp::Put),
        Method::Get => Route::Store(StoreOp::Get),
        Method::Status => Route::Store(StoreOp::Status),
        Method::Other(name) => Route::Reject(Error::UnknownMethod {
            method: name.clone(),
        }),
    }
}

pub(crate) type InFlight = BoxFuture<'static, Completion>;

/// Issues `op` against the store for `request`.
pub(crate) fn store_call<S: QuotaStore>(
    store: Arc<S>,
    op: StoreOp,
    unit: UnitId,
    request: Arc<Request>,
) -> InFlight {
    let started = Instant::now();
    Box::pin(async move {
        let outcome = match op {
            StoreOp::Take => Outcome::Bucket(store.take(&request).await),
            StoreOp::Wait => Outcome::Bucket(store.wait(&request).await),
            StoreOp::Put => Outcome::Bucket(store.put(&request).await),
            StoreOp::Get => Outcome::Bucket(store.get(&request).await),
            StoreOp::Status => {
                let query = StatusQuery::from(&*request);
                Outcome::Status(store.status(&query).await)
            }
        };
        Completion {
            unit,
            took: started.elapsed(),
            request,
            outcome,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use core::time::Duration;
    use quota_pipeline_core::{BucketState, StatusResult, StoreError};

    struct InstantStore;

    #[async_trait]
    impl QuotaStore for InstantStore {
        async fn take(&self, _request: &Request) -> Result<BucketState, StoreError> {
            Ok(BucketState::default())
        }

        async fn wait(&self, _request: &Request) -> Result<BucketState, StoreError> {
            Ok(BucketState::default())
        }

        async fn put(&self, _request: &Request) -> Result<BucketState, StoreError> {
            Ok(BucketState::default())
        }

        async fn get(&self, _request: &Request) -> Result<BucketState, StoreError> {
            Ok(BucketState::default())
        }

        async fn status(&self, _query: &StatusQuery) -> Result<StatusResult, StoreError> {
            Ok(StatusResult::default())
        }
    }

    #[test]
    fn answers_ping_inline() {
        match route(&Request::ping(42)) {
            Route::Immediate(Response::Pong { request_id }) => assert_eq!(request_id, 42),
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn sends_quota_methods_to_store() {
        for (method, op) in [
            (Method::Take, StoreOp::Take),
            (Method::Wait, StoreOp::Wait),
            (Method::Put, StoreOp::Put),
            (Method::Get, StoreOp::Get),
            (Method::Status, StoreOp::Status),
        ] {
            let request = Request::new(1, method, "ip", "1.2.3.4");
            match route(&request) {
                Route::Store(routed) => assert_eq!(routed, op),
                other => panic!("unexpected route: {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_unknown_method() {
        let request = Request::new(1, "FROB", "ip", "1.2.3.4");
        match route(&request) {
            Route::Reject(Error::UnknownMethod { method }) => assert_eq!(method, "FROB"),
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn latency_counts_from_dispatch() {
        let request = Arc::new(Request::new(1, Method::Take, "ip", "1.2.3.4"));
        let call = store_call(Arc::new(InstantStore), StoreOp::Take, 7, request);

        // Not polled yet; the wait before the first poll still counts.
        tokio::time::advance(Duration::from_millis(3)).await;
        let completion = call.await;

        assert_eq!(completion.unit, 7);
        assert_eq!(completion.took, Duration::from_millis(3));
        assert!(matches!(completion.outcome, Outcome::Bucket(Ok(_))));
    }
}
