//! Newline-delimited JSON front end: one request per input line, one
//! `{"request_id", "response"}` object per output line.

use crate::pipeline::{Delivery, PipelineHandle, ResponseStream};
use quota_pipeline_core::{Request, Response};
use serde::Serialize;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

#[derive(Serialize)]
struct OutputLine<'a> {
    request_id: u64,
    response: &'a Response,
}

/// Reads stdin on a plain thread so a pending read never holds up runtime
/// shutdown.
pub fn stdin_lines() -> mpsc::Receiver<io::Result<String>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::spawn(move || {
        for line in io::stdin().lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Feeds requests from `lines` into the pipeline until the input ends, a
/// shutdown is requested, or the pipeline stops.
///
/// Malformed lines are logged and skipped. Unknown methods are submitted and
/// reported through their receipt.
///
/// # Errors
///
/// Returns the first error reading from the line source.
pub async fn read_requests(
    handle: &PipelineHandle,
    mut lines: mpsc::Receiver<io::Result<String>>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            status = handle.terminated() => {
                tracing::warn!(?status, "Pipeline stopped, no longer reading input");
                break;
            }
            line = lines.recv() => line,
        };
        let Some(line) = line.transpose()? else {
            tracing::debug!("Reached end of input");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed request");
                continue;
            }
        };
        let request_id = request.id;

        let receipt = match handle.submit(request).await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::warn!(request_id, "Pipeline refused request: {}", e);
                break;
            }
        };
        tokio::spawn(async move {
            if let Err(e) = receipt.wait().await {
                tracing::warn!(request_id, "Request failed: {}", e);
            }
        });
    }

    Ok(())
}

/// Writes every delivered response to `out` as one JSON line, until the
/// pipeline has stopped and everything was delivered.
///
/// # Errors
///
/// Returns the first serialization or write error.
pub async fn write_responses<W>(responses: ResponseStream, out: &mut W) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut stream = responses.into_stream();

    while let Some(Delivery { request, response }) = stream.next().await {
        let mut line = serde_json::to_vec(&OutputLine {
            request_id: request.id,
            response: &response,
        })?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
    }

    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, PipelineConfig};
    use crate::server::store::{BucketType, MemoryStore};
    use core::time::Duration;
    use quota_pipeline_core::{Error, StoreError};
    use std::sync::Arc;

    fn spawn_pipeline() -> (PipelineHandle, ResponseStream) {
        let store = MemoryStore::new([BucketType {
            name: "ip".to_string(),
            size: 10,
            per_second: 1.0,
        }]);
        Pipeline::new(Arc::new(store), PipelineConfig::default()).spawn()
    }

    #[tokio::test]
    async fn stops_reading_once_the_pipeline_fails() {
        let (handle, _responses) = spawn_pipeline();
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        tx.send(Ok(r#"{"id":1,"method":"STATUS","type":"nope","key":""}"#.to_string()))
            .await
            .unwrap();

        // `tx` stays open: only the failure can end the loop.
        tokio::time::timeout(
            Duration::from_secs(5),
            read_requests(&handle, rx, &shutdown),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(matches!(
            handle.shutdown().await,
            Err(Error::Store(StoreError::UnknownBucketType { .. }))
        ));
        drop(tx);
    }

    #[tokio::test]
    async fn skips_malformed_lines_and_writes_responses() {
        let (handle, responses) = spawn_pipeline();
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        for line in ["not json", "", r#"{"id":1,"method":"PING"}"#] {
            tx.send(Ok(line.to_string())).await.unwrap();
        }
        drop(tx);

        read_requests(&handle, rx, &shutdown).await.unwrap();

        let mut out = Vec::new();
        let (stopped, written) =
            tokio::join!(handle.shutdown(), write_responses(responses, &mut out));
        stopped.unwrap();
        written.unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"request_id\":1,\"response\":{\"request_id\":1}}\n"
        );
    }

    #[tokio::test]
    async fn stops_reading_on_shutdown_request() {
        let (handle, _responses) = spawn_pipeline();
        let (_tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        read_requests(&handle, rx, &shutdown).await.unwrap();
        assert!(handle.status().is_running());
    }
}
