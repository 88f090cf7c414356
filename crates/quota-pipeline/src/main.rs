use clap::Parser;
use quota_pipeline::pipeline::Pipeline;
use quota_pipeline::server::config::{CliArgs, ServerConfig};
use quota_pipeline::server::ndjson::{read_requests, stdin_lines, write_responses};
use quota_pipeline::server::store::MemoryStore;
use quota_pipeline::server::telemetry::{OtelMetrics, init_telemetry};
use std::sync::Arc;
use tokio::io::BufWriter;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let store = Arc::new(MemoryStore::new(config.buckets.clone()));
    let (handle, responses) = Pipeline::new(store, config.pipeline)
        .with_metrics(Arc::new(OtelMetrics))
        .spawn();

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let writer = tokio::spawn(async move {
        let mut out = BufWriter::new(tokio::io::stdout());
        write_responses(responses, &mut out).await
    });
    let read = read_requests(&handle, stdin_lines(), &shutdown).await;

    // Everything accepted so far is still answered before the pipeline stops.
    let outcome = handle.shutdown().await;
    let written = writer.await;
    providers.shutdown();

    read?;
    written??;
    if let Err(e) = outcome {
        tracing::error!("Pipeline failed: {}", e);
        return Err(e.into());
    }

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting quota pipeline with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting quota pipeline with {} bucket types",
            config.buckets.len()
        );
    }
}

async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
        () = token.cancelled() => return,
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
    token.cancel();
}
