//! lectern-worker – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Make sure an ffmpeg binary is available.
//! 4. Initialise the ONNX runtime when this worker runs vision models.
//! 5. Load the models the configured job kind needs.
//! 6. Connect to the backend database and object storage.
//! 7. Serve jobs over the queue link, reconnecting until shutdown.

mod config;
mod db;
mod error;
mod jobs;
mod models;
mod queue;
mod storage;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::db::postgres::PgStore;
use crate::jobs::{JobKind, WorkerContext};
use crate::queue::JobLink;
use crate::storage::ObjectStorage;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: LECTERN_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        worker = %cfg.worker_id,
        kind = %cfg.job_kind,
        "lectern-worker starting"
    );

    // ── 3. ffmpeg ──────────────────────────────────────────────────────────────
    // Fetches a static build on first start; a no-op once one is in place.
    tokio::task::spawn_blocking(ffmpeg_sidecar::download::auto_download)
        .await
        .map_err(|_| anyhow::anyhow!("ffmpeg download task panicked"))??;
    info!("ffmpeg ready");

    // ── 4. ONNX runtime ────────────────────────────────────────────────────────
    if cfg.job_kind == JobKind::Slides
        && (cfg.localizer_model.is_some() || cfg.embedder_model.is_some())
    {
        match &cfg.onnx_dylib {
            Some(path) => ort::init_from(path).with_name("lectern").commit()?,
            None => ort::init().with_name("lectern").commit()?,
        };
        info!("onnxruntime initialised");
    }

    // ── 5. Models ──────────────────────────────────────────────────────────────
    let registry = models::build_registry(&cfg, cfg.job_kind)?;

    // ── 6. Backend connections ─────────────────────────────────────────────────
    let store = PgStore::connect(&cfg.database_url).await?;
    info!("database ready");

    let storage = ObjectStorage::from_config(&cfg)?;
    info!(bucket = %cfg.s3_bucket, "object storage ready");

    // ── 7. Job loop with reconnects ────────────────────────────────────────────
    let config = Arc::new(cfg);
    let store = Arc::new(store);
    let storage = Arc::new(storage);

    // One signal future polled across iterations; every arm that sees it
    // fire leaves the loop before it could be polled again.
    let mut shutdown = std::pin::pin!(shutdown_signal());
    let mut stopping = false;
    while !stopping {
        let mut link = tokio::select! {
            _ = &mut shutdown => break,
            connected = JobLink::connect(&config.queue_url, &config.worker_id, config.job_kind) => {
                match connected {
                    Ok(link) => link,
                    Err(e) => {
                        warn!(error = %e, "queue connect failed; retrying");
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                        }
                    }
                }
            }
        };
        info!(url = %config.queue_url, "registered with the job queue");

        let ctx = WorkerContext {
            config: Arc::clone(&config),
            store: Arc::clone(&store),
            storage: Arc::clone(&storage),
            models: registry.clone(),
            publisher: link.publisher(),
        };

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    stopping = true;
                    break;
                }
                assignment = link.next_job() => match assignment {
                    // Assignments run to completion; shutdown is honoured
                    // between jobs, never in the middle of one.
                    Some(job) => jobs::handle_job(&ctx, job.job_id).await,
                    None => {
                        warn!("job link closed; reconnecting");
                        break;
                    }
                },
            }
        }

        if !stopping {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    }

    info!("lectern-worker stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
