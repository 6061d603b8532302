//! The logjam exporter server.
//!
//! Messages of the logjam bus are posted to the ingest endpoint and queued for a pool of decoder
//! threads. The decoders route each message to the collector of its app-env, which aggregates it
//! into Prometheus families. Prometheus scrapes the aggregates from `/metrics`.
//!
//! ```text
//!  POST /ingest ──▶ queue ──▶ decoders ──▶ CollectorManager ──▶ Collector
//!                                │                                  ▲
//!                                ▼                                  │
//!                            Watchdog                  GET /metrics ┘
//! ```
//!
//! Alongside, the streams updater keeps the set of collectors in sync with the control plane and
//! the stats reporter logs throughput.

use std::sync::Arc;

use anyhow::Context;
use logjam_config::Config;
use logjam_metrics::CollectorManager;
use logjam_system::{Controller, Service};

use crate::service::ServiceState;
use crate::services::decoder::{Decoder, DecoderPool};
use crate::services::server::HttpServer;
use crate::services::stats::StatsReporter;
use crate::services::streams::StreamsUpdater;
use crate::services::watchdog::Watchdog;
use crate::stats::Stats;

mod endpoints;
mod exposition;
mod service;
mod services;
mod stats;
mod statsd;

pub use crate::services::server::ServerError;

/// Runs the exporter until a shutdown signal is received or the HTTP server fails.
///
/// Blocks the current thread. On shutdown the HTTP server stops first, then the decoders drain
/// the queue, and finally all collectors are dropped.
pub fn run(config: Config) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("logjam-exporter")
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    Controller::start(config.shutdown_timeout());

    let manager = Arc::new(CollectorManager::new(
        Arc::new(config.collector_options()),
        config.sweep_interval(),
        config.stream_filter(),
    ));
    let stats = Arc::new(Stats::default());
    let (ingest, queue) = crossbeam_channel::bounded(config.rcv_hwm());

    let server = HttpServer::new(
        config.listen_addr(),
        ServiceState::new(Arc::clone(&manager), Arc::clone(&stats), ingest),
    )?;

    let watchdog = Watchdog::new(config.abort_after()).start_detached();
    let decoder = Decoder::new(Arc::clone(&manager), Arc::clone(&stats), watchdog);
    let decoders = DecoderPool::start(config.parsers(), queue.clone(), Arc::new(decoder))
        .context("failed to spawn decoder threads")?;
    logjam_log::info!("started {} decoders", decoders.len());

    StreamsUpdater::new(&config, Arc::clone(&manager))
        .context("failed to create streams updater")?
        .start_detached();

    let (_, reporter) = StatsReporter::new(
        stats,
        Arc::clone(&manager),
        queue,
        config.stats_interval(),
        config.verbose(),
    )
    .start_joinable();

    let (_, mut server) = server.start_joinable();

    let mut shutdown = Controller::shutdown_handle();
    let mut server_stopped = false;
    let timeout = tokio::select! {
        signal = shutdown.notified() => signal.timeout,
        _ = &mut server => {
            logjam_log::error!("http server stopped unexpectedly");
            server_stopped = true;
            Controller::shutdown(None);
            None
        }
    };

    if !server_stopped {
        let graceful = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, &mut server).await.is_ok(),
            None => false,
        };

        if !graceful {
            server.abort();
            server.await.ok();
        }
    }

    // The server held the last senders of the queue, so the decoders finish once it is drained.
    tokio::task::spawn_blocking(move || decoders.join())
        .await
        .context("failed to join decoders")?;

    reporter.await.ok();
    manager.shutdown().await;

    logjam_log::info!("exporter shutdown complete");
    Ok(())
}
