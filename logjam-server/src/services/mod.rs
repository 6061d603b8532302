//! Services of the exporter.
//!
//! - [`server::HttpServer`] hosts the endpoints.
//! - [`decoder::DecoderPool`] turns ingested messages into metric events on worker threads.
//! - [`streams::StreamsUpdater`] keeps the collectors in sync with the control plane.
//! - [`watchdog::Watchdog`] exits the process when the upstream bus stops sending heartbeats.
//! - [`stats::StatsReporter`] reports throughput.

pub mod decoder;
pub mod server;
pub mod stats;
pub mod streams;
pub mod watchdog;
