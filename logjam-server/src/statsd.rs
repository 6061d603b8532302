use logjam_statsd::{CounterMetric, DistributionMetric, GaugeMetric, TimerMetric};

/// Counter metrics used by the exporter.
pub enum ServerCounters {
    /// Incremented once when the HTTP server starts.
    ServerStarting,

    /// Number of ingested messages by their outcome.
    ///
    /// This metric is tagged with:
    ///  - `outcome`: `processed`, `invalid`, `ignored`, `missed`, `dropped` or `heartbeat`.
    Messages,

    /// Number of stream definition fetches.
    ///
    /// This metric is tagged with:
    ///  - `result`: `success` or `failure`.
    StreamsFetched,
}

impl CounterMetric for ServerCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::ServerStarting => "server.starting",
            Self::Messages => "messages",
            Self::StreamsFetched => "streams.fetched",
        }
    }
}

/// Gauge metrics used by the exporter.
pub enum ServerGauges {
    /// Number of messages waiting for a decoder.
    QueueSize,
}

impl GaugeMetric for ServerGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::QueueSize => "ingest.queue.size",
        }
    }
}

/// Distribution metrics used by the exporter.
pub enum ServerDistributions {
    /// Size of a rendered scrape in bytes.
    ScrapeSize,
}

impl DistributionMetric for ServerDistributions {
    fn name(&self) -> &'static str {
        match *self {
            Self::ScrapeSize => "scrape.size",
        }
    }
}

/// Timer metrics used by the exporter.
pub enum ServerTimers {
    /// Time to gather and encode all collectors for a scrape.
    ScrapeDuration,

    /// Time to fetch the stream definitions from the control plane.
    StreamsFetchDuration,
}

impl TimerMetric for ServerTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::ScrapeDuration => "scrape.duration",
            Self::StreamsFetchDuration => "streams.fetch.duration",
        }
    }
}
