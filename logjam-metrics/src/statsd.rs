use logjam_statsd::{CounterMetric, GaugeMetric, TimerMetric};

/// Counter metrics for the metric collectors.
pub enum MetricCounters {
    /// Incremented for every event recorded by a collector.
    EventRecorded,

    /// Incremented for every event a collector refused to record.
    ///
    /// Tagged by `reason`:
    ///  - `non_finite`: the primary value is NaN or infinite.
    ///  - `invalid_metric`: the `metric` label cannot be used in a family name.
    EventDropped,

    /// Number of actions removed by the eviction sweep.
    ActionsEvicted,

    /// Incremented for every sub-metric of an event that was not recorded, because it is not
    /// declared, not finite or named like a request timing.
    ///
    /// Only emitted when the `debug` option is set.
    SubMetricSkipped,
}

impl CounterMetric for MetricCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::EventRecorded => "collector.event.recorded",
            Self::EventDropped => "collector.event.dropped",
            Self::ActionsEvicted => "collector.actions.evicted",
            Self::SubMetricSkipped => "collector.submetric.skipped",
        }
    }
}

/// Gauge metrics for the collector manager.
pub enum MetricGauges {
    /// The number of live collectors.
    Collectors,

    /// The number of series across all families of a collector after a sweep.
    Series,
}

impl GaugeMetric for MetricGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::Collectors => "manager.collectors",
            Self::Series => "collector.series",
        }
    }
}

/// Timer metrics for the collectors.
pub enum MetricTimers {
    /// Time spent evicting stale actions, including the time waiting for the lock.
    SweepDuration,
}

impl TimerMetric for MetricTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::SweepDuration => "collector.sweep.duration",
        }
    }
}
