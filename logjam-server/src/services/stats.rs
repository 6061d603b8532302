use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver as QueueReceiver;
use logjam_metrics::CollectorManager;
use logjam_statsd::metric;
use logjam_system::{Controller, Receiver, Service};
use tokio::time::MissedTickBehavior;

use crate::services::decoder::IngestMessage;
use crate::stats::{Outcome, Stats, StatsSnapshot};
use crate::statsd::{ServerCounters, ServerGauges};

/// Periodically logs throughput and emits it via statsd.
///
/// Reports are logged at info level in verbose mode and at debug level otherwise.
#[derive(Debug)]
pub struct StatsReporter {
    stats: Arc<Stats>,
    manager: Arc<CollectorManager>,
    queue: QueueReceiver<IngestMessage>,
    interval: Duration,
    verbose: bool,
}

impl StatsReporter {
    pub fn new(
        stats: Arc<Stats>,
        manager: Arc<CollectorManager>,
        queue: QueueReceiver<IngestMessage>,
        interval: Duration,
        verbose: bool,
    ) -> Self {
        Self {
            stats,
            manager,
            queue,
            interval,
            verbose,
        }
    }

    fn report(&self) -> StatsSnapshot {
        let snapshot = self.stats.take();
        let queued = self.queue.len();

        for (outcome, count) in snapshot.iter() {
            metric!(
                counter(ServerCounters::Messages) += count as i64,
                outcome = outcome.as_str(),
            );
        }
        metric!(gauge(ServerGauges::QueueSize) = queued as u64);

        let message = format!(
            "processed {}, invalid {}, ignored {}, missed {}, dropped {}, heartbeats {}, queued {}, collectors {}",
            snapshot.get(Outcome::Processed),
            snapshot.get(Outcome::Invalid),
            snapshot.get(Outcome::Ignored),
            snapshot.get(Outcome::Missed),
            snapshot.get(Outcome::Dropped),
            snapshot.get(Outcome::Heartbeat),
            queued,
            self.manager.len(),
        );

        if self.verbose {
            logjam_log::info!("{message}");
        } else {
            logjam_log::debug!("{message}");
        }

        snapshot
    }
}

impl Service for StatsReporter {
    type Interface = ();

    async fn run(self, _rx: Receiver<Self::Interface>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut shutdown = Controller::shutdown_handle();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                _ = ticker.tick() => {
                    self.report();
                }
            }
        }

        self.report();
    }
}

#[cfg(test)]
mod tests {
    use logjam_metrics::{Options, StreamFilter};

    use super::*;

    #[tokio::test]
    async fn test_report() {
        let stats = Arc::new(Stats::default());
        let manager = Arc::new(CollectorManager::new(
            Arc::new(Options::default()),
            Duration::from_secs(60),
            StreamFilter::default(),
        ));
        let (_tx, rx) = crossbeam_channel::bounded(1);

        let reporter = StatsReporter::new(
            Arc::clone(&stats),
            manager,
            rx,
            Duration::from_secs(1),
            true,
        );

        stats.count(Outcome::Processed);
        stats.count(Outcome::Processed);
        stats.count(Outcome::Dropped);

        let captures = logjam_statsd::with_capturing_test_client(|| {
            let snapshot = reporter.report();
            assert_eq!(snapshot.get(Outcome::Processed), 2);
        });

        assert_eq!(
            captures,
            [
                "messages:2|c|#outcome:processed",
                "messages:1|c|#outcome:dropped",
                "ingest.queue.size:0|g",
            ]
        );

        assert!(reporter.report().is_empty());
    }
}
