use std::sync::Arc;
use std::time::Duration;

use logjam_statsd::metric;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::collector::Collector;
use crate::statsd::MetricGauges;

/// Background task evicting stale actions of one collector.
///
/// The task runs until [`stop`](Self::stop) is called or the sweeper is dropped. Dropping only
/// signals the task, `stop` also waits for it to finish.
#[derive(Debug)]
pub struct Sweeper {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawns a sweeper on the current tokio runtime.
    ///
    /// The first sweep happens one `interval` after spawning.
    pub fn spawn(collector: Arc<Collector>, interval: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        // Tokio's clock, so that paused time in tests also ages actions.
                        collector.evict_stale_actions(Instant::now().into_std());
                        metric!(
                            gauge(MetricGauges::Series) = collector.series_count() as u64,
                            app_env = collector.app_env().as_str(),
                        );
                    }
                }
            }

            logjam_log::trace!(app_env = collector.app_env().as_str(), "sweeper stopped");
        });

        Self { stop, handle }
    }

    /// Signals the task to stop and waits until it has finished.
    pub async fn stop(self) {
        self.stop.send(true).ok();

        if let Err(error) = self.handle.await {
            if error.is_panic() {
                std::panic::resume_unwind(error.into_panic());
            }
        }
    }

    /// Returns `true` if the task has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use crate::{EventKind, MetricEvent, Options, Props, StreamDefinition};

    use super::*;

    fn collector() -> Arc<Collector> {
        let stream = StreamDefinition {
            app: "shop".to_owned(),
            env: "production".to_owned(),
            ..Default::default()
        };
        let options = Arc::new(Options::default());
        Arc::new(Collector::new(stream.app_env().unwrap(), &stream, options))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_stale_actions() {
        let collector = collector();
        let event = MetricEvent::new(EventKind::Log, Props::from_map([("action", "A#b")]), 0.1);
        collector.record(&event);

        let sweeper = Sweeper::spawn(Arc::clone(&collector), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(4 * 60 + 1)).await;
        assert_eq!(collector.action_count(), 1);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert_eq!(collector.action_count(), 0);

        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_joins_task() {
        let collector = collector();
        let sweeper = Sweeper::spawn(Arc::clone(&collector), Duration::from_secs(60));
        assert_eq!(Arc::strong_count(&collector), 2);

        sweeper.stop().await;
        assert_eq!(Arc::strong_count(&collector), 1);
    }
}
