use std::time::Duration;

use logjam_system::{Controller, FromMessage, Interface, NoResponse, Receiver, Service};
use tokio::time::{Instant, MissedTickBehavior};

/// Signals that the upstream bus is alive.
#[derive(Debug)]
pub struct Heartbeat;

impl Interface for Heartbeat {}

impl FromMessage<Self> for Heartbeat {
    type Response = NoResponse;

    fn from_message(message: Self, _: ()) -> Self {
        message
    }
}

/// Tracks the time of the last heartbeat.
#[derive(Debug)]
struct Liveness {
    abort_after: Duration,
    last_heartbeat: Instant,
}

impl Liveness {
    fn new(abort_after: Duration, now: Instant) -> Self {
        Self {
            abort_after,
            last_heartbeat: now,
        }
    }

    fn heartbeat(&mut self, now: Instant) {
        self.last_heartbeat = now;
    }

    /// A zero `abort_after` never expires.
    fn is_expired(&self, now: Instant) -> bool {
        !self.abort_after.is_zero()
            && now.saturating_duration_since(self.last_heartbeat) > self.abort_after
    }
}

/// Exits the process when no heartbeat arrives for `abort_after`.
///
/// A zero `abort_after` disables the watchdog.
pub struct Watchdog {
    abort_after: Duration,
    check_interval: Duration,
    on_expired: Box<dyn FnOnce() + Send>,
}

impl Watchdog {
    pub fn new(abort_after: Duration) -> Self {
        Self {
            abort_after,
            check_interval: Duration::from_secs(1),
            on_expired: Box::new(|| std::process::exit(1)),
        }
    }

    #[cfg(test)]
    fn with_on_expired(abort_after: Duration, on_expired: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_expired: Box::new(on_expired),
            ..Self::new(abort_after)
        }
    }
}

impl Service for Watchdog {
    type Interface = Heartbeat;

    async fn run(self, mut rx: Receiver<Self::Interface>) {
        let Self {
            abort_after,
            check_interval,
            on_expired,
        } = self;

        if abort_after.is_zero() {
            logjam_log::info!("heartbeat watchdog disabled");
        }

        let mut liveness = Liveness::new(abort_after, Instant::now());
        let mut ticker = tokio::time::interval(check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = Controller::shutdown_handle();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                Some(Heartbeat) = rx.recv() => liveness.heartbeat(Instant::now()),
                _ = ticker.tick() => {
                    if liveness.is_expired(Instant::now()) {
                        logjam_log::error!(
                            "no heartbeat received for {}s, aborting",
                            abort_after.as_secs()
                        );
                        on_expired();
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    #[test]
    fn test_liveness() {
        let start = Instant::now();
        let mut liveness = Liveness::new(Duration::from_secs(60), start);

        assert!(!liveness.is_expired(start + Duration::from_secs(60)));
        assert!(liveness.is_expired(start + Duration::from_secs(61)));

        liveness.heartbeat(start + Duration::from_secs(30));
        assert!(!liveness.is_expired(start + Duration::from_secs(61)));
        assert!(liveness.is_expired(start + Duration::from_secs(91)));
    }

    #[test]
    fn test_liveness_disabled() {
        let start = Instant::now();
        let liveness = Liveness::new(Duration::ZERO, start);
        assert!(!liveness.is_expired(start + Duration::from_secs(3600)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_without_heartbeat() {
        let (tx, rx) = oneshot::channel();
        let _addr = Watchdog::with_on_expired(Duration::from_secs(5), move || {
            tx.send(Instant::now()).ok();
        })
        .start_detached();

        let start = Instant::now();
        let expired_at = rx.await.unwrap();
        assert!(expired_at - start > Duration::from_secs(5));
        assert!(expired_at - start <= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_keep_alive() {
        let (tx, mut rx) = oneshot::channel();
        let addr = Watchdog::with_on_expired(Duration::from_secs(5), move || {
            tx.send(()).ok();
        })
        .start_detached();

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            addr.send(Heartbeat);
        }
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_ok());
    }
}
