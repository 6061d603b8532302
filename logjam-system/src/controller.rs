use std::io;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::watch;

/// Shutdown request broadcast by the [`Controller`].
///
/// Services should stop accepting new work once notified. With a `timeout`, pending work may be
/// finished within that time. `None` indicates an immediate shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate forced shutdown.
    pub timeout: Option<Duration>,
}

static SHUTDOWN: Lazy<watch::Sender<Option<Shutdown>>> = Lazy::new(|| watch::channel(None).0);

/// Notifies a service about an upcoming shutdown.
///
/// Obtained from [`Controller::shutdown_handle`].
#[derive(Debug)]
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Returns the current shutdown state without waiting.
    pub fn get(&self) -> Option<Shutdown> {
        *self.0.borrow()
    }

    /// Waits for a shutdown.
    ///
    /// Resolves immediately if a shutdown has already been requested. Cancel safe, so it can be
    /// used in `tokio::select!` loops.
    pub async fn notified(&mut self) -> Shutdown {
        loop {
            if let Some(shutdown) = *self.0.borrow_and_update() {
                return shutdown;
            }

            // The sender lives in a static and is never dropped.
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Listens for process signals and broadcasts graceful shutdowns.
///
/// - `SIGINT` and `SIGQUIT` trigger an immediate shutdown.
/// - `SIGTERM` triggers a graceful shutdown with the configured timeout.
#[derive(Debug)]
pub struct Controller;

impl Controller {
    /// Starts listening for signals on the current runtime.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(shutdown_timeout: Duration) {
        tokio::spawn(async move {
            if let Err(error) = monitor_signals(shutdown_timeout).await {
                logjam_log::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to listen for shutdown signals"
                );
            }
        });
    }

    /// Returns a handle to wait for the shutdown signal.
    pub fn shutdown_handle() -> ShutdownHandle {
        ShutdownHandle(SHUTDOWN.subscribe())
    }

    /// Manually initiates a shutdown, as if a signal had been received.
    pub fn shutdown(timeout: Option<Duration>) {
        SHUTDOWN.send_replace(Some(Shutdown { timeout }));
    }
}

#[cfg(unix)]
async fn monitor_signals(timeout: Duration) -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_quit = signal(SignalKind::quit())?;
    let mut sig_term = signal(SignalKind::terminate())?;

    tokio::select! {
        biased;

        Some(()) = sig_int.recv() => {
            logjam_log::info!("SIGINT received, exiting");
            Controller::shutdown(None);
        }
        Some(()) = sig_quit.recv() => {
            logjam_log::info!("SIGQUIT received, exiting");
            Controller::shutdown(None);
        }
        Some(()) = sig_term.recv() => {
            logjam_log::info!("SIGTERM received, stopping in {}s", timeout.as_secs());
            Controller::shutdown(Some(timeout));
        }
        else => {}
    }

    Ok(())
}

#[cfg(not(unix))]
async fn monitor_signals(_timeout: Duration) -> io::Result<()> {
    tokio::signal::ctrl_c().await?;
    logjam_log::info!("CTRL-C received, exiting");
    Controller::shutdown(None);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_reaches_all_handles() {
        let mut early = Controller::shutdown_handle();
        assert_eq!(early.get(), None);

        let waiter = tokio::spawn(async move { early.notified().await });

        Controller::shutdown(Some(Duration::from_secs(5)));

        let expected = Shutdown {
            timeout: Some(Duration::from_secs(5)),
        };
        assert_eq!(waiter.await.ok(), Some(expected));

        // Handles created after the fact resolve immediately.
        let mut late = Controller::shutdown_handle();
        assert_eq!(late.notified().await, expected);
    }
}
