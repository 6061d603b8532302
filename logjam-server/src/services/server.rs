use std::io;
use std::net::{SocketAddr, TcpListener};

use logjam_statsd::metric;
use logjam_system::{Controller, Receiver, Service};

use crate::service::ServiceState;
use crate::statsd::ServerCounters;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[from] io::Error),
}

fn listen(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// HTTP server service.
///
/// Hosts the scrape and ingest endpoints. The server stops accepting connections when a shutdown
/// is triggered and finishes once all open connections are closed.
#[derive(Debug)]
pub struct HttpServer {
    listener: TcpListener,
    state: ServiceState,
}

impl HttpServer {
    /// Binds the listener, so that bind failures are reported before any service starts.
    pub fn new(addr: SocketAddr, state: ServiceState) -> Result<Self, ServerError> {
        Ok(Self {
            listener: listen(addr)?,
            state,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Service for HttpServer {
    type Interface = ();

    async fn run(self, _rx: Receiver<Self::Interface>) {
        let Self { listener, state } = self;

        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(error) => {
                logjam_log::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to register listener"
                );
                return;
            }
        };

        logjam_log::info!("spawning http server");
        if let Ok(addr) = listener.local_addr() {
            logjam_log::info!("  listening on http://{addr}/");
        }
        metric!(counter(ServerCounters::ServerStarting) += 1);

        let app = crate::endpoints::routes().with_state(state);
        let mut shutdown = Controller::shutdown_handle();

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.notified().await;
                logjam_log::info!("shutting down HTTP server");
            })
            .await;

        if let Err(error) = result {
            logjam_log::error!(
                error = &error as &dyn std::error::Error,
                "http server failed"
            );
        }
    }
}
