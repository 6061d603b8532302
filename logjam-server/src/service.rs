use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use logjam_metrics::CollectorManager;

use crate::services::decoder::IngestMessage;
use crate::stats::{Outcome, Stats};

#[derive(Debug)]
struct StateInner {
    manager: Arc<CollectorManager>,
    stats: Arc<Stats>,
    ingest: Sender<IngestMessage>,
}

/// Server state shared by all endpoints.
///
/// Holds a sender of the ingest queue. The decoders stop once the last clone of the state is
/// dropped.
#[derive(Clone, Debug)]
pub struct ServiceState {
    inner: Arc<StateInner>,
}

impl ServiceState {
    pub fn new(
        manager: Arc<CollectorManager>,
        stats: Arc<Stats>,
        ingest: Sender<IngestMessage>,
    ) -> Self {
        Self {
            inner: Arc::new(StateInner {
                manager,
                stats,
                ingest,
            }),
        }
    }

    /// Returns the collector manager.
    pub fn manager(&self) -> &CollectorManager {
        &self.inner.manager
    }

    /// Enqueues a message for the decoders without blocking.
    ///
    /// Returns `false` and counts the message as dropped if the queue is full or closed.
    pub fn ingest(&self, message: IngestMessage) -> bool {
        match self.inner.ingest.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.inner.stats.count(Outcome::Dropped);
                false
            }
        }
    }
}
