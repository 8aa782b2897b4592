//! Receive-side dispatch from the transport callback into a bounded queue.
//!
//! The transport calls [`RxDispatcher::deliver`] from its I/O loop. Delivery
//! never waits: a full queue drops the message with a warning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::session::{Inbound, Session};
use crate::transport::Transport;

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted and queued.
    Queued,
    /// Failed decryption, decoding or authentication.
    Rejected,
    /// Valid but the queue was full or closed.
    Dropped,
}

/// Delivery counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    queued: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
}

impl DispatchStats {
    /// Messages queued.
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Messages rejected by the session.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Messages dropped for lack of queue space.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Runs the session receive path and forwards results to a channel.
pub struct RxDispatcher<T: Transport> {
    session: Arc<Mutex<Session<T>>>,
    tx: mpsc::Sender<Inbound>,
    stats: Arc<DispatchStats>,
}

impl<T: Transport> RxDispatcher<T> {
    /// Dispatcher with a queue of `capacity` messages.
    pub fn new(session: Arc<Mutex<Session<T>>>, capacity: usize) -> (Self, mpsc::Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                session,
                tx,
                stats: Arc::new(DispatchStats::default()),
            },
            rx,
        )
    }

    /// Shared delivery counters.
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Handles one transport message.
    pub fn deliver(&self, bytes: &[u8]) -> DeliveryOutcome {
        let result = {
            let mut session = match self.session.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            session.receive(bytes)
        };

        let inbound = match result {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!(len = bytes.len(), error = %e, "inbound message rejected");
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return DeliveryOutcome::Rejected;
            }
        };

        match self.tx.try_send(inbound) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                DeliveryOutcome::Queued
            }
            Err(TrySendError::Full(dropped)) => {
                warn!(seq = dropped.envelope.sequence, "rx queue full, dropping message");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                DeliveryOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                warn!("rx queue closed, dropping message");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                DeliveryOutcome::Dropped
            }
        }
    }
}
