//! Event subscriptions with explicit, idempotent release

use crate::events::ChainEvent;

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Receiving end of an event stream.
///
/// Producers hold the matching `mpsc::Sender` and stop as soon as
/// `Sender::is_closed` reports the subscription gone. `close` may be called
/// any number of times; dropping the subscription closes it as well.
pub struct EventSubscription {
    id: Uuid,
    receiver: mpsc::Receiver<ChainEvent>,
    closed: bool,
}

impl EventSubscription {
    pub fn new(receiver: mpsc::Receiver<ChainEvent>) -> Self {
        crate::metrics::record_subscription_opened();
        let id = Uuid::new_v4();
        debug!("Opened event subscription {}", id);
        Self {
            id,
            receiver,
            closed: false,
        }
    }

    /// Create a connected sender/subscription pair
    pub fn channel(capacity: usize) -> (mpsc::Sender<ChainEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next delivered event; `None` once the producer is gone or after `close`
    pub async fn next(&mut self) -> Option<ChainEvent> {
        if self.closed {
            return None;
        }
        self.receiver.recv().await
    }

    /// Next event that is already buffered, without waiting
    pub fn try_next(&mut self) -> Option<ChainEvent> {
        if self.closed {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.receiver.close();
        crate::metrics::record_subscription_closed();
        debug!("Closed event subscription {}", self.id);
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}
