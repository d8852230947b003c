//! In-process fan-out of stored events to live WebSocket subscriptions.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::event::Event;

/// Buffered events per receiver before a slow connection starts lagging.
const CHANNEL_CAPACITY: usize = 1024;

/// Broadcast registry every WebSocket connection subscribes to.
#[derive(Debug, Clone)]
pub struct LocalFanout {
    tx: broadcast::Sender<Arc<Event>>,
}

impl Default for LocalFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFanout {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Push `ev` to every current receiver. Having no receivers is not an error.
    pub fn broadcast(&self, ev: &Event) {
        let _ = self.tx.send(Arc::new(ev.clone()));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }
}
