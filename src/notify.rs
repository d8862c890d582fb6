use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::limits::FEED_CHANNEL_CAPACITY;
use crate::model::ChangeEvent;

/// Broadcast hub for change events, one channel per resource key.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<ChangeEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes on a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource: &str) -> broadcast::Receiver<ChangeEvent> {
        let sender = self
            .channels
            .entry(resource.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a change. No-op if nobody is listening; a channel whose
    /// receivers are all gone is dropped.
    pub fn send(&self, resource: &str, event: &ChangeEvent) {
        let delivered = match self.channels.get(resource) {
            Some(sender) => sender.send(event.clone()).is_ok(),
            None => return,
        };
        if !delivered {
            self.channels
                .remove_if(resource, |_, sender| sender.receiver_count() == 0);
        }
    }

    /// Drop every channel nobody is subscribed to any more.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn subscriber_count(&self, resource: &str) -> usize {
        self.channels
            .get(resource)
            .map_or(0, |s| s.receiver_count())
    }
}
