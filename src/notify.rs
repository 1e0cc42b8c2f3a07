use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed booking events, one channel per venue.
///
/// The routing layer subscribes here to push availability changes out to
/// clients; the engine publishes every event it commits.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a venue's events. Creates the channel if needed.
    pub fn subscribe(&self, venue_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(venue_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op if nobody is listening on the venue.
    pub fn send(&self, venue_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&venue_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a venue's channel (when the venue is deleted).
    pub fn remove(&self, venue_id: &Ulid) {
        self.channels.remove(venue_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
