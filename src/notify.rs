use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::CourtBroadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Group-messaging hub: one broadcast channel per court. Subscribing joins
/// the court's group, dropping the receiver leaves it, and `send` fans a
/// message out to every current member. No-op when nobody is listening.
pub struct NotifyHub {
    channels: DashMap<Uuid, broadcast::Sender<CourtBroadcast>>,
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

    /// Subscribe to a court's broadcasts. Creates the channel if needed.
    pub fn subscribe(&self, court_id: Uuid) -> broadcast::Receiver<CourtBroadcast> {
        let sender = self
            .channels
            .entry(court_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Broadcast to all of a court's subscribers.
    pub fn send(&self, court_id: Uuid, message: CourtBroadcast) {
        if let Some(sender) = self.channels.get(&court_id) {
            let receivers = sender.send(message).unwrap_or(0);
            if receivers > 0 {
                metrics::counter!(crate::observability::BROADCASTS_TOTAL)
                    .increment(receivers as u64);
            }
        }
    }

    /// Remove a court's channel (when the court is deleted).
    pub fn remove(&self, court_id: &Uuid) {
        self.channels.remove(court_id);
    }
}
