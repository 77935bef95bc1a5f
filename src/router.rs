use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::AdEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Routing table from placement id to the mediation layer's event channel.
///
/// Owned by the host and shared by every manager. A placement that was never
/// subscribed, or was unregistered by `destroy()`, silently swallows events.
pub struct CallbackRouter {
    channels: DashMap<String, broadcast::Sender<AdEvent>>,
}

impl Default for CallbackRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRouter {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a placement. Creates the route if needed.
    pub fn subscribe(&self, placement_id: &str) -> broadcast::Receiver<AdEvent> {
        let sender = self
            .channels
            .entry(placement_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Deliver an event. No-op if the placement has no route.
    pub fn send(&self, placement_id: &str, event: AdEvent) {
        metrics::counter!(
            crate::observability::EVENTS_TOTAL,
            "event" => event.label()
        )
        .increment(1);
        match self.channels.get(placement_id) {
            Some(sender) => {
                let _ = sender.send(event);
            }
            None => tracing::debug!("no route for {placement_id}, dropping {}", event.label()),
        }
    }

    /// Drop the route. Receivers observe the channel closing.
    pub fn unregister(&self, placement_id: &str) {
        self.channels.remove(placement_id);
    }

    pub fn is_registered(&self, placement_id: &str) -> bool {
        self.channels.contains_key(placement_id)
    }
}
