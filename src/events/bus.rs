//! Publish/subscribe channel bridging background processes to the client

use super::types::LifecycleEvent;
use crate::error::Result;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 256;

/// Lifecycle event channel
///
/// Every subscriber sees every event published after it subscribed, in
/// publish order. Delivery is at-most-once: a subscriber that falls more than
/// `capacity` events behind skips the oldest ones.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a typed event, returning how many subscribers received it
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No subscribers for {}", name);
                0
            }
        }
    }

    /// Validate and publish an untyped event coming from outside the process
    pub fn publish_raw(&self, name: &str, payload: Value) -> Result<usize> {
        match LifecycleEvent::from_envelope(name, payload) {
            Ok(event) => Ok(self.publish(event)),
            Err(e) => {
                warn!("Rejected event on channel: {}", e);
                Err(e)
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive the next event, skipping over lag; `None` once the bus is gone
pub async fn next_event(
    receiver: &mut broadcast::Receiver<LifecycleEvent>,
    consumer: &str,
) -> Option<LifecycleEvent> {
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!("{} lagged behind the event channel, {} events skipped", consumer, skipped);
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{SCRAPER_COMPLETE, SCRAPER_ON_CHANGE};
    use serde_json::json;

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(LifecycleEvent::ScraperChange { max: 1.0, min: 0.0, current: 0.5 });
        bus.publish(LifecycleEvent::ScraperComplete);

        assert!(matches!(
            next_event(&mut rx, "test").await,
            Some(LifecycleEvent::ScraperChange { .. })
        ));
        assert_eq!(next_event(&mut rx, "test").await, Some(LifecycleEvent::ScraperComplete));
    }

    #[tokio::test]
    async fn test_publish_raw_validates() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        assert!(bus.publish_raw(SCRAPER_ON_CHANGE, json!({ "max": 1 })).is_err());
        assert!(bus.publish_raw("Unknown:Event", json!({})).is_err());
        assert_eq!(bus.publish_raw(SCRAPER_COMPLETE, json!({})).unwrap(), 1);

        assert_eq!(next_event(&mut rx, "test").await, Some(LifecycleEvent::ScraperComplete));
    }

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_receiving() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.publish(LifecycleEvent::ScraperChange { max: 10.0, min: 0.0, current: i as f64 });
        }

        // The two most recent events survive
        assert_eq!(
            next_event(&mut rx, "test").await,
            Some(LifecycleEvent::ScraperChange { max: 10.0, min: 0.0, current: 3.0 })
        );
        assert_eq!(
            next_event(&mut rx, "test").await,
            Some(LifecycleEvent::ScraperChange { max: 10.0, min: 0.0, current: 4.0 })
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(LifecycleEvent::ScraperComplete), 0);
    }
}
