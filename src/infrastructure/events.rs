//! Event Broadcasting
//!
//! Observer registry for live monitor events. Listeners are keyed by id and
//! receive events over unbounded channels, so a slow consumer never blocks
//! the notification delivery path.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::models::MonitorEvent;

#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<HashMap<String, mpsc::UnboundedSender<MonitorEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Subscribing again under the same id replaces the
    /// previous registration; its receiver sees the channel close.
    pub fn subscribe(&self, id: impl Into<String>) -> mpsc::UnboundedReceiver<MonitorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().unwrap().insert(id.into(), tx);
        rx
    }

    pub fn unsubscribe(&self, id: &str) {
        self.listeners.lock().unwrap().remove(id);
    }

    /// Drop every listener. Used on disconnect so no subscription survives
    /// the link it was attached to.
    pub fn clear(&self) {
        self.listeners.lock().unwrap().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Fan an event out to all listeners, pruning the ones whose receivers
    /// have been dropped.
    pub fn broadcast(&self, event: &MonitorEvent) {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|id, tx| {
            if tx.send(event.clone()).is_ok() {
                true
            } else {
                debug!("Dropping listener '{}' with closed receiver", id);
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ConnectionStatus, PauseReason};

    #[test]
    fn test_subscribe_and_broadcast() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("consumer");

        bus.broadcast(&MonitorEvent::ConnectionStatus(ConnectionStatus::Connected));
        match rx.try_recv().unwrap() {
            MonitorEvent::ConnectionStatus(ConnectionStatus::Connected) => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("consumer");
        bus.unsubscribe("consumer");

        bus.broadcast(&MonitorEvent::SessionPaused {
            reason: PauseReason::User,
        });
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_dead_receivers_pruned_on_broadcast() {
        let bus = EventBus::new();
        let rx = bus.subscribe("gone");
        drop(rx);
        let mut live = bus.subscribe("live");

        bus.broadcast(&MonitorEvent::ConnectionStatus(
            ConnectionStatus::Disconnected,
        ));
        assert_eq!(bus.listener_count(), 1);
        assert!(live.try_recv().is_ok());
    }

    #[test]
    fn test_clear_removes_all_listeners() {
        let bus = EventBus::new();
        let _a = bus.subscribe("a");
        let _b = bus.subscribe("b");
        bus.clear();
        assert_eq!(bus.listener_count(), 0);
    }
}
