//! Event bus with typed pub/sub

use alarm_core::{Context, Event, EventData, EventType};
use dashmap::DashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcast bus keyed by event type
///
/// Every event type gets its own broadcast channel, created lazily on first
/// subscription. Events are additionally delivered to match-all subscribers.
pub struct EventBus {
    channels: DashMap<EventType, broadcast::Sender<Event>>,
    match_all: broadcast::Sender<Event>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all, _) = broadcast::channel(capacity);
        Self {
            channels: DashMap::new(),
            match_all,
            capacity,
        }
    }

    /// Receive every event of `event_type`
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> broadcast::Receiver<Event> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing");

        if event_type.is_match_all() {
            return self.match_all.subscribe();
        }

        self.channels
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Receive every event whose payload deserializes into `T`
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver {
            rx: self.subscribe(T::event_type()),
            _marker: PhantomData,
        }
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.match_all.subscribe()
    }

    /// Deliver an event to its type's subscribers and to match-all subscribers
    pub fn fire(&self, event: Event) {
        trace!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.channels.get(&event.event_type) {
            // A send error only means nobody is listening right now
            let _ = sender.send(event.clone());
        }
        let _ = self.match_all.send(event);
    }

    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        match serde_json::to_value(&data) {
            Ok(json) => self.fire(Event::new(T::event_type(), json, context)),
            Err(e) => warn!(
                event_type = T::event_type(),
                error = %e,
                "Dropping event with unserializable payload"
            ),
        }
    }

    /// Number of event types with a channel
    pub fn listener_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that yields only events whose data parses as `T`
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<Event>,
    _marker: PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    /// Next event that deserializes; malformed payloads are skipped
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            match serde_json::from_value::<T>(event.data.clone()) {
                Ok(data) => return Ok(event.map(|_| data)),
                Err(e) => trace!(error = %e, "Skipping malformed event payload"),
            }
        }
    }
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use alarm_core::events::StateChangedData;
    use alarm_core::{EntityId, State};
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_subscribe_and_fire() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("alarm_triggered");

        bus.fire(Event::new(
            "alarm_triggered",
            json!({"source": "binary_sensor.door"}),
            Context::new(),
        ));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type.as_str(), "alarm_triggered");
        assert_eq!(received.data["source"], "binary_sensor.door");
    }

    #[tokio::test]
    async fn test_match_all_sees_every_type() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(EventType::match_all());

        bus.fire(Event::new("a", json!({}), Context::new()));
        bus.fire(Event::new("b", json!({}), Context::new()));

        assert_eq!(rx.recv().await.unwrap().event_type.as_str(), "a");
        assert_eq!(rx.recv().await.unwrap().event_type.as_str(), "b");
    }

    #[tokio::test]
    async fn test_typed_subscription() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_typed::<StateChangedData>();

        let entity_id = EntityId::new("binary_sensor", "window").unwrap();
        let state = State::new(entity_id.clone(), "on", HashMap::new(), Context::new());
        bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state: None,
                new_state: Some(state),
            },
            Context::new(),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.entity_id.to_string(), "binary_sensor.window");
        assert!(event.data.new_state.unwrap().is_on());
    }

    #[tokio::test]
    async fn test_typed_receiver_skips_malformed() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_typed::<StateChangedData>();

        bus.fire(Event::new("state_changed", json!({"bogus": 1}), Context::new()));
        let entity_id = EntityId::new("person", "anna").unwrap();
        bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state: None,
                new_state: None,
            },
            Context::new(),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.entity_id.to_string(), "person.anna");
    }

    #[test]
    fn test_no_cross_type_delivery() {
        let bus = EventBus::new();
        let _rx_a = bus.subscribe("a");
        let mut rx_b = bus.subscribe("b");

        bus.fire(Event::new("a", json!({}), Context::new()));
        assert!(rx_b.try_recv().is_err());
        assert_eq!(bus.listener_count(), 2);
    }
}
