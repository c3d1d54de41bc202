//! Core host types for alarmcontrol
//!
//! The alarm engine talks to its host only through these types: entity ids,
//! entity states, events on the bus and service calls.

mod context;
mod entity_id;
mod event;
mod service_call;
mod state;

pub use context::Context;
pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use service_call::ServiceCall;
pub use state::State;

/// State value of an active binary entity
pub const STATE_ON: &str = "on";

/// State value of an inactive binary entity
pub const STATE_OFF: &str = "off";

/// Person state when the person is at the home zone
pub const STATE_HOME: &str = "home";

/// Person state when the person is outside every zone
pub const STATE_NOT_HOME: &str = "not_home";

/// Key used in service data to address entities
pub const ATTR_ENTITY_ID: &str = "entity_id";

/// Standard event types fired on the bus
pub mod events {
    use super::*;

    /// Fired whenever the state store writes an entity
    pub const STATE_CHANGED: &str = "state_changed";

    /// Fired for every dispatched service call
    pub const CALL_SERVICE: &str = "call_service";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for CALL_SERVICE events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct CallServiceData {
        pub domain: String,
        pub service: String,
        pub service_data: serde_json::Value,
    }

    impl EventData for CallServiceData {
        fn event_type() -> &'static str {
            CALL_SERVICE
        }
    }
}
