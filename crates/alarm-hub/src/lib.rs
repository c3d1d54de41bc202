//! In-process host for the alarm engine
//!
//! The alarm panel never owns sensors, lights or notifiers. It reads entity
//! states, listens for state changes and asks the host to run services.
//! This crate provides those three contracts plus the subscription helpers
//! the panel binds its handlers with:
//!
//! - [`EventBus`] - typed pub/sub over `tokio::sync::broadcast`
//! - [`StateStore`] - current entity states, fires `state_changed`
//! - [`ServiceRegistry`] - async `domain.service` handlers
//! - [`track_state_change`] / [`track_time_change`] - handler bindings that
//!   live as long as the returned [`Subscription`]

mod bus;
mod services;
mod states;
mod track;

pub use bus::{EventBus, SharedEventBus, TypedEventReceiver};
pub use services::{
    ServiceDescription, ServiceError, ServiceFuture, ServiceHandler, ServiceRegistry,
    ServiceResult, SharedServiceRegistry,
};
pub use states::{SharedStateStore, StateStore};
pub use track::{next_occurrence, track_state_change, track_time_change, Subscription};

use std::sync::Arc;

/// The three host collaborators bundled together
#[derive(Clone)]
pub struct Hub {
    pub bus: Arc<EventBus>,
    pub states: Arc<StateStore>,
    pub services: Arc<ServiceRegistry>,
}

impl Hub {
    pub fn new() -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateStore::new(bus.clone()));
        let services = Arc::new(ServiceRegistry::with_bus(bus.clone()));
        Self {
            bus,
            states,
            services,
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
