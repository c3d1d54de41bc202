//! Current entity states

use crate::EventBus;
use alarm_core::events::StateChangedData;
use alarm_core::{Context, EntityId, State};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// In-memory store of the latest state of every entity
///
/// Every write and removal fires a `state_changed` event on the bus, which is
/// what sensor and presence trackers listen to.
pub struct StateStore {
    states: DashMap<String, State>,
    bus: Arc<EventBus>,
}

impl StateStore {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            bus,
        }
    }

    /// Write the state of an entity and fire `state_changed`
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let key = entity_id.to_string();
        let old_state = self.get(&key);

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };

        debug!(
            state = %new_state.state,
            previous = old_state.as_ref().map(|s| s.state.as_str()).unwrap_or("-"),
            "Writing state"
        );

        self.states.insert(key, new_state.clone());
        self.bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );

        new_state
    }

    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.states
            .get(entity_id)
            .map(|s| s.state == state)
            .unwrap_or(false)
    }

    /// All entity ids of a domain, sorted
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .states
            .iter()
            .filter(|s| s.entity_id.in_domain(domain))
            .map(|s| s.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drop an entity and fire `state_changed` with no new state
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let (_, old) = self.states.remove(&entity_id.to_string())?;
        debug!("Removing state");
        self.bus.fire_typed(
            StateChangedData {
                entity_id: entity_id.clone(),
                old_state: Some(old.clone()),
                new_state: None,
            },
            context,
        );
        Some(old)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

pub type SharedStateStore = Arc<StateStore>;
