//! Stand-in device services
//!
//! A standalone host has no real lights or sirens. These services write the
//! requested state into the store instead, so the panel's effects are
//! visible as entity states and other listeners see them.

use alarm_core::{EntityId, ServiceCall, State, STATE_OFF, STATE_ON};
use alarm_hub::{ServiceRegistry, StateStore};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Domains with plain `turn_on` / `turn_off` / `toggle`
pub const ON_OFF_DOMAINS: &[&str] = &["light", "switch", "siren", "input_boolean"];

/// Service data keys copied into attributes on `turn_on`
const TURN_ON_ATTRIBUTES: &[&str] = &["brightness", "duration", "tone", "volume_level"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputBooleanConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub initial: Option<bool>,
}

/// Create `input_boolean.*` entities from the `input_boolean:` section
pub fn load_input_booleans(
    config: &HashMap<String, Option<InputBooleanConfig>>,
    states: &StateStore,
) -> usize {
    let mut count = 0;

    for (id, config) in config {
        let entity_id = match EntityId::new("input_boolean", id) {
            Ok(e) => e,
            Err(e) => {
                warn!("Invalid input_boolean id '{}': {}", id, e);
                continue;
            }
        };
        let config = config.clone().unwrap_or_default();

        let mut attributes = HashMap::new();
        if let Some(name) = &config.name {
            attributes.insert("friendly_name".to_string(), json!(name));
        }
        if let Some(icon) = &config.icon {
            attributes.insert("icon".to_string(), json!(icon));
        }

        let state = if config.initial.unwrap_or(false) {
            STATE_ON
        } else {
            STATE_OFF
        };
        states.set(entity_id, state, attributes, Default::default());
        count += 1;
    }

    if count > 0 {
        info!("Loaded {} input_boolean entities", count);
    }
    count
}

fn target_entities(call: &ServiceCall) -> Vec<EntityId> {
    call.entity_ids()
        .into_iter()
        .filter_map(|id| id.parse::<EntityId>().ok())
        .filter(|id| id.domain() == call.domain)
        .collect()
}

fn attributes_of(current: Option<&State>) -> HashMap<String, Value> {
    current.map(|s| s.attributes.clone()).unwrap_or_default()
}

/// Apply `update` to every targeted entity; unknown entities start empty
fn update_targets<F>(states: &StateStore, call: &ServiceCall, update: F)
where
    F: Fn(Option<&State>, &mut HashMap<String, Value>) -> String,
{
    for entity_id in target_entities(call) {
        let current = states.get(&entity_id.to_string());
        let mut attributes = attributes_of(current.as_ref());
        let new_state = update(current.as_ref(), &mut attributes);
        debug!(%entity_id, state = %new_state, service = %call.service_id(), "Device updated");
        states.set(entity_id, new_state, attributes, call.context.clone());
    }
}

fn register_on_off(services: &ServiceRegistry, states: &Arc<StateStore>, domain: &'static str) {
    let s = states.clone();
    services.register(domain, "turn_on", move |call: ServiceCall| {
        let states = s.clone();
        async move {
            update_targets(&states, &call, |_, attributes| {
                for key in TURN_ON_ATTRIBUTES {
                    if let Some(value) = call.service_data.get(*key) {
                        attributes.insert(key.to_string(), value.clone());
                    }
                }
                STATE_ON.to_string()
            });
            Ok(None)
        }
    });

    let s = states.clone();
    services.register(domain, "turn_off", move |call: ServiceCall| {
        let states = s.clone();
        async move {
            update_targets(&states, &call, |_, _| STATE_OFF.to_string());
            Ok(None)
        }
    });

    let s = states.clone();
    services.register(domain, "toggle", move |call: ServiceCall| {
        let states = s.clone();
        async move {
            update_targets(&states, &call, |current, _| {
                match current.map(|c| c.is_on()) {
                    Some(true) => STATE_OFF.to_string(),
                    _ => STATE_ON.to_string(),
                }
            });
            Ok(None)
        }
    });
}

/// Scenes and scripts keep their state; activation is recorded as an
/// attribute
fn register_activation(services: &ServiceRegistry, states: &Arc<StateStore>, domain: &'static str) {
    let s = states.clone();
    services.register(domain, "turn_on", move |call: ServiceCall| {
        let states = s.clone();
        async move {
            let now = chrono::Utc::now().to_rfc3339();
            update_targets(&states, &call, |current, attributes| {
                attributes.insert("last_triggered".to_string(), json!(now));
                current
                    .map(|c| c.state.clone())
                    .unwrap_or_else(|| STATE_OFF.to_string())
            });
            Ok(None)
        }
    });
}

fn register_media_player(services: &ServiceRegistry, states: &Arc<StateStore>) {
    const DOMAIN: &str = "media_player";

    let s = states.clone();
    services.register(DOMAIN, "volume_set", move |call: ServiceCall| {
        let states = s.clone();
        async move {
            let volume = call.service_data.get("volume_level").cloned();
            update_targets(&states, &call, |current, attributes| {
                if let Some(volume) = &volume {
                    attributes.insert("volume_level".to_string(), volume.clone());
                }
                current
                    .map(|c| c.state.clone())
                    .unwrap_or_else(|| "idle".to_string())
            });
            Ok(None)
        }
    });

    let s = states.clone();
    services.register(DOMAIN, "play_media", move |call: ServiceCall| {
        let states = s.clone();
        async move {
            update_targets(&states, &call, |_, attributes| {
                for key in ["media_content_id", "media_content_type"] {
                    if let Some(value) = call.service_data.get(key) {
                        attributes.insert(key.to_string(), value.clone());
                    }
                }
                "playing".to_string()
            });
            Ok(None)
        }
    });

    let s = states.clone();
    services.register(DOMAIN, "media_stop", move |call: ServiceCall| {
        let states = s.clone();
        async move {
            update_targets(&states, &call, |_, attributes| {
                attributes.remove("media_content_id");
                "idle".to_string()
            });
            Ok(None)
        }
    });
}

/// Register every stand-in device service
pub fn register_services(services: &ServiceRegistry, states: Arc<StateStore>) {
    for &domain in ON_OFF_DOMAINS {
        register_on_off(services, &states, domain);
    }
    register_activation(services, &states, "scene");
    register_activation(services, &states, "script");
    register_media_player(services, &states);

    info!("Device services registered");
}
