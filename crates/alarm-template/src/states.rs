//! Entity state access from templates

use alarm_core::State;
use alarm_hub::StateStore;
use minijinja::value::{Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The `states` global
///
/// - `states('person.anna')` returns the state string, or `unknown`
/// - `states['person.anna']` returns the full state object
#[derive(Clone)]
pub struct StatesObject {
    store: Arc<StateStore>,
}

impl std::fmt::Debug for StatesObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatesObject").finish_non_exhaustive()
    }
}

impl StatesObject {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    pub fn is_state(&self, entity_id: &str, state: &Value) -> bool {
        let Some(current) = self.store.get_state(entity_id) else {
            return false;
        };
        // Strings iterate in minijinja, so check them before lists
        if let Some(s) = state.as_str() {
            return current == s;
        }
        match state.try_iter() {
            Ok(mut iter) => iter.any(|v| v.as_str() == Some(current.as_str())),
            Err(_) => false,
        }
    }

    pub fn state_attr(&self, entity_id: &str, attribute: &str) -> Value {
        self.store
            .get(entity_id)
            .and_then(|s| s.attributes.get(attribute).cloned())
            .map(json_to_value)
            .unwrap_or(Value::from(()))
    }

    /// Known and available
    pub fn has_value(&self, entity_id: &str) -> bool {
        self.store
            .get(entity_id)
            .map(|s| !s.is_unavailable() && !s.is_unknown())
            .unwrap_or(false)
    }
}

impl Object for StatesObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let entity_id = key.as_str()?;
        self.store
            .get(entity_id)
            .map(|state| Value::from_object(StateWrapper(state)))
    }

    fn call(self: &Arc<Self>, _state: &minijinja::State, args: &[Value]) -> Result<Value, Error> {
        let entity_id = args.first().and_then(|v| v.as_str()).ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "states() requires an entity_id")
        })?;

        Ok(Value::from(
            self.store
                .get_state(entity_id)
                .unwrap_or_else(|| "unknown".to_string()),
        ))
    }
}

/// A state as seen by templates; renders as the bare state string
#[derive(Debug, Clone)]
pub struct StateWrapper(pub State);

impl Object for StateWrapper {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "state" => Some(Value::from(self.0.state.as_str())),
            "entity_id" => Some(Value::from(self.0.entity_id.to_string())),
            "domain" => Some(Value::from(self.0.entity_id.domain())),
            "object_id" => Some(Value::from(self.0.entity_id.object_id())),
            "name" => Some(Value::from(self.0.name())),
            "last_changed" => Some(Value::from(self.0.last_changed.to_rfc3339())),
            "last_updated" => Some(Value::from(self.0.last_updated.to_rfc3339())),
            "attributes" => Some(json_to_value(serde_json::Value::Object(
                self.0.attributes.clone().into_iter().collect(),
            ))),
            _ => None,
        }
    }

    fn render(self: &Arc<Self>, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.state)
    }
}

pub(crate) fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::from(()),
        serde_json::Value::Bool(b) => Value::from(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::from(i),
            None => Value::from(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(items) => {
            Value::from(items.into_iter().map(json_to_value).collect::<Vec<_>>())
        }
        serde_json::Value::Object(obj) => Value::from_object(
            obj.into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect::<BTreeMap<String, Value>>(),
        ),
    }
}
