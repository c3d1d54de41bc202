//! Service calls dispatched through the host

use crate::{Context, ATTR_ENTITY_ID};
use serde::{Deserialize, Serialize};

/// A request to run `domain.service` with some data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub service_data: serde_json::Value,
    pub context: Context,
}

impl ServiceCall {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        service_data: serde_json::Value,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data,
            context,
        }
    }

    /// `domain.service`
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Read and deserialize a field of the service data
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.service_data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Entity ids addressed by the call
    ///
    /// `entity_id` may be a single string, a list of strings or a
    /// comma-separated string.
    pub fn entity_ids(&self) -> Vec<String> {
        match self.service_data.get(ATTR_ENTITY_ID) {
            Some(serde_json::Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Some(serde_json::Value::Array(arr)) => arr
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_id() {
        let call = ServiceCall::new("notify", "send_message", json!({}), Context::new());
        assert_eq!(call.service_id(), "notify.send_message");
    }

    #[test]
    fn test_get_field() {
        let call = ServiceCall::new(
            "light",
            "turn_on",
            json!({"brightness": 255, "entity_id": ["light.hall"]}),
            Context::new(),
        );
        assert_eq!(call.get::<u8>("brightness"), Some(255));
        assert_eq!(call.get::<String>("missing"), None);
    }

    #[test]
    fn test_entity_ids_forms() {
        let single = ServiceCall::new(
            "siren",
            "turn_on",
            json!({"entity_id": "siren.hall"}),
            Context::new(),
        );
        assert_eq!(single.entity_ids(), vec!["siren.hall"]);

        let list = ServiceCall::new(
            "siren",
            "turn_on",
            json!({"entity_id": ["siren.hall", "siren.garden"]}),
            Context::new(),
        );
        assert_eq!(list.entity_ids(), vec!["siren.hall", "siren.garden"]);

        let csv = ServiceCall::new(
            "siren",
            "turn_on",
            json!({"entity_id": "siren.hall, siren.garden"}),
            Context::new(),
        );
        assert_eq!(csv.entity_ids(), vec!["siren.hall", "siren.garden"]);

        let none = ServiceCall::new("siren", "turn_on", json!({}), Context::new());
        assert!(none.entity_ids().is_empty());
    }
}
