//! Causality tracking for state writes and service calls

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifies who started an action and what it was caused by
///
/// A panel that reacts to a sensor trip creates a child of the sensor
/// state's context, so every light, siren and notification call made during
/// the alarm can be traced back to the trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// ULID of this context
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: None,
            parent_id: None,
        }
    }

    /// Context for an action started by a user
    pub fn with_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::new()
        }
    }

    /// Derive a context caused by this one
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: self.user_id.clone(),
            parent_id: Some(self.id.clone()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_links_parent() {
        let parent = Context::with_user("owner");
        let child = parent.child();

        assert_ne!(child.id, parent.id);
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(child.user_id.as_deref(), Some("owner"));
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let ctx = Context::new();
        let json = serde_json::to_value(&ctx).unwrap();
        assert!(json.get("user_id").is_none());
        assert!(json.get("parent_id").is_none());
    }
}
