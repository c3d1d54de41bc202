//! Persistent notifications
//!
//! In-memory notifications that stay until dismissed. Also provides the
//! `notify.persistent_notification` service so the default legacy notify
//! target works on a standalone host.

use alarm_core::ServiceCall;
use alarm_hub::{ServiceError, ServiceRegistry};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub const DOMAIN: &str = "persistent_notification";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Added,
    Updated,
}

/// Notifications keyed by id; creating an existing id replaces it
#[derive(Debug, Default)]
pub struct PersistentNotificationManager {
    notifications: DashMap<String, Notification>,
}

impl PersistentNotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a notification; a missing id gets a fresh ULID
    pub fn create(
        &self,
        notification_id: Option<String>,
        message: String,
        title: Option<String>,
    ) -> (Notification, UpdateType) {
        let notification_id =
            notification_id.unwrap_or_else(|| ulid::Ulid::new().to_string().to_lowercase());
        let notification = Notification {
            notification_id: notification_id.clone(),
            message,
            title,
            created_at: Utc::now(),
        };

        let update_type = match self
            .notifications
            .insert(notification_id.clone(), notification.clone())
        {
            Some(_) => {
                debug!(%notification_id, "Updated notification");
                UpdateType::Updated
            }
            None => {
                info!(%notification_id, "Created notification");
                UpdateType::Added
            }
        };

        (notification, update_type)
    }

    pub fn dismiss(&self, notification_id: &str) -> Option<Notification> {
        let removed = self.notifications.remove(notification_id).map(|(_, n)| n);
        if removed.is_some() {
            info!(notification_id, "Dismissed notification");
        }
        removed
    }

    pub fn dismiss_all(&self) -> usize {
        let count = self.notifications.len();
        self.notifications.clear();
        count
    }

    pub fn get(&self, notification_id: &str) -> Option<Notification> {
        self.notifications.get(notification_id).map(|n| n.clone())
    }

    /// All notifications, oldest first
    pub fn get_all(&self) -> Vec<Notification> {
        let mut all: Vec<Notification> = self.notifications.iter().map(|n| n.clone()).collect();
        all.sort_by_key(|n| n.created_at);
        all
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

fn required_message(call: &ServiceCall) -> Result<String, ServiceError> {
    call.get::<String>("message")
        .ok_or_else(|| ServiceError::InvalidData("message is required".to_string()))
}

/// `persistent_notification.create|dismiss|dismiss_all` and
/// `notify.persistent_notification`
pub fn register_services(services: &ServiceRegistry, manager: Arc<PersistentNotificationManager>) {
    let m = manager.clone();
    services.register(DOMAIN, "create", move |call: ServiceCall| {
        let manager = m.clone();
        async move {
            let message = required_message(&call)?;
            let (notification, _) =
                manager.create(call.get("notification_id"), message, call.get("title"));
            Ok(Some(serde_json::json!({
                "notification_id": notification.notification_id
            })))
        }
    });

    let m = manager.clone();
    services.register(DOMAIN, "dismiss", move |call: ServiceCall| {
        let manager = m.clone();
        async move {
            let id: String = call.get("notification_id").ok_or_else(|| {
                ServiceError::InvalidData("notification_id is required".to_string())
            })?;
            manager.dismiss(&id);
            Ok(None)
        }
    });

    let m = manager.clone();
    services.register(DOMAIN, "dismiss_all", move |_: ServiceCall| {
        let manager = m.clone();
        async move {
            manager.dismiss_all();
            Ok(None)
        }
    });

    services.register("notify", DOMAIN, move |call: ServiceCall| {
        let manager = manager.clone();
        async move {
            let message = required_message(&call)?;
            manager.create(None, message, call.get("title"));
            Ok(None)
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarm_core::Context;
    use serde_json::json;

    #[test]
    fn test_create_is_idempotent_per_id() {
        let manager = PersistentNotificationManager::new();
        let (_, first) = manager.create(Some("alarm".into()), "one".into(), None);
        let (n, second) = manager.create(Some("alarm".into()), "two".into(), Some("ALARM".into()));

        assert_eq!(first, UpdateType::Added);
        assert_eq!(second, UpdateType::Updated);
        assert_eq!(n.message, "two");
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_generated_ids_and_dismiss() {
        let manager = PersistentNotificationManager::new();
        let (a, _) = manager.create(None, "a".into(), None);
        let (b, _) = manager.create(None, "b".into(), None);
        assert_ne!(a.notification_id, b.notification_id);

        assert!(manager.dismiss(&a.notification_id).is_some());
        assert!(manager.dismiss(&a.notification_id).is_none());
        assert_eq!(manager.dismiss_all(), 1);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_services() {
        let services = ServiceRegistry::new();
        let manager = Arc::new(PersistentNotificationManager::new());
        register_services(&services, manager.clone());

        services
            .call(
                DOMAIN,
                "create",
                json!({"title": "ALARM", "message": "Front door", "notification_id": "alarmcontrol_1"}),
                Context::new(),
                true,
            )
            .await
            .unwrap();
        assert_eq!(manager.get("alarmcontrol_1").unwrap().title.as_deref(), Some("ALARM"));

        services
            .call("notify", DOMAIN, json!({"message": "legacy"}), Context::new(), true)
            .await
            .unwrap();
        assert_eq!(manager.len(), 2);

        let missing = services
            .call(DOMAIN, "create", json!({"title": "x"}), Context::new(), true)
            .await;
        assert!(matches!(missing, Err(ServiceError::InvalidData(_))));
    }
}
