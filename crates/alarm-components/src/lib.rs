//! Built-in host components
//!
//! What a standalone alarmcontrol host provides besides the panel itself:
//! persistent notifications, stand-in device services and the repair issue
//! registry.

pub mod devices;
pub mod issues;
pub mod notifications;

pub use devices::{load_input_booleans, InputBooleanConfig};
pub use issues::{Issue, IssueRegistry, IssueSeverity};
pub use notifications::{Notification, PersistentNotificationManager};

use alarm_hub::Hub;
use std::sync::Arc;
use tracing::info;

/// Shared component state handed to integrations
#[derive(Clone)]
pub struct Components {
    pub notifications: Arc<PersistentNotificationManager>,
    pub issues: Arc<IssueRegistry>,
}

impl Components {
    /// Register every built-in service on `hub`
    pub fn setup(hub: &Hub) -> Self {
        let notifications = Arc::new(PersistentNotificationManager::new());
        notifications::register_services(&hub.services, notifications.clone());
        devices::register_services(&hub.services, hub.states.clone());

        info!(services = hub.services.service_count(), "Built-in components ready");
        Self {
            notifications,
            issues: Arc::new(IssueRegistry::new()),
        }
    }
}
