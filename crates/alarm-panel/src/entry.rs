//! Config entries and the integration that owns their panels

use crate::actions::TriggerSource;
use crate::dashboard;
use crate::error::{PanelError, PanelResult};
use crate::flow::FlowResult;
use crate::panel::{panel_object_id, AlarmPanel, PANEL_DOMAIN};
use crate::DOMAIN;
use alarm_components::Components;
use alarm_config::AlarmOptions;
use alarm_core::{Context, EntityId, ServiceCall};
use alarm_hub::{Hub, ServiceError};
use alarm_template::TemplateEngine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    NotLoaded,
    Loaded,
    SetupError,
    FailedUnload,
}

impl ConfigEntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotLoaded => "not_loaded",
            Self::Loaded => "loaded",
            Self::SetupError => "setup_error",
            Self::FailedUnload => "failed_unload",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    User,
    Import,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub domain: String,
    pub title: String,
    pub options: AlarmOptions,
    pub state: ConfigEntryState,
    pub source: ConfigEntrySource,
    pub created_at: DateTime<Utc>,
}

impl ConfigEntry {
    pub fn new(title: impl Into<String>, options: AlarmOptions, source: ConfigEntrySource) -> Self {
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: DOMAIN.to_string(),
            title: title.into(),
            options,
            state: ConfigEntryState::NotLoaded,
            source,
            created_at: Utc::now(),
        }
    }
}

/// The alarmcontrol integration: entries, their panels and the services
/// that route to them
pub struct AlarmControl {
    hub: Hub,
    components: Components,
    templates: Arc<TemplateEngine>,
    entries: DashMap<String, ConfigEntry>,
    /// Loaded panels by entry id
    panels: DashMap<String, Arc<AlarmPanel>>,
    dashboard_path: PathBuf,
    /// Serializes setup, unload and reload
    lifecycle: Mutex<()>,
}

impl AlarmControl {
    /// Create the integration and register its services on the hub
    pub fn setup(hub: &Hub, components: &Components, dashboard_path: impl Into<PathBuf>) -> Arc<Self> {
        let control = Arc::new(Self {
            hub: hub.clone(),
            components: components.clone(),
            templates: Arc::new(TemplateEngine::new(hub.states.clone())),
            entries: DashMap::new(),
            panels: DashMap::new(),
            dashboard_path: dashboard_path.into(),
            lifecycle: Mutex::new(()),
        });

        control.register_panel_services();
        dashboard::register_services(&control);
        info!(dashboard = %control.dashboard_path.display(), "alarmcontrol integration ready");
        control
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    pub fn dashboard_path(&self) -> &Path {
        &self.dashboard_path
    }

    pub fn entry(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|e| e.clone())
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<ConfigEntry> {
        let mut entries: Vec<ConfigEntry> = self.entries.iter().map(|e| e.clone()).collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.entry_id.cmp(&b.entry_id)));
        entries
    }

    pub fn panel(&self, entry_id: &str) -> Option<Arc<AlarmPanel>> {
        self.panels.get(entry_id).map(|p| p.clone())
    }

    pub fn panel_by_entity(&self, entity_id: &str) -> Option<Arc<AlarmPanel>> {
        self.panels
            .iter()
            .find(|p| p.entity_id().to_string() == entity_id)
            .map(|p| p.clone())
    }

    /// Loaded panels sorted by entity id
    pub fn panels(&self) -> Vec<Arc<AlarmPanel>> {
        let mut panels: Vec<Arc<AlarmPanel>> = self.panels.iter().map(|p| p.clone()).collect();
        panels.sort_by(|a, b| a.entity_id().cmp(b.entity_id()));
        panels
    }

    fn set_entry_state(&self, entry_id: &str, state: ConfigEntryState) {
        if let Some(mut entry) = self.entries.get_mut(entry_id) {
            entry.state = state;
        }
    }

    // --- Lifecycle ---

    /// Store a new entry and set it up
    pub async fn add_entry(
        &self,
        title: impl Into<String>,
        options: AlarmOptions,
        source: ConfigEntrySource,
    ) -> PanelResult<String> {
        options.validate()?;
        let entry = ConfigEntry::new(title, options, source);
        let entry_id = entry.entry_id.clone();
        info!(%entry_id, title = %entry.title, source = ?source, "Adding config entry");
        self.entries.insert(entry_id.clone(), entry);

        self.setup_entry(&entry_id).await?;
        Ok(entry_id)
    }

    /// Finish a config flow; entries are only created from `CreateEntry`
    pub async fn finish_config_flow(&self, result: FlowResult) -> PanelResult<Option<String>> {
        match result {
            FlowResult::CreateEntry { title, options } => self
                .add_entry(title, options, ConfigEntrySource::User)
                .await
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Apply the options produced by an options flow
    pub async fn finish_options_flow(&self, entry_id: &str, result: FlowResult) -> PanelResult<bool> {
        match result {
            FlowResult::CreateEntry { options, .. } => {
                self.update_options(entry_id, options).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn setup_entry(&self, entry_id: &str) -> PanelResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.setup_locked(entry_id).await
    }

    #[instrument(skip(self))]
    async fn setup_locked(&self, entry_id: &str) -> PanelResult<()> {
        let entry = self
            .entry(entry_id)
            .ok_or_else(|| PanelError::EntryNotFound(entry_id.to_string()))?;
        if entry.state == ConfigEntryState::Loaded {
            return Err(PanelError::EntryState {
                entry_id: entry_id.to_string(),
                state: entry.state.as_str().to_string(),
                expected: "not_loaded",
            });
        }

        let panel = self.allocate_entity_id(&entry.options.name).and_then(|entity_id| {
            AlarmPanel::new(
                entry_id,
                entity_id,
                entry.options.clone(),
                self.hub.clone(),
                self.templates.clone(),
            )
        });
        let panel = match panel {
            Ok(panel) => panel,
            Err(e) => {
                error!(%entry_id, error = %e, "Config entry setup failed");
                self.set_entry_state(entry_id, ConfigEntryState::SetupError);
                return Err(e);
            }
        };

        panel.bind().await;
        info!(%entry_id, entity_id = %panel.entity_id(), "Alarm panel loaded");
        self.panels.insert(entry_id.to_string(), panel);
        self.set_entry_state(entry_id, ConfigEntryState::Loaded);

        dashboard::check_dashboard(self);
        Ok(())
    }

    pub async fn unload_entry(&self, entry_id: &str) -> PanelResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.unload_locked(entry_id).await
    }

    #[instrument(skip(self))]
    async fn unload_locked(&self, entry_id: &str) -> PanelResult<()> {
        let entry = self
            .entry(entry_id)
            .ok_or_else(|| PanelError::EntryNotFound(entry_id.to_string()))?;
        let Some((_, panel)) = self.panels.remove(entry_id) else {
            return Err(PanelError::EntryState {
                entry_id: entry_id.to_string(),
                state: entry.state.as_str().to_string(),
                expected: "loaded",
            });
        };

        panel.unbind().await;
        self.hub.states.remove(panel.entity_id(), Context::new());
        self.set_entry_state(entry_id, ConfigEntryState::NotLoaded);
        info!(%entry_id, entity_id = %panel.entity_id(), "Alarm panel unloaded");
        Ok(())
    }

    /// Unload if loaded, then set up again with the stored options
    pub async fn reload_entry(&self, entry_id: &str) -> PanelResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.panels.contains_key(entry_id) {
            self.unload_locked(entry_id).await?;
        }
        self.setup_locked(entry_id).await
    }

    /// Replace an entry's options; a loaded entry is reloaded
    pub async fn update_options(&self, entry_id: &str, options: AlarmOptions) -> PanelResult<()> {
        options.validate()?;
        let reload = {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| PanelError::EntryNotFound(entry_id.to_string()))?;
            entry.options = options;
            entry.state == ConfigEntryState::Loaded
        };

        debug!(%entry_id, reload, "Options updated");
        if reload {
            self.reload_entry(entry_id).await?;
        }
        Ok(())
    }

    pub async fn remove_entry(&self, entry_id: &str) -> PanelResult<ConfigEntry> {
        let _guard = self.lifecycle.lock().await;
        if self.panels.contains_key(entry_id) {
            self.unload_locked(entry_id).await?;
        }
        let (_, entry) = self
            .entries
            .remove(entry_id)
            .ok_or_else(|| PanelError::EntryNotFound(entry_id.to_string()))?;
        self.components
            .notifications
            .dismiss(&format!("{}_{}", DOMAIN, entry_id));
        info!(%entry_id, "Config entry removed");
        Ok(entry)
    }

    /// Unload every loaded entry
    pub async fn shutdown(&self) {
        let loaded: Vec<String> = self.panels.iter().map(|p| p.key().clone()).collect();
        for entry_id in loaded {
            if let Err(e) = self.unload_entry(&entry_id).await {
                warn!(%entry_id, error = %e, "Unload failed");
                self.set_entry_state(&entry_id, ConfigEntryState::FailedUnload);
            }
        }
    }

    /// `alarm_control_panel.<slug>`, suffixed `_2`, `_3`... when taken
    fn allocate_entity_id(&self, name: &str) -> PanelResult<EntityId> {
        let base = panel_object_id(name);
        let taken = |candidate: &EntityId| {
            self.hub.states.get(&candidate.to_string()).is_some()
                || self.panels.iter().any(|p| p.entity_id() == candidate)
        };

        let mut candidate = EntityId::new(PANEL_DOMAIN, base.as_str())
            .map_err(|e| alarm_config::ConfigError::invalid("name", e.to_string()))?;
        let mut n = 2;
        while taken(&candidate) {
            candidate = EntityId::new(PANEL_DOMAIN, format!("{}_{}", base, n))
                .map_err(|e| alarm_config::ConfigError::invalid("name", e.to_string()))?;
            n += 1;
        }
        Ok(candidate)
    }

    // --- Services ---

    /// Panels targeted by a service call; a call without targets hits none
    fn targets(&self, call: &ServiceCall) -> Result<Vec<Arc<AlarmPanel>>, ServiceError> {
        let ids = call.entity_ids();
        let panels: Vec<Arc<AlarmPanel>> = ids.iter().filter_map(|id| self.panel_by_entity(id)).collect();
        if panels.is_empty() {
            return Err(ServiceError::InvalidData(format!(
                "no alarmcontrol panel matches {:?}",
                ids
            )));
        }
        Ok(panels)
    }

    fn register_panel_service<F, Fut>(self: &Arc<Self>, service: &'static str, action: F)
    where
        F: Fn(Arc<AlarmPanel>, ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        let action = Arc::new(action);
        self.hub.services.register(PANEL_DOMAIN, service, move |call: ServiceCall| {
            let weak = weak.clone();
            let action = action.clone();
            async move {
                let control = weak
                    .upgrade()
                    .ok_or_else(|| ServiceError::CallFailed("alarmcontrol is not loaded".into()))?;
                for panel in control.targets(&call)? {
                    action(panel, call.clone()).await?;
                }
                Ok(None)
            }
        });
    }

    fn register_panel_services(self: &Arc<Self>) {
        fn code(call: &ServiceCall) -> Option<String> {
            call.get::<String>("code")
        }
        fn failed(e: PanelError) -> ServiceError {
            ServiceError::CallFailed(e.to_string())
        }

        self.register_panel_service("alarm_disarm", |panel, call| async move {
            panel.disarm(code(&call).as_deref()).await;
            Ok(())
        });
        self.register_panel_service("alarm_arm_away", |panel, call| async move {
            panel.arm_away(code(&call).as_deref()).await.map_err(failed)
        });
        self.register_panel_service("alarm_arm_night", |panel, call| async move {
            panel.arm_night(code(&call).as_deref()).await.map_err(failed)
        });
        self.register_panel_service("alarm_trigger", |panel, call| async move {
            let source = TriggerSource {
                entity_id: Some(panel.entity_id().to_string()),
                name: Some(panel.name().to_string()),
                context: call.context.child(),
            };
            if !panel.trigger(source).await {
                debug!(panel = %panel.entity_id(), "Manual trigger suppressed");
            }
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn control(dir: &TempDir) -> Arc<AlarmControl> {
        let hub = Hub::new();
        let components = Components::setup(&hub);
        AlarmControl::setup(&hub, &components, dir.path().join("dashboard.yaml"))
    }

    fn named(name: &str) -> AlarmOptions {
        AlarmOptions {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_entity_ids_are_unique() {
        let dir = TempDir::new().unwrap();
        let control = control(&dir);
        let a = control.add_entry("House", named("House"), ConfigEntrySource::User).await.unwrap();
        let b = control.add_entry("House", named("House"), ConfigEntrySource::User).await.unwrap();

        assert_eq!(control.panel(&a).unwrap().entity_id().to_string(), "alarm_control_panel.house");
        assert_eq!(control.panel(&b).unwrap().entity_id().to_string(), "alarm_control_panel.house_2");
        assert_eq!(control.panels().len(), 2);
    }

    #[tokio::test]
    async fn test_unload_and_reload() {
        let dir = TempDir::new().unwrap();
        let control = control(&dir);
        let id = control.add_entry("House", named("House"), ConfigEntrySource::Import).await.unwrap();
        assert_eq!(control.entry(&id).unwrap().state, ConfigEntryState::Loaded);

        control.unload_entry(&id).await.unwrap();
        assert_eq!(control.entry(&id).unwrap().state, ConfigEntryState::NotLoaded);
        assert!(control.hub().states.get("alarm_control_panel.house").is_none());
        assert!(matches!(
            control.unload_entry(&id).await,
            Err(PanelError::EntryState { expected: "loaded", .. })
        ));

        control.reload_entry(&id).await.unwrap();
        assert_eq!(control.panel(&id).unwrap().entity_id().to_string(), "alarm_control_panel.house");
        assert!(matches!(
            control.setup_entry(&id).await,
            Err(PanelError::EntryState { expected: "not_loaded", .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let dir = TempDir::new().unwrap();
        let control = control(&dir);
        let bad = AlarmOptions {
            exit_delay: 601,
            ..Default::default()
        };
        assert!(matches!(
            control.add_entry("x", bad.clone(), ConfigEntrySource::User).await,
            Err(PanelError::Config(_))
        ));
        assert!(control.entries().is_empty());

        let id = control.add_entry("x", AlarmOptions::default(), ConfigEntrySource::User).await.unwrap();
        assert!(control.update_options(&id, bad).await.is_err());
        assert_eq!(control.entry(&id).unwrap().options.exit_delay, 30);
        assert!(matches!(
            control.update_options("nope", AlarmOptions::default()).await,
            Err(PanelError::EntryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_service_without_matching_panel() {
        let dir = TempDir::new().unwrap();
        let control = control(&dir);
        let result = control
            .hub()
            .services
            .call(
                PANEL_DOMAIN,
                "alarm_disarm",
                serde_json::json!({"entity_id": "alarm_control_panel.ghost"}),
                Context::new(),
                true,
            )
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_remove_entry() {
        let dir = TempDir::new().unwrap();
        let control = control(&dir);
        let id = control.add_entry("House", named("House"), ConfigEntrySource::User).await.unwrap();
        let removed = control.remove_entry(&id).await.unwrap();
        assert_eq!(removed.title, "House");
        assert!(control.entry(&id).is_none());
        assert!(control.panels().is_empty());
    }
}
