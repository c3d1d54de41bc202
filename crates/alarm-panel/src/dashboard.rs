//! Lovelace dashboard generation and its repair issue

use crate::entry::AlarmControl;
use crate::error::{PanelError, PanelResult};
use crate::flow::FlowResult;
use crate::panel::AlarmPanel;
use crate::DOMAIN;
use alarm_components::{Issue, IssueSeverity};
use alarm_core::{Context, ServiceCall};
use alarm_hub::ServiceError;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_DASHBOARD_PATH: &str = "/config/www/alarmcontrol_dashboard.yaml";
pub const SERVICE_GENERATE_DASHBOARD: &str = "generate_dashboard";
pub const ISSUE_DASHBOARD_MISSING: &str = "dashboard_missing";

fn panel_cards(panel: &AlarmPanel) -> Vec<Value> {
    let o = panel.options();
    let entity_id = panel.entity_id().to_string();
    let mut cards = vec![json!({
        "type": "alarm-panel",
        "entity": entity_id,
        "name": o.name,
        "states": ["arm_away", "arm_night"],
    })];

    let sensors: Vec<String> = o
        .instant_sensors
        .iter()
        .chain(&o.delayed_sensors)
        .map(|e| e.to_string())
        .collect();
    if !sensors.is_empty() {
        cards.push(json!({"type": "entities", "title": "Sensors", "entities": sensors}));
    }

    if !o.persons.is_empty() {
        let persons: Vec<String> = o.persons.iter().map(|e| e.to_string()).collect();
        cards.push(json!({"type": "entities", "title": "Persons", "entities": persons}));
    }

    if let Some(camera) = o.camera_entities.first() {
        cards.push(json!({"type": "picture-entity", "entity": camera.to_string()}));
    }

    cards.push(json!({
        "type": "markdown",
        "content": format!(
            "Last trigger: {{{{ state_attr('{id}', 'last_trigger_entity') or '-' }}}}\n\n\
             Snapshot: {{{{ state_attr('{id}', 'last_snapshot_url') or '-' }}}}",
            id = entity_id
        ),
    }));
    cards
}

/// Dashboard YAML with one view per panel
pub fn build_dashboard(panels: &[Arc<AlarmPanel>]) -> PanelResult<String> {
    let views: Vec<Value> = panels
        .iter()
        .map(|panel| {
            json!({
                "title": panel.name(),
                "path": panel.entity_id().object_id(),
                "icon": "mdi:shield-home",
                "cards": panel_cards(panel),
            })
        })
        .collect();

    Ok(serde_yaml::to_string(&json!({
        "title": "Alarm Control",
        "views": views,
    }))?)
}

/// Write the dashboard for every loaded panel to `path`
pub async fn generate_dashboard(control: &AlarmControl, path: &Path) -> PanelResult<PathBuf> {
    let yaml = build_dashboard(&control.panels())?;
    let io = |source| PanelError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io)?;
    }
    tokio::fs::write(path, yaml).await.map_err(io)?;

    info!(path = %path.display(), panels = control.panels().len(), "Dashboard written");
    if path == control.dashboard_path() {
        check_dashboard(control);
    }
    Ok(path.to_path_buf())
}

/// Raise `dashboard_missing` when the dashboard file is absent, clear it
/// otherwise
pub fn check_dashboard(control: &AlarmControl) {
    let path = control.dashboard_path();
    let issues = &control.components().issues;

    if path.exists() {
        issues.delete(DOMAIN, ISSUE_DASHBOARD_MISSING);
        return;
    }

    debug!(path = %path.display(), "Dashboard missing");
    issues.create(
        Issue::new(DOMAIN, ISSUE_DASHBOARD_MISSING, IssueSeverity::Warning, ISSUE_DASHBOARD_MISSING)
            .fixable()
            .with_placeholder("filename", path.display().to_string()),
    );
}

pub(crate) fn register_services(control: &Arc<AlarmControl>) {
    let weak = Arc::downgrade(control);
    control
        .hub()
        .services
        .register(DOMAIN, SERVICE_GENERATE_DASHBOARD, move |call: ServiceCall| {
            let weak = weak.clone();
            async move {
                let control = weak
                    .upgrade()
                    .ok_or_else(|| ServiceError::CallFailed("alarmcontrol is not loaded".into()))?;
                let path = call
                    .get::<String>("filename")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| control.dashboard_path().to_path_buf());

                let written = generate_dashboard(&control, &path)
                    .await
                    .map_err(|e| ServiceError::CallFailed(e.to_string()))?;
                Ok(Some(json!({"filename": written.display().to_string()})))
            }
        });
}

/// Repair flow for `dashboard_missing`: confirm, then generate
pub struct DashboardRepairFlow {
    control: Arc<AlarmControl>,
}

impl DashboardRepairFlow {
    pub async fn step_init(&self, _user_input: Option<Value>) -> PanelResult<FlowResult> {
        self.step_confirm(None).await
    }

    pub async fn step_confirm(&self, user_input: Option<Value>) -> PanelResult<FlowResult> {
        if user_input.is_none() {
            return Ok(FlowResult::form("confirm", Vec::new()));
        }

        let filename = self.control.dashboard_path().display().to_string();
        self.control
            .hub()
            .services
            .call(
                DOMAIN,
                SERVICE_GENERATE_DASHBOARD,
                json!({"filename": filename}),
                Context::new(),
                true,
            )
            .await?;
        self.control
            .components()
            .issues
            .delete(DOMAIN, ISSUE_DASHBOARD_MISSING);
        Ok(FlowResult::Done)
    }
}

/// Fix flow for a raised issue
pub fn create_fix_flow(control: &Arc<AlarmControl>, issue_id: &str) -> PanelResult<DashboardRepairFlow> {
    match issue_id {
        ISSUE_DASHBOARD_MISSING => Ok(DashboardRepairFlow {
            control: control.clone(),
        }),
        _ => Err(PanelError::Aborted("unknown_issue".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ConfigEntrySource;
    use alarm_components::Components;
    use alarm_config::AlarmOptions;
    use alarm_hub::Hub;
    use tempfile::TempDir;

    async fn loaded(dir: &TempDir) -> Arc<AlarmControl> {
        let hub = Hub::new();
        let components = Components::setup(&hub);
        let control = AlarmControl::setup(&hub, &components, dir.path().join("www/dashboard.yaml"));
        control
            .add_entry(
                "House",
                AlarmOptions {
                    name: "House".to_string(),
                    instant_sensors: vec!["binary_sensor.front_door".parse().unwrap()],
                    persons: vec!["person.anna".parse().unwrap()],
                    camera_entities: vec!["camera.porch".parse().unwrap()],
                    ..Default::default()
                },
                ConfigEntrySource::User,
            )
            .await
            .unwrap();
        control
    }

    #[tokio::test]
    async fn test_build_dashboard() {
        let dir = TempDir::new().unwrap();
        let control = loaded(&dir).await;
        let yaml = build_dashboard(&control.panels()).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        let cards = &doc["views"][0]["cards"];
        assert_eq!(doc["views"][0]["path"].as_str(), Some("house"));
        assert_eq!(cards[0]["type"].as_str(), Some("alarm-panel"));
        assert_eq!(cards[0]["entity"].as_str(), Some("alarm_control_panel.house"));
        assert_eq!(cards[1]["entities"][0].as_str(), Some("binary_sensor.front_door"));
        assert_eq!(cards[3]["entity"].as_str(), Some("camera.porch"));
        assert!(cards[4]["content"]
            .as_str()
            .unwrap()
            .contains("state_attr('alarm_control_panel.house', 'last_trigger_entity')"));
    }

    #[tokio::test]
    async fn test_missing_dashboard_raises_issue() {
        let dir = TempDir::new().unwrap();
        let control = loaded(&dir).await;
        let issue = control
            .components()
            .issues
            .get(DOMAIN, ISSUE_DASHBOARD_MISSING)
            .unwrap();
        assert!(issue.is_fixable);
        assert_eq!(issue.severity, IssueSeverity::Warning);
    }

    #[tokio::test]
    async fn test_service_writes_custom_filename() {
        let dir = TempDir::new().unwrap();
        let control = loaded(&dir).await;
        let custom = dir.path().join("other/dash.yaml");

        let result = control
            .hub()
            .services
            .call(
                DOMAIN,
                SERVICE_GENERATE_DASHBOARD,
                json!({"filename": custom.display().to_string()}),
                Context::new(),
                true,
            )
            .await
            .unwrap();
        assert_eq!(result, Some(json!({"filename": custom.display().to_string()})));
        assert!(custom.exists());
        // Not the configured file, the issue stays
        assert!(control.components().issues.get(DOMAIN, ISSUE_DASHBOARD_MISSING).is_some());
    }

    #[tokio::test]
    async fn test_repair_flow() {
        let dir = TempDir::new().unwrap();
        let control = loaded(&dir).await;

        assert!(matches!(
            create_fix_flow(&control, "something_else"),
            Err(PanelError::Aborted(ref reason)) if reason == "unknown_issue"
        ));

        let flow = create_fix_flow(&control, ISSUE_DASHBOARD_MISSING).unwrap();
        let form = flow.step_init(None).await.unwrap();
        assert_eq!(form.step_id(), Some("confirm"));

        assert_eq!(flow.step_confirm(Some(json!({}))).await.unwrap(), FlowResult::Done);
        assert!(control.dashboard_path().exists());
        assert!(control.components().issues.get(DOMAIN, ISSUE_DASHBOARD_MISSING).is_none());
    }
}
