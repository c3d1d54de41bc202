//! alarmcontrol host
//!
//! Loads `configuration.yaml` from the config directory, sets up one alarm
//! panel per `alarmcontrol:` entry and runs until Ctrl-C.

use alarm_components::{load_input_booleans, Components, InputBooleanConfig};
use alarm_config::{load_panels, load_yaml};
use alarm_hub::Hub;
use alarm_panel::{AlarmControl, ConfigEntrySource};
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_DIR: &str = "/config";
const CONFIG_ENV: &str = "ALARMCONTROL_CONFIG";
const DASHBOARD_FILE: &str = "www/alarmcontrol_dashboard.yaml";

/// The running host: collaborators plus the alarmcontrol integration
pub struct AlarmHost {
    pub hub: Hub,
    pub components: Components,
    pub control: Arc<AlarmControl>,
}

impl AlarmHost {
    pub async fn start(config_dir: &Path) -> Result<Self> {
        let hub = Hub::new();
        let components = Components::setup(&hub);

        let root = load_yaml(config_dir, "configuration.yaml")
            .with_context(|| format!("loading {}", config_dir.join("configuration.yaml").display()))?;
        if let Some(section) = root.get("input_boolean") {
            let helpers: HashMap<String, Option<InputBooleanConfig>> =
                serde_yaml::from_value(section.clone()).context("parsing input_boolean")?;
            load_input_booleans(&helpers, &hub.states);
        }

        let control = AlarmControl::setup(&hub, &components, config_dir.join(DASHBOARD_FILE));

        let panels = load_panels(config_dir).context("parsing alarmcontrol")?;
        if panels.is_empty() {
            info!("No alarmcontrol panels configured");
        }
        for options in panels {
            let title = options.name.clone();
            if let Err(e) = control.add_entry(title.clone(), options, ConfigEntrySource::Import).await {
                error!(panel = %title, error = %e, "Failed to set up panel");
            }
        }

        Ok(Self {
            hub,
            components,
            control,
        })
    }

    pub async fn stop(&self) {
        self.control.shutdown().await;
    }
}

/// Standalone alarmcontrol host
#[derive(Parser, Debug)]
#[command(name = "alarmcontrol", version, about)]
struct Args {
    /// Directory holding configuration.yaml and secrets.yaml
    #[arg(short, long, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_DIR)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let dir = Args::parse().config;
    info!(config = %dir.display(), "Starting alarmcontrol");

    let host = AlarmHost::start(&dir).await?;
    info!(
        panels = host.control.panels().len(),
        states = host.hub.states.len(),
        "alarmcontrol is running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    host.stop().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(list: &[&str]) -> Result<PathBuf, clap::Error> {
        Args::try_parse_from(std::iter::once("alarmcontrol").chain(list.iter().copied())).map(|a| a.config)
    }

    #[test]
    fn test_config_dir_resolution() {
        assert_eq!(parse(&["--config", "/tmp/a"]).unwrap(), PathBuf::from("/tmp/a"));
        assert_eq!(parse(&["--config=/tmp/b"]).unwrap(), PathBuf::from("/tmp/b"));
        assert_eq!(parse(&["-c", "/tmp/c"]).unwrap(), PathBuf::from("/tmp/c"));

        // Only this test touches the variable
        std::env::remove_var(CONFIG_ENV);
        assert_eq!(parse(&[]).unwrap(), PathBuf::from("/config"));
        std::env::set_var(CONFIG_ENV, "/tmp/env");
        assert_eq!(parse(&[]).unwrap(), PathBuf::from("/tmp/env"));
        assert_eq!(parse(&["-c", "/tmp/flag"]).unwrap(), PathBuf::from("/tmp/flag"));
        std::env::remove_var(CONFIG_ENV);
    }

    #[test]
    fn test_bad_arguments_are_rejected() {
        assert!(parse(&["--config"]).is_err());
        assert!(parse(&["--bogus", "x"]).is_err());
        assert!(parse(&["/tmp/positional"]).is_err());
    }

    #[tokio::test]
    async fn test_start_loads_panels_and_helpers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("configuration.yaml"),
            r#"
input_boolean:
  alarm_armed:
    name: Alarm armed
alarmcontrol:
  - name: House
    instant_sensors: [binary_sensor.front_door]
    armed_helper_entity: input_boolean.alarm_armed
  - name: Shed
    exit_delay: 5
"#,
        )
        .unwrap();

        let host = AlarmHost::start(dir.path()).await.unwrap();
        assert_eq!(host.control.panels().len(), 2);
        assert_eq!(
            host.hub.states.get_state("alarm_control_panel.house").as_deref(),
            Some("disarmed")
        );
        assert!(host.hub.states.get("input_boolean.alarm_armed").is_some());
        assert!(host
            .components
            .issues
            .get(alarm_panel::DOMAIN, "dashboard_missing")
            .is_some());

        host.stop().await;
        assert!(host.hub.states.get("alarm_control_panel.shed").is_none());
    }

    #[tokio::test]
    async fn test_invalid_panel_config_fails_start() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("configuration.yaml"),
            "alarmcontrol:\n  - alarm_duration: 5\n",
        )
        .unwrap();
        assert!(AlarmHost::start(dir.path()).await.is_err());
    }
}
