//! Per-panel options
//!
//! One [`AlarmOptions`] per entry of the `alarmcontrol:` list in
//! `configuration.yaml`. Every key is optional; missing keys take the
//! defaults below. Older key names (`use_time_window`, `cameras`,
//! `notify_services`) are accepted as aliases.

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;
use alarm_core::EntityId;
use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_NAME: &str = "Alarm Control";
pub const DEFAULT_NOTIFY_TITLE: &str = "ALARM";
pub const DEFAULT_NOTIFY_MESSAGE: &str =
    "{{ now().strftime('%Y-%m-%d %H:%M:%S') }} - Alarm from {{ source_entity if source_entity else 'unknown' }}";
pub const DEFAULT_SNAPSHOT_PATH: &str = "/config/www/snapshots";
pub const DEFAULT_NOTIFY_SERVICES: &str = "notify.persistent_notification";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmOptions {
    pub name: String,

    pub instant_sensors: Vec<EntityId>,
    pub delayed_sensors: Vec<EntityId>,
    pub persons: Vec<EntityId>,
    pub safe_zones: Vec<EntityId>,
    pub auto_arm_all_away: bool,
    pub auto_disarm_on_any_home: bool,

    #[serde(alias = "use_time_window")]
    pub arm_schedule_enable: bool,
    pub arm_time_start: String,
    pub arm_time_end: String,

    #[serde(deserialize_with = "whole_number")]
    pub exit_delay: u64,
    #[serde(deserialize_with = "whole_number")]
    pub entry_delay: u64,
    #[serde(deserialize_with = "whole_number")]
    pub alarm_duration: u64,
    #[serde(deserialize_with = "whole_number")]
    pub retrigger_cooldown: u64,
    pub rearm_after_trigger: bool,

    #[serde(alias = "cameras")]
    pub camera_entities: Vec<EntityId>,
    pub send_snapshot: bool,
    pub snapshot_path: String,

    pub notify_targets: Vec<EntityId>,
    #[serde(alias = "notify_services", deserialize_with = "csv_or_list")]
    pub notify_services_csv: String,
    pub notify_title: String,
    pub notify_message: String,
    pub persistent_enable: bool,

    pub lights: Vec<EntityId>,
    #[serde(deserialize_with = "whole_number")]
    pub light_brightness: u64,
    pub sirens: Vec<EntityId>,
    pub switches: Vec<EntityId>,
    pub scenes: Vec<EntityId>,
    pub scripts: Vec<EntityId>,

    pub media_players: Vec<EntityId>,
    pub media_alarm_url: Option<String>,
    pub media_volume: Option<f64>,

    pub tts_entities: Vec<EntityId>,
    pub tts_language: Option<String>,
    pub tts_message: Option<String>,

    pub armed_helper_entity: Option<EntityId>,
    pub manual_arm_switch_entity: Option<EntityId>,
}

impl Default for AlarmOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            instant_sensors: Vec::new(),
            delayed_sensors: Vec::new(),
            persons: Vec::new(),
            safe_zones: Vec::new(),
            auto_arm_all_away: true,
            auto_disarm_on_any_home: true,
            arm_schedule_enable: false,
            arm_time_start: "22:00:00".to_string(),
            arm_time_end: "06:00:00".to_string(),
            exit_delay: 30,
            entry_delay: 15,
            alarm_duration: 300,
            retrigger_cooldown: 60,
            rearm_after_trigger: false,
            camera_entities: Vec::new(),
            send_snapshot: true,
            snapshot_path: DEFAULT_SNAPSHOT_PATH.to_string(),
            notify_targets: Vec::new(),
            notify_services_csv: DEFAULT_NOTIFY_SERVICES.to_string(),
            notify_title: DEFAULT_NOTIFY_TITLE.to_string(),
            notify_message: DEFAULT_NOTIFY_MESSAGE.to_string(),
            persistent_enable: true,
            lights: Vec::new(),
            light_brightness: 255,
            sirens: Vec::new(),
            switches: Vec::new(),
            scenes: Vec::new(),
            scripts: Vec::new(),
            media_players: Vec::new(),
            media_alarm_url: None,
            media_volume: None,
            tts_entities: Vec::new(),
            tts_language: None,
            tts_message: None,
            armed_helper_entity: None,
            manual_arm_switch_entity: None,
        }
    }
}

/// Non-negative integer; UI number fields may send `30.0`
fn whole_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(u64),
        Float(f64),
    }

    match Number::deserialize(deserializer)? {
        Number::Int(n) => Ok(n),
        Number::Float(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
        Number::Float(f) => Err(serde::de::Error::custom(format!(
            "expected a whole non-negative number, got {}",
            f
        ))),
    }
}

/// `"notify.a, notify.b"` or `[notify.a, notify.b]`
fn csv_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CsvOrList {
        Csv(String),
        List(Vec<String>),
    }

    Ok(match CsvOrList::deserialize(deserializer)? {
        CsvOrList::Csv(s) => s,
        CsvOrList::List(items) => items.join(","),
    })
}

/// Parse `HH:MM:SS` or `HH:MM`
pub fn parse_time(value: &str) -> ConfigResult<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|e| ConfigError::invalid("time", format!("'{}': {}", value, e)))
}

impl AlarmOptions {
    pub fn from_yaml(value: serde_yaml::Value) -> ConfigResult<Self> {
        let options: Self =
            serde_yaml::from_value(value).map_err(|e| ConfigError::InvalidOptions(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json(value: serde_json::Value) -> ConfigResult<Self> {
        let options: Self =
            serde_json::from_value(value).map_err(|e| ConfigError::InvalidOptions(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Range, time format and entity domain checks
    pub fn validate(&self) -> ConfigResult<()> {
        check_range("exit_delay", self.exit_delay, 0, 600)?;
        check_range("entry_delay", self.entry_delay, 0, 600)?;
        check_range("alarm_duration", self.alarm_duration, 10, 3600)?;
        check_range("retrigger_cooldown", self.retrigger_cooldown, 0, 3600)?;
        check_range("light_brightness", self.light_brightness, 1, 255)?;

        if let Some(volume) = self.media_volume {
            if !(0.0..=1.0).contains(&volume) {
                return Err(ConfigError::invalid(
                    "media_volume",
                    format!("{} is outside 0..=1", volume),
                ));
            }
        }

        self.window_start()?;
        self.window_end()?;

        check_domain("instant_sensors", &self.instant_sensors, "binary_sensor")?;
        check_domain("delayed_sensors", &self.delayed_sensors, "binary_sensor")?;
        check_domain("persons", &self.persons, "person")?;
        check_domain("safe_zones", &self.safe_zones, "zone")?;
        check_domain("camera_entities", &self.camera_entities, "camera")?;
        check_domain("notify_targets", &self.notify_targets, "notify")?;
        check_domain("lights", &self.lights, "light")?;
        check_domain("sirens", &self.sirens, "siren")?;
        check_domain("switches", &self.switches, "switch")?;
        check_domain("scenes", &self.scenes, "scene")?;
        check_domain("scripts", &self.scripts, "script")?;
        check_domain("media_players", &self.media_players, "media_player")?;
        check_domain("tts_entities", &self.tts_entities, "tts")?;
        check_domain(
            "armed_helper_entity",
            self.armed_helper_entity.as_slice(),
            "input_boolean",
        )?;
        check_domain(
            "manual_arm_switch_entity",
            self.manual_arm_switch_entity.as_slice(),
            "input_boolean",
        )?;
        if self.armed_helper_entity.is_some()
            && self.armed_helper_entity == self.manual_arm_switch_entity
        {
            return Err(ConfigError::invalid(
                "manual_arm_switch_entity",
                "must differ from armed_helper_entity",
            ));
        }

        Ok(())
    }

    pub fn window_start(&self) -> ConfigResult<NaiveTime> {
        parse_time(&self.arm_time_start)
            .map_err(|_| ConfigError::invalid("arm_time_start", &self.arm_time_start))
    }

    pub fn window_end(&self) -> ConfigResult<NaiveTime> {
        parse_time(&self.arm_time_end)
            .map_err(|_| ConfigError::invalid("arm_time_end", &self.arm_time_end))
    }

    /// `(domain, service)` pairs from the comma separated service list
    pub fn legacy_notify_services(&self) -> Vec<(String, String)> {
        self.notify_services_csv
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .filter_map(|item| match item.split_once('.') {
                Some((domain, service)) if !domain.is_empty() && !service.is_empty() => {
                    Some((domain.to_string(), service.to_string()))
                }
                _ => {
                    warn!(service = item, "Ignoring malformed notify service");
                    None
                }
            })
            .collect()
    }

    pub fn exit_delay(&self) -> Duration {
        Duration::from_secs(self.exit_delay)
    }

    pub fn entry_delay(&self) -> Duration {
        Duration::from_secs(self.entry_delay)
    }

    pub fn alarm_duration(&self) -> Duration {
        Duration::from_secs(self.alarm_duration)
    }

    pub fn retrigger_cooldown(&self) -> Duration {
        Duration::from_secs(self.retrigger_cooldown)
    }
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> ConfigResult<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            key,
            format!("{} is outside {}..={}", value, min, max),
        ))
    }
}

fn check_domain(key: &str, entity_ids: &[EntityId], domain: &str) -> ConfigResult<()> {
    match entity_ids.iter().find(|id| !id.in_domain(domain)) {
        Some(id) => Err(ConfigError::invalid(
            key,
            format!("{} is not a {} entity", id, domain),
        )),
        None => Ok(()),
    }
}

/// Read every panel from the `alarmcontrol:` key of `configuration.yaml`
///
/// The key may hold a list of panels or a single mapping. A missing key
/// means no panels.
pub fn load_panels(config_dir: &Path) -> ConfigResult<Vec<AlarmOptions>> {
    let mut loader = YamlLoader::new(config_dir)?;
    let root = loader.load_file("configuration.yaml")?;

    let panels = match root.get("alarmcontrol") {
        None | Some(serde_yaml::Value::Null) => Vec::new(),
        Some(serde_yaml::Value::Sequence(items)) => items.clone(),
        Some(single) => vec![single.clone()],
    };

    let options = panels
        .into_iter()
        .map(AlarmOptions::from_yaml)
        .collect::<ConfigResult<Vec<_>>>()?;
    debug!(count = options.len(), "Loaded alarm panels");
    Ok(options)
}
