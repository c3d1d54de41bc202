//! Config and options flows
//!
//! A flow is a short sequence of forms. Each step either returns a
//! [`FlowResult::Form`] describing the fields to show, or, once its input
//! validates, moves on to the next step or finishes with
//! [`FlowResult::CreateEntry`].

use crate::entry::ConfigEntry;
use alarm_config::{AlarmOptions, DEFAULT_NAME};
use alarm_hub::ServiceRegistry;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::debug;

pub const STEP_USER: &str = "user";
pub const STEP_OPTIONS_MAIN: &str = "options_main";
pub const STEP_OPTIONS_ACTIONS: &str = "options_actions";

/// Entity-based notify service, not a legacy `notify.<name>` target
const NOTIFY_SEND_MESSAGE: &str = "send_message";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Entity { domain: String, multiple: bool },
    Number { min: u64, max: u64 },
    Boolean,
    Time,
    Text,
    Select { options: Vec<String>, multiple: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub key: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    pub default: Value,
}

impl FormField {
    fn new(key: &str, kind: FieldKind, defaults: &Map<String, Value>) -> Self {
        Self {
            key: key.to_string(),
            kind,
            default: defaults.get(key).cloned().unwrap_or(Value::Null),
        }
    }

    fn entities(key: &str, domain: &str, defaults: &Map<String, Value>) -> Self {
        Self::new(
            key,
            FieldKind::Entity {
                domain: domain.to_string(),
                multiple: true,
            },
            defaults,
        )
    }

    fn entity(key: &str, domain: &str, defaults: &Map<String, Value>) -> Self {
        Self::new(
            key,
            FieldKind::Entity {
                domain: domain.to_string(),
                multiple: false,
            },
            defaults,
        )
    }

    fn number(key: &str, min: u64, max: u64, defaults: &Map<String, Value>) -> Self {
        Self::new(key, FieldKind::Number { min, max }, defaults)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowResult {
    Form {
        step_id: String,
        fields: Vec<FormField>,
        errors: HashMap<String, String>,
    },
    CreateEntry {
        title: String,
        options: AlarmOptions,
    },
    /// A flow finished without creating anything
    Done,
    Abort {
        reason: String,
    },
}

impl FlowResult {
    pub fn form(step_id: &str, fields: Vec<FormField>) -> Self {
        Self::Form {
            step_id: step_id.to_string(),
            fields,
            errors: HashMap::new(),
        }
    }

    fn with_error(self, key: &str, message: impl Into<String>) -> Self {
        match self {
            Self::Form {
                step_id,
                fields,
                mut errors,
            } => {
                errors.insert(key.to_string(), message.into());
                Self::Form {
                    step_id,
                    fields,
                    errors,
                }
            }
            other => other,
        }
    }

    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::Form { step_id, .. } => Some(step_id),
            _ => None,
        }
    }
}

/// Registered legacy notify services as `notify.<name>`, sorted
pub fn notify_service_choices(services: &ServiceRegistry) -> Vec<String> {
    let mut choices: Vec<String> = services
        .domain_services("notify")
        .into_iter()
        .filter(|s| s.service != NOTIFY_SEND_MESSAGE)
        .map(|s| format!("notify.{}", s.service))
        .collect();
    choices.sort();
    choices
}

/// Keys holding a single optional entity; an empty string clears them
const OPTIONAL_ENTITY_KEYS: &[&str] = &["armed_helper_entity", "manual_arm_switch_entity"];

/// Merge form input over `base`, mapping legacy key names
fn merge_input(base: &Map<String, Value>, input: Value) -> Map<String, Value> {
    let mut merged = base.clone();
    let Value::Object(input) = input else {
        return merged;
    };

    for (key, value) in input {
        let (key, value) = match key.as_str() {
            "use_time_window" => ("arm_schedule_enable".to_string(), value),
            "cameras" => ("camera_entities".to_string(), value),
            "notify_services" => ("notify_services_csv".to_string(), csv(&value)),
            k if OPTIONAL_ENTITY_KEYS.contains(&k) && value.as_str() == Some("") => {
                (key, Value::Null)
            }
            _ => (key, value),
        };
        merged.insert(key, value);
    }
    merged
}

fn csv(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::String(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => other.clone(),
    }
}

fn options_map(options: &AlarmOptions) -> Map<String, Value> {
    match options.to_json() {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Flow that creates a new panel
#[derive(Debug, Default)]
pub struct ConfigFlow;

impl ConfigFlow {
    pub fn new() -> Self {
        Self
    }

    fn user_form(defaults: &Map<String, Value>) -> FlowResult {
        FlowResult::form(
            STEP_USER,
            vec![
                FormField::new("name", FieldKind::Text, defaults),
                FormField::entities("instant_sensors", "binary_sensor", defaults),
                FormField::entities("delayed_sensors", "binary_sensor", defaults),
                FormField::entities("camera_entities", "camera", defaults),
                FormField::entities("persons", "person", defaults),
                FormField::entities("safe_zones", "zone", defaults),
                FormField::new("arm_schedule_enable", FieldKind::Boolean, defaults),
                FormField::new("arm_time_start", FieldKind::Time, defaults),
                FormField::new("arm_time_end", FieldKind::Time, defaults),
                FormField::number("exit_delay", 0, 600, defaults),
                FormField::number("entry_delay", 0, 600, defaults),
                FormField::number("alarm_duration", 10, 3600, defaults),
                FormField::number("retrigger_cooldown", 0, 3600, defaults),
            ],
        )
    }

    pub fn step_user(&self, user_input: Option<Value>) -> FlowResult {
        let defaults = options_map(&AlarmOptions::default());
        let Some(input) = user_input else {
            return Self::user_form(&defaults);
        };

        let mut merged = merge_input(&defaults, input);
        let name = merged
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_NAME)
            .to_string();
        merged.insert("name".to_string(), json!(name));

        match AlarmOptions::from_json(Value::Object(merged.clone())) {
            Ok(options) => {
                debug!(title = %name, "Config flow finished");
                FlowResult::CreateEntry {
                    title: name,
                    options,
                }
            }
            Err(e) => Self::user_form(&merged).with_error("base", e.to_string()),
        }
    }
}

/// Flow that edits an existing panel: devices first, then notifications
#[derive(Debug)]
pub struct OptionsFlow {
    title: String,
    options: Map<String, Value>,
    notify_choices: Vec<String>,
}

impl OptionsFlow {
    pub fn new(entry: &ConfigEntry, services: &ServiceRegistry) -> Self {
        Self {
            title: entry.title.clone(),
            options: options_map(&entry.options),
            notify_choices: notify_service_choices(services),
        }
    }

    pub fn step_init(&mut self, user_input: Option<Value>) -> FlowResult {
        self.step_options_main(user_input)
    }

    fn main_form(&self, defaults: &Map<String, Value>) -> FlowResult {
        FlowResult::form(
            STEP_OPTIONS_MAIN,
            vec![
                FormField::entities("lights", "light", defaults),
                FormField::number("light_brightness", 1, 255, defaults),
                FormField::entities("sirens", "siren", defaults),
                FormField::entities("switches", "switch", defaults),
                FormField::entities("scenes", "scene", defaults),
                FormField::entities("scripts", "script", defaults),
                FormField::entities("media_players", "media_player", defaults),
                FormField::new("media_alarm_url", FieldKind::Text, defaults),
                FormField::new("media_volume", FieldKind::Text, defaults),
                FormField::new("send_snapshot", FieldKind::Boolean, defaults),
                FormField::new("snapshot_path", FieldKind::Text, defaults),
            ],
        )
    }

    fn actions_form(&self, defaults: &Map<String, Value>) -> FlowResult {
        let selected: Vec<String> = defaults
            .get("notify_services_csv")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let mut fields = vec![
            FormField::entities("notify_targets", "notify", defaults),
            FormField {
                key: "notify_services".to_string(),
                kind: FieldKind::Select {
                    options: self.notify_choices.clone(),
                    multiple: true,
                },
                default: json!(selected),
            },
            FormField::new("notify_title", FieldKind::Text, defaults),
            FormField::new("notify_message", FieldKind::Text, defaults),
            FormField::new("persistent_enable", FieldKind::Boolean, defaults),
            FormField::entities("tts_entities", "tts", defaults),
            FormField::new("tts_language", FieldKind::Text, defaults),
            FormField::new("tts_message", FieldKind::Text, defaults),
        ];
        fields.push(FormField::entity("armed_helper_entity", "input_boolean", defaults));
        fields.push(FormField::entity("manual_arm_switch_entity", "input_boolean", defaults));

        FlowResult::form(STEP_OPTIONS_ACTIONS, fields)
    }

    pub fn step_options_main(&mut self, user_input: Option<Value>) -> FlowResult {
        let Some(input) = user_input else {
            return self.main_form(&self.options);
        };

        let merged = merge_input(&self.options, input);
        if let Err(e) = AlarmOptions::from_json(Value::Object(merged.clone())) {
            return self.main_form(&merged).with_error("base", e.to_string());
        }

        self.options = merged;
        self.actions_form(&self.options)
    }

    pub fn step_options_actions(&mut self, user_input: Option<Value>) -> FlowResult {
        let Some(input) = user_input else {
            return self.actions_form(&self.options);
        };

        if let Some(unknown) = input
            .get("notify_services")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .find(|s| !self.notify_choices.iter().any(|c| c == s))
        {
            return self
                .actions_form(&self.options)
                .with_error("notify_services", format!("unknown notify service {}", unknown));
        }

        let merged = merge_input(&self.options, input);
        match AlarmOptions::from_json(Value::Object(merged.clone())) {
            Ok(options) => {
                self.options = merged;
                FlowResult::CreateEntry {
                    title: self.title.clone(),
                    options,
                }
            }
            Err(e) => self.actions_form(&merged).with_error("base", e.to_string()),
        }
    }
}
