//! Configuration for alarmcontrol
//!
//! Panels are configured in `configuration.yaml` under the `alarmcontrol:`
//! key, one list entry per panel:
//!
//! ```yaml
//! alarmcontrol:
//!   - name: House
//!     instant_sensors: [binary_sensor.front_door]
//!     persons: [person.anna]
//!     media_alarm_url: !secret alarm_sound
//! ```
//!
//! The loader understands `!include`, `!secret` and `!env_var`.

mod error;
mod loader;
mod options;
mod secrets;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use options::{
    load_panels, parse_time, AlarmOptions, DEFAULT_NAME, DEFAULT_NOTIFY_MESSAGE,
    DEFAULT_NOTIFY_SERVICES, DEFAULT_NOTIFY_TITLE, DEFAULT_SNAPSHOT_PATH,
};
pub use secrets::Secrets;

pub use serde_yaml::Value;
