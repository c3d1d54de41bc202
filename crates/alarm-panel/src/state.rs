use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Panel state as published on the `alarm_control_panel` entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    #[default]
    Disarmed,
    Arming,
    ArmedAway,
    ArmedNight,
    Triggered,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Disarmed => "disarmed",
            AlarmState::Arming => "arming",
            AlarmState::ArmedAway => "armed_away",
            AlarmState::ArmedNight => "armed_night",
            AlarmState::Triggered => "triggered",
        }
    }

    /// Sensors trip only in these states.
    ///
    /// `arming` is deliberately not armed: a trip during the exit delay is
    /// ignored, unlike panels that treat the exit delay as armed.
    pub fn is_armed(&self) -> bool {
        matches!(self, AlarmState::ArmedAway | AlarmState::ArmedNight)
    }

    pub fn is_arming(&self) -> bool {
        matches!(self, AlarmState::Arming)
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disarmed" => Ok(AlarmState::Disarmed),
            "arming" => Ok(AlarmState::Arming),
            "armed_away" => Ok(AlarmState::ArmedAway),
            "armed_night" => Ok(AlarmState::ArmedNight),
            "triggered" => Ok(AlarmState::Triggered),
            other => Err(format!("unknown alarm state '{}'", other)),
        }
    }
}
