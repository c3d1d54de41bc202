//! Night arming window

use crate::error::PanelResult;
use alarm_config::AlarmOptions;
use alarm_hub::{track_time_change, Subscription};
use chrono::{DateTime, Local, NaiveTime};
use std::future::Future;
use tracing::debug;

/// Arm night at `start`, disarm at `end`, every day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ArmWindow {
    /// `None` when the schedule is disabled
    pub fn from_options(options: &AlarmOptions) -> PanelResult<Option<Self>> {
        if !options.arm_schedule_enable {
            return Ok(None);
        }
        Ok(Some(Self {
            start: options.window_start()?,
            end: options.window_end()?,
        }))
    }

    pub fn bind<S, SF, E, EF>(&self, on_start: S, on_end: E) -> [Subscription; 2]
    where
        S: Fn(DateTime<Local>) -> SF + Send + Sync + 'static,
        SF: Future<Output = ()> + Send + 'static,
        E: Fn(DateTime<Local>) -> EF + Send + Sync + 'static,
        EF: Future<Output = ()> + Send + 'static,
    {
        debug!(start = %self.start, end = %self.end, "Binding arm window");
        [
            track_time_change(self.start, on_start),
            track_time_change(self.end, on_end),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_disabled_window() {
        assert_eq!(ArmWindow::from_options(&AlarmOptions::default()).unwrap(), None);
    }

    #[test]
    fn test_enabled_window_parses_times() {
        let options = AlarmOptions {
            arm_schedule_enable: true,
            arm_time_end: "05:30".to_string(),
            ..Default::default()
        };
        let window = ArmWindow::from_options(&options).unwrap().unwrap();
        assert_eq!(window.start, t(22, 0));
        assert_eq!(window.end, t(5, 30));
    }
}
