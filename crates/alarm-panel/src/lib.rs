//! Virtual alarm panel
//!
//! Watches sensor and presence entities through the host's event bus and
//! runs a small state machine:
//!
//! ```text
//! disarmed --arm--> arming --exit delay--> armed_away | armed_night
//! armed_*  --trip (after entry delay for delayed sensors)--> triggered
//! triggered --alarm duration--> disarmed (or back to armed_*)
//! ```
//!
//! Entering `triggered` turns on the configured devices, takes a camera
//! snapshot and fans out notifications; see [`actions`]. Each panel is owned
//! by a config entry managed by [`AlarmControl`].

pub mod actions;
pub mod dashboard;
pub mod entry;
pub mod error;
pub mod flow;
pub mod panel;
pub mod presence;
pub mod schedule;
pub mod state;

pub use actions::{ActionRunner, TriggerReport, TriggerSource};
pub use dashboard::{create_fix_flow, DashboardRepairFlow, DEFAULT_DASHBOARD_PATH};
pub use entry::{AlarmControl, ConfigEntry, ConfigEntrySource, ConfigEntryState};
pub use error::{PanelError, PanelResult};
pub use flow::{notify_service_choices, ConfigFlow, FieldKind, FlowResult, FormField, OptionsFlow};
pub use panel::{AlarmPanel, PANEL_DOMAIN, SUPPORTED_FEATURES};
pub use presence::{Presence, PresenceAction};
pub use schedule::ArmWindow;
pub use state::AlarmState;

pub const DOMAIN: &str = "alarmcontrol";
