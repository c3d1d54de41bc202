//! Error types for the alarm panel

use crate::state::AlarmState;
use alarm_config::ConfigError;
use alarm_hub::ServiceError;
use std::path::PathBuf;
use thiserror::Error;

pub type PanelResult<T> = Result<T, PanelError>;

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("cannot go from {from} to {to}")]
    InvalidTransition { from: AlarmState, to: AlarmState },

    #[error("config entry not found: {0}")]
    EntryNotFound(String),

    #[error("config entry {entry_id} is {state}, expected {expected}")]
    EntryState {
        entry_id: String,
        state: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("flow aborted: {0}")]
    Aborted(String),

    #[error("failed to build dashboard: {0}")]
    Dashboard(#[from] serde_yaml::Error),
}
