use super::ConfigRecord;
use crate::error::SyncFailure;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the save and reset workflow
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    #[default]
    Idle,
    Saving,
    /// Device dropped the connection and is being pinged until it answers.
    /// `attempt` counts failed pings.
    AwaitingReset {
        attempt: u32,
    },
    /// Configuration was re-fetched after the reset, shown for a short while.
    Synced,
}

impl SyncState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Saving => "saving",
            Self::AwaitingReset { .. } => "awaiting reset",
            Self::Synced => "synced",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingReset { attempt } if *attempt > 0 => {
                write!(f, "{} (attempt {attempt})", self.name())
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Notification sent to observers of the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncEvent {
    StateChanged {
        state: SyncState,
        record: ConfigRecord,
    },
    Failed(SyncFailure),
}

/// Immutable view of the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    pub state: SyncState,
    pub record: ConfigRecord,
    /// False until a configuration was read from the device.
    pub loaded: bool,
}

/// How the device reacted to a pushed configuration or firmware image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Connection dropped, the device is resetting.
    ConnectionDropped,
    /// Device answered before resetting.
    Acknowledged,
    /// Device answered with an error or an unreadable response. Recovery still
    /// runs since the device may have applied the update before failing.
    Unconfirmed,
}
