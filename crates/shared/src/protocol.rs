use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::{CommandKind, MissionId, MissionStatus},
    error::ApiError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    Start { mission_id: MissionId },
    Complete { mission_id: MissionId },
    ResetOne { mission_id: MissionId },
    ResetAll,
    RequestSnapshot,
}

impl ClientRequest {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Start { .. } => CommandKind::Start,
            Self::Complete { .. } => CommandKind::Complete,
            Self::ResetOne { .. } => CommandKind::ResetOne,
            Self::ResetAll => CommandKind::ResetAll,
            Self::RequestSnapshot => CommandKind::RequestSnapshot,
        }
    }

    pub fn mission_id(&self) -> Option<MissionId> {
        match self {
            Self::Start { mission_id }
            | Self::Complete { mission_id }
            | Self::ResetOne { mission_id } => Some(*mission_id),
            Self::ResetAll | Self::RequestSnapshot => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionState {
    pub id: MissionId,
    pub label: String,
    pub time_limit_seconds: u64,
    pub status: MissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_remaining: Option<u64>,
}

/// Full state of every mission at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub revision: u64,
    pub server_time: DateTime<Utc>,
    pub missions: Vec<MissionState>,
}

impl SessionSnapshot {
    pub fn mission(&self, mission_id: MissionId) -> Option<&MissionState> {
        self.missions.iter().find(|m| m.id == mission_id)
    }

    pub fn active_mission(&self) -> Option<&MissionState> {
        self.missions
            .iter()
            .find(|m| m.status == MissionStatus::Active)
    }

    pub fn active_count(&self) -> usize {
        self.missions
            .iter()
            .filter(|m| m.status == MissionStatus::Active)
            .count()
    }

    /// True when `self` was produced before `other` by the same coordinator.
    /// Snapshots from a different session are never considered stale.
    pub fn is_older_than(&self, other: &SessionSnapshot) -> bool {
        self.session_id == other.session_id && self.revision < other.revision
    }
}

/// Whole seconds left until `deadline`, rounded up and clamped at zero.
pub fn seconds_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (deadline - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        u64::try_from((millis + 999) / 1000).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    Snapshot {
        snapshot: SessionSnapshot,
    },
    CommandRejected {
        command: CommandKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mission_id: Option<MissionId>,
        error: ApiError,
        snapshot: SessionSnapshot,
    },
    Error(ApiError),
}

impl ServerEvent {
    /// The snapshot carried by this event, if any.
    pub fn snapshot(&self) -> Option<&SessionSnapshot> {
        match self {
            Self::Snapshot { snapshot } | Self::CommandRejected { snapshot, .. } => Some(snapshot),
            Self::Error(_) => None,
        }
    }
}
