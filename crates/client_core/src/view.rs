use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    domain::{MissionId, MissionStatus},
    protocol::{seconds_until, MissionState, SessionSnapshot},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ViewerRole {
    Admin,
    Participant { mission_id: MissionId },
}

impl ViewerRole {
    pub fn scope(&self) -> Option<MissionId> {
        match self {
            Self::Admin => None,
            Self::Participant { mission_id } => Some(*mission_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminRow {
    pub id: MissionId,
    pub label: String,
    pub status: MissionStatus,
    /// Another mission is active, so this one cannot be started.
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_remaining: Option<u64>,
    pub can_start: bool,
    pub can_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ParticipantMode {
    /// No snapshot received yet.
    Checking,
    Ready { time_limit_seconds: u64 },
    Active { seconds_remaining: u64 },
    Failed,
    Done,
    /// The mission is not part of the current session.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantView {
    pub mission_id: MissionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub mode: ParticipantMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum DisplayState {
    Admin {
        synced: bool,
        rows: Vec<AdminRow>,
    },
    Participant(ParticipantView),
}

/// Derives what a viewer should show from the latest snapshot.
///
/// Pure: the same snapshot, role and instant always give the same display.
pub fn render(
    snapshot: Option<&SessionSnapshot>,
    role: ViewerRole,
    now: DateTime<Utc>,
) -> DisplayState {
    match role {
        ViewerRole::Admin => DisplayState::Admin {
            synced: snapshot.is_some(),
            rows: snapshot
                .map(|snapshot| admin_rows(snapshot, now))
                .unwrap_or_default(),
        },
        ViewerRole::Participant { mission_id } => {
            DisplayState::Participant(participant_view(snapshot, mission_id, now))
        }
    }
}

fn admin_rows(snapshot: &SessionSnapshot, now: DateTime<Utc>) -> Vec<AdminRow> {
    let active = snapshot.active_mission().map(|mission| mission.id);
    snapshot
        .missions
        .iter()
        .map(|mission| {
            let disabled = mission.status != MissionStatus::Active
                && active.is_some_and(|active| active != mission.id);
            AdminRow {
                id: mission.id,
                label: mission.label.clone(),
                status: mission.status,
                disabled,
                seconds_remaining: remaining(mission, now),
                can_start: mission.status == MissionStatus::Idle && !disabled,
                can_complete: mission.status != MissionStatus::Completed,
            }
        })
        .collect()
}

fn participant_view(
    snapshot: Option<&SessionSnapshot>,
    mission_id: MissionId,
    now: DateTime<Utc>,
) -> ParticipantView {
    let Some(snapshot) = snapshot else {
        return ParticipantView {
            mission_id,
            label: None,
            mode: ParticipantMode::Checking,
        };
    };
    let Some(mission) = snapshot.mission(mission_id) else {
        return ParticipantView {
            mission_id,
            label: None,
            mode: ParticipantMode::Unknown,
        };
    };
    let mode = match mission.status {
        MissionStatus::Idle => ParticipantMode::Ready {
            time_limit_seconds: mission.time_limit_seconds,
        },
        MissionStatus::Active => ParticipantMode::Active {
            seconds_remaining: remaining(mission, now).unwrap_or(0),
        },
        MissionStatus::Failed => ParticipantMode::Failed,
        MissionStatus::Completed => ParticipantMode::Done,
    };
    ParticipantView {
        mission_id,
        label: Some(mission.label.clone()),
        mode,
    }
}

// Recomputed from the deadline; the snapshot's own countdown is only valid at
// its server_time.
fn remaining(mission: &MissionState, now: DateTime<Utc>) -> Option<u64> {
    match mission.status {
        MissionStatus::Active => mission.deadline.map(|deadline| seconds_until(deadline, now)),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
