use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::{CommandKind, MissionId, MissionStatus},
    error::{ApiError, ErrorCode},
    protocol::{seconds_until, MissionState, SessionSnapshot},
};
use thiserror::Error;
use uuid::Uuid;

use crate::registry::MissionRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("mission {0} is not registered")]
    UnknownMission(MissionId),
    #[error("cannot {command} mission {mission_id} while it is {status}")]
    InvalidTransition {
        command: CommandKind,
        mission_id: MissionId,
        status: MissionStatus,
    },
    #[error("cannot start mission {mission_id} while mission {blocking} is active")]
    Blocked {
        mission_id: MissionId,
        blocking: MissionId,
    },
}

impl CommandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownMission(_) => ErrorCode::UnknownMission,
            Self::InvalidTransition { .. } | Self::Blocked { .. } => ErrorCode::InvalidTransition,
        }
    }
}

impl From<&CommandError> for ApiError {
    fn from(value: &CommandError) -> Self {
        ApiError::new(value.code(), value.to_string())
    }
}

/// Whether a command changed the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Mutated,
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Expired,
    NotActive(MissionStatus),
    NotYetDue(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mission {
    id: MissionId,
    label: String,
    time_limit_seconds: u64,
    status: MissionStatus,
    deadline: Option<DateTime<Utc>>,
}

impl Mission {
    pub fn id(&self) -> MissionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn time_limit_seconds(&self) -> u64 {
        self.time_limit_seconds
    }

    pub fn status(&self) -> MissionStatus {
        self.status
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// `now` plus the time limit, saturating at the latest representable instant.
    fn deadline_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.time_limit_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|limit| now.checked_add_signed(limit))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn activate(&mut self, now: DateTime<Utc>) {
        let deadline = self.deadline_from(now);
        self.deadline = Some(deadline);
        self.status = MissionStatus::Active;
    }

    fn settle(&mut self, status: MissionStatus) -> Effect {
        if self.status == status {
            return Effect::NoOp;
        }
        self.status = status;
        self.deadline = None;
        Effect::Mutated
    }

    /// Returns the mission to `Idle` from any status.
    pub fn reset(&mut self) -> Effect {
        self.settle(MissionStatus::Idle)
    }

    fn state_at(&self, now: DateTime<Utc>) -> MissionState {
        MissionState {
            id: self.id,
            label: self.label.clone(),
            time_limit_seconds: self.time_limit_seconds,
            status: self.status,
            deadline: self.deadline,
            seconds_remaining: self.deadline.map(|deadline| seconds_until(deadline, now)),
        }
    }
}

/// Authoritative status of every registered mission.
#[derive(Debug, Clone)]
pub struct Session {
    session_id: Uuid,
    revision: u64,
    missions: BTreeMap<MissionId, Mission>,
}

impl Session {
    pub fn new(registry: &MissionRegistry) -> Self {
        let missions = registry
            .missions()
            .iter()
            .map(|spec| {
                (
                    spec.id,
                    Mission {
                        id: spec.id,
                        label: spec.label.clone(),
                        time_limit_seconds: spec.time_limit_seconds,
                        status: MissionStatus::Idle,
                        deadline: None,
                    },
                )
            })
            .collect();
        Self {
            session_id: Uuid::new_v4(),
            revision: 0,
            missions,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn mission(&self, id: MissionId) -> Option<&Mission> {
        self.missions.get(&id)
    }

    pub fn missions(&self) -> impl Iterator<Item = &Mission> {
        self.missions.values()
    }

    pub fn active_mission(&self) -> Option<&Mission> {
        self.missions
            .values()
            .find(|mission| mission.status == MissionStatus::Active)
    }

    fn mission_mut(&mut self, id: MissionId) -> Result<&mut Mission, CommandError> {
        self.missions
            .get_mut(&id)
            .ok_or(CommandError::UnknownMission(id))
    }

    fn record(&mut self, effect: Effect) -> Effect {
        if effect == Effect::Mutated {
            self.revision += 1;
        }
        effect
    }

    pub fn start(&mut self, id: MissionId, now: DateTime<Utc>) -> Result<Effect, CommandError> {
        let status = self
            .mission(id)
            .ok_or(CommandError::UnknownMission(id))?
            .status;
        if let Some(blocking) = self.active_mission().map(Mission::id) {
            if blocking != id {
                return Err(CommandError::Blocked {
                    mission_id: id,
                    blocking,
                });
            }
        }
        if status != MissionStatus::Idle {
            return Err(CommandError::InvalidTransition {
                command: CommandKind::Start,
                mission_id: id,
                status,
            });
        }
        self.mission_mut(id)?.activate(now);
        Ok(self.record(Effect::Mutated))
    }

    pub fn complete(&mut self, id: MissionId) -> Result<Effect, CommandError> {
        let effect = self.mission_mut(id)?.settle(MissionStatus::Completed);
        Ok(self.record(effect))
    }

    pub fn reset(&mut self, id: MissionId) -> Result<Effect, CommandError> {
        let effect = self.mission_mut(id)?.reset();
        Ok(self.record(effect))
    }

    pub fn reset_all(&mut self) -> Result<Effect, CommandError> {
        self.apply_all(|mission| Ok(mission.reset()))
    }

    /// Runs `step` over every mission as one unit.
    ///
    /// Steps run against a staged copy; the copy replaces the live missions only
    /// when every step succeeded, so a failing step leaves the session untouched.
    pub fn apply_all<F>(&mut self, mut step: F) -> Result<Effect, CommandError>
    where
        F: FnMut(&mut Mission) -> Result<Effect, CommandError>,
    {
        let mut staged = self.missions.clone();
        let mut effect = Effect::NoOp;
        for mission in staged.values_mut() {
            if step(mission)? == Effect::Mutated {
                effect = Effect::Mutated;
            }
        }
        self.missions = staged;
        Ok(self.record(effect))
    }

    pub fn expire_if_due(
        &mut self,
        id: MissionId,
        now: DateTime<Utc>,
    ) -> Result<Expiry, CommandError> {
        let mission = self.mission_mut(id)?;
        let deadline = match (mission.status, mission.deadline) {
            (MissionStatus::Active, Some(deadline)) => deadline,
            (status, _) => return Ok(Expiry::NotActive(status)),
        };
        if now < deadline {
            return Ok(Expiry::NotYetDue(deadline));
        }
        mission.settle(MissionStatus::Failed);
        self.record(Effect::Mutated);
        Ok(Expiry::Expired)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            revision: self.revision,
            server_time: now,
            missions: self
                .missions
                .values()
                .map(|mission| mission.state_at(now))
                .collect(),
        }
    }

    /// Describes the first broken invariant, if any.
    pub fn invariant_violation(&self) -> Option<String> {
        let active: Vec<_> = self
            .missions
            .values()
            .filter(|mission| mission.status == MissionStatus::Active)
            .map(|mission| mission.id)
            .collect();
        if active.len() > 1 {
            return Some(format!("more than one active mission: {active:?}"));
        }
        self.missions.values().find_map(|mission| {
            let active = mission.status == MissionStatus::Active;
            (active != mission.deadline.is_some()).then(|| {
                format!(
                    "mission {} is {} with deadline {:?}",
                    mission.id, mission.status, mission.deadline
                )
            })
        })
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
