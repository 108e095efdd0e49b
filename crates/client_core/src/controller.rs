use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::{CommandKind, MissionId},
    error::{ApiError, ErrorCode},
    protocol::{ClientRequest, ServerEvent, SessionSnapshot},
};
use thiserror::Error;
use tracing::debug;

use crate::view::{render, DisplayState, ViewerRole};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("participant for mission {scope} cannot {command} mission {requested}")]
    OutOfScope {
        scope: MissionId,
        command: CommandKind,
        requested: MissionId,
    },
    #[error("participants cannot issue {0}")]
    AdminOnly(CommandKind),
}

impl From<&ViewError> for ApiError {
    fn from(value: &ViewError) -> Self {
        ApiError::new(ErrorCode::Validation, value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Same revision as the one already held; display unchanged.
    Duplicate,
    /// Older than the held snapshot of the same session; ignored.
    Stale,
}

/// Holds one viewer's latest snapshot and derives its display.
///
/// Never changes the display in anticipation of a command result; only
/// snapshots from the coordinator move it.
#[derive(Debug, Clone)]
pub struct ViewController {
    role: ViewerRole,
    latest: Option<SessionSnapshot>,
    clock_offset: Duration,
}

impl ViewController {
    pub fn new(role: ViewerRole) -> Self {
        Self {
            role,
            latest: None,
            clock_offset: Duration::zero(),
        }
    }

    pub fn role(&self) -> ViewerRole {
        self.role
    }

    pub fn latest(&self) -> Option<&SessionSnapshot> {
        self.latest.as_ref()
    }

    /// Estimated `server clock - local clock` at the last applied snapshot.
    pub fn clock_offset(&self) -> Duration {
        self.clock_offset
    }

    pub fn apply(&mut self, snapshot: SessionSnapshot, received_at: DateTime<Utc>) -> ApplyOutcome {
        let outcome = match &self.latest {
            Some(held) if snapshot.is_older_than(held) => ApplyOutcome::Stale,
            Some(held)
                if held.session_id == snapshot.session_id
                    && held.revision == snapshot.revision =>
            {
                ApplyOutcome::Duplicate
            }
            _ => ApplyOutcome::Applied,
        };
        if outcome == ApplyOutcome::Stale {
            debug!(revision = snapshot.revision, "ignoring stale snapshot");
            return outcome;
        }
        self.clock_offset = snapshot.server_time - received_at;
        self.latest = Some(snapshot);
        outcome
    }

    /// Adopts the snapshot carried by `event`, if it has one.
    pub fn apply_event(
        &mut self,
        event: &ServerEvent,
        received_at: DateTime<Utc>,
    ) -> Option<ApplyOutcome> {
        event
            .snapshot()
            .map(|snapshot| self.apply(snapshot.clone(), received_at))
    }

    pub fn display(&self, local_now: DateTime<Utc>) -> DisplayState {
        render(self.latest.as_ref(), self.role, local_now + self.clock_offset)
    }

    pub fn start(&self, mission_id: MissionId) -> Result<ClientRequest, ViewError> {
        self.ensure_in_scope(CommandKind::Start, mission_id)?;
        Ok(ClientRequest::Start { mission_id })
    }

    pub fn complete(&self, mission_id: MissionId) -> Result<ClientRequest, ViewError> {
        self.ensure_admin(CommandKind::Complete)?;
        Ok(ClientRequest::Complete { mission_id })
    }

    pub fn reset(&self, mission_id: MissionId) -> Result<ClientRequest, ViewError> {
        self.ensure_admin(CommandKind::ResetOne)?;
        Ok(ClientRequest::ResetOne { mission_id })
    }

    pub fn reset_all(&self) -> Result<ClientRequest, ViewError> {
        self.ensure_admin(CommandKind::ResetAll)?;
        Ok(ClientRequest::ResetAll)
    }

    pub fn request_snapshot(&self) -> ClientRequest {
        ClientRequest::RequestSnapshot
    }

    fn ensure_admin(&self, command: CommandKind) -> Result<(), ViewError> {
        match self.role {
            ViewerRole::Admin => Ok(()),
            ViewerRole::Participant { .. } => Err(ViewError::AdminOnly(command)),
        }
    }

    fn ensure_in_scope(&self, command: CommandKind, requested: MissionId) -> Result<(), ViewError> {
        match self.role.scope() {
            Some(scope) if scope != requested => Err(ViewError::OutOfScope {
                scope,
                command,
                requested,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
