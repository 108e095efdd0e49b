use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use shared::{
    domain::{CommandKind, MissionId},
    error::ApiError,
    protocol::{ClientRequest, ServerEvent, SessionSnapshot},
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::{
    broadcast::SnapshotPublisher,
    clock::Clock,
    monitor::TimeoutMonitor,
    registry::MissionRegistry,
    session::{CommandError, Effect, Expiry, Mission, Session},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    pub broadcast_capacity: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTarget {
    One(MissionId),
    All,
}

/// A refused command, with the unchanged snapshot the requester should adopt.
#[derive(Debug, Clone, Error)]
#[error("{command} rejected: {error}")]
pub struct Rejection {
    pub command: CommandKind,
    pub mission_id: Option<MissionId>,
    pub error: CommandError,
    pub snapshot: SessionSnapshot,
}

impl Rejection {
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::CommandRejected {
            command: self.command,
            mission_id: self.mission_id,
            error: ApiError::from(&self.error),
            snapshot: self.snapshot.clone(),
        }
    }
}

pub type CommandResult = Result<SessionSnapshot, Rejection>;

struct Inner {
    session: Session,
    monitor: TimeoutMonitor,
}

/// Single writer of the mission session.
///
/// Every command takes the session lock for its whole duration, so commands
/// never interleave, deadline checks are armed or cancelled in the same
/// critical section as the status change, and snapshots are published in
/// commit order.
pub struct Coordinator {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    publisher: SnapshotPublisher,
}

impl Coordinator {
    /// Builds the coordinator and its expiry worker. Requires a tokio runtime.
    pub fn spawn(
        registry: &MissionRegistry,
        clock: Arc<dyn Clock>,
        options: CoordinatorOptions,
    ) -> Arc<Self> {
        let (expiries_tx, expiries_rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(Self {
            inner: Mutex::new(Inner {
                session: Session::new(registry),
                monitor: TimeoutMonitor::new(Arc::clone(&clock), expiries_tx),
            }),
            clock,
            publisher: SnapshotPublisher::new(options.broadcast_capacity),
        });
        tokio::spawn(run_expiry_worker(Arc::downgrade(&coordinator), expiries_rx));
        info!(missions = registry.len(), "mission coordinator started");
        coordinator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.publisher.subscribe()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        inner.session.snapshot(self.clock.now())
    }

    pub async fn pending_timeouts(&self) -> usize {
        self.inner.lock().await.monitor.pending_count()
    }

    pub async fn handle(&self, request: &ClientRequest) -> CommandResult {
        match request {
            ClientRequest::Start { mission_id } => self.request_start(*mission_id).await,
            ClientRequest::Complete { mission_id } => self.request_complete(*mission_id).await,
            ClientRequest::ResetOne { mission_id } => {
                self.request_reset(ResetTarget::One(*mission_id)).await
            }
            ClientRequest::ResetAll => self.request_reset(ResetTarget::All).await,
            ClientRequest::RequestSnapshot => Ok(self.snapshot().await),
        }
    }

    pub async fn request_start(&self, mission_id: MissionId) -> CommandResult {
        let mut guard = self.inner.lock().await;
        let Inner { session, monitor } = &mut *guard;
        let now = self.clock.now();
        let outcome = session.start(mission_id, now);
        if outcome.is_ok() {
            if let Some(deadline) = session.mission(mission_id).and_then(Mission::deadline) {
                monitor.schedule(mission_id, deadline);
            }
        }
        self.finish(session, CommandKind::Start, Some(mission_id), outcome, now)
    }

    pub async fn request_complete(&self, mission_id: MissionId) -> CommandResult {
        let mut guard = self.inner.lock().await;
        let Inner { session, monitor } = &mut *guard;
        let now = self.clock.now();
        let outcome = session.complete(mission_id);
        if outcome.is_ok() {
            monitor.cancel(mission_id);
        }
        self.finish(session, CommandKind::Complete, Some(mission_id), outcome, now)
    }

    pub async fn request_reset(&self, target: ResetTarget) -> CommandResult {
        let mut guard = self.inner.lock().await;
        let Inner { session, monitor } = &mut *guard;
        let now = self.clock.now();
        match target {
            ResetTarget::One(mission_id) => {
                let outcome = session.reset(mission_id);
                if outcome.is_ok() {
                    monitor.cancel(mission_id);
                }
                self.finish(session, CommandKind::ResetOne, Some(mission_id), outcome, now)
            }
            ResetTarget::All => {
                let outcome = session.reset_all();
                if outcome.is_ok() {
                    monitor.cancel_all();
                }
                self.finish(session, CommandKind::ResetAll, None, outcome, now)
            }
        }
    }

    /// Fails `mission_id` if it is still active and its deadline has passed.
    ///
    /// Driven by the timeout monitor; safe to call at any time.
    pub async fn expire_if_due(
        &self,
        mission_id: MissionId,
    ) -> Result<(Expiry, SessionSnapshot), Rejection> {
        let mut guard = self.inner.lock().await;
        let Inner { session, monitor } = &mut *guard;
        let now = self.clock.now();
        let expiry = match session.expire_if_due(mission_id, now) {
            Ok(expiry) => expiry,
            Err(error) => {
                return Err(self.reject(session, CommandKind::Expire, Some(mission_id), error, now))
            }
        };
        let effect = match expiry {
            Expiry::Expired => {
                monitor.cancel(mission_id);
                Effect::Mutated
            }
            Expiry::NotYetDue(deadline) => {
                monitor.schedule(mission_id, deadline);
                Effect::NoOp
            }
            Expiry::NotActive(_) => Effect::NoOp,
        };
        let snapshot =
            self.finish(session, CommandKind::Expire, Some(mission_id), Ok(effect), now)?;
        Ok((expiry, snapshot))
    }

    /// Cancels every pending deadline check.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.monitor.cancel_all();
        info!("mission coordinator stopped");
    }

    fn finish(
        &self,
        session: &Session,
        command: CommandKind,
        mission_id: Option<MissionId>,
        outcome: Result<Effect, CommandError>,
        now: DateTime<Utc>,
    ) -> CommandResult {
        match outcome {
            Ok(Effect::Mutated) => {
                let snapshot = session.snapshot(now);
                debug_assert_eq!(session.invariant_violation(), None);
                info!(
                    %command,
                    ?mission_id,
                    revision = snapshot.revision,
                    "mission command applied"
                );
                self.publisher.publish(snapshot.clone());
                Ok(snapshot)
            }
            Ok(Effect::NoOp) => {
                debug!(%command, ?mission_id, "mission command changed nothing");
                Ok(session.snapshot(now))
            }
            Err(error) => Err(self.reject(session, command, mission_id, error, now)),
        }
    }

    fn reject(
        &self,
        session: &Session,
        command: CommandKind,
        mission_id: Option<MissionId>,
        error: CommandError,
        now: DateTime<Utc>,
    ) -> Rejection {
        warn!(%command, ?mission_id, %error, "mission command rejected");
        Rejection {
            command,
            mission_id,
            error,
            snapshot: session.snapshot(now),
        }
    }
}

async fn run_expiry_worker(
    coordinator: Weak<Coordinator>,
    mut expiries: mpsc::UnboundedReceiver<MissionId>,
) {
    while let Some(mission_id) = expiries.recv().await {
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        match coordinator.expire_if_due(mission_id).await {
            Ok((Expiry::Expired, snapshot)) => info!(
                mission_id = mission_id.0,
                revision = snapshot.revision,
                "mission deadline passed; marked failed"
            ),
            Ok((expiry, _)) => debug!(mission_id = mission_id.0, ?expiry, "expiry check skipped"),
            Err(rejection) => warn!(mission_id = mission_id.0, %rejection, "expiry check rejected"),
        }
    }
    debug!("expiry worker stopped");
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
