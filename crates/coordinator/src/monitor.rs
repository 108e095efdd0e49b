use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use shared::domain::MissionId;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tracing::debug;

use crate::clock::Clock;

// Upper bound for a single sleep when the deadline is beyond what Instant can hold.
const FAR_FUTURE: std::time::Duration = std::time::Duration::from_secs(86_400 * 365 * 30);

struct PendingCheck {
    deadline: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// Index of scheduled deadline checks, at most one per mission.
///
/// A check that fires only posts its mission id on the expiry channel; the
/// owner decides whether the mission actually expired.
pub struct TimeoutMonitor {
    clock: Arc<dyn Clock>,
    expiries: mpsc::UnboundedSender<MissionId>,
    pending: HashMap<MissionId, PendingCheck>,
}

impl TimeoutMonitor {
    pub fn new(clock: Arc<dyn Clock>, expiries: mpsc::UnboundedSender<MissionId>) -> Self {
        Self {
            clock,
            expiries,
            pending: HashMap::new(),
        }
    }

    /// Arms one check for `mission_id` at `deadline`, replacing any earlier one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&mut self, mission_id: MissionId, deadline: DateTime<Utc>) {
        self.cancel(mission_id);

        let delay = (deadline - self.clock.now()).to_std().unwrap_or_default();
        let now = Instant::now();
        let fire_at = now.checked_add(delay).unwrap_or(now + FAR_FUTURE);
        let expiries = self.expiries.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            let _ = expiries.send(mission_id);
        });
        debug!(
            mission_id = mission_id.0,
            %deadline,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "timeout monitor: check scheduled"
        );
        self.pending
            .insert(mission_id, PendingCheck { deadline, handle });
    }

    /// Drops the pending check for `mission_id`. Returns whether one existed.
    pub fn cancel(&mut self, mission_id: MissionId) -> bool {
        match self.pending.remove(&mission_id) {
            Some(check) => {
                check.handle.abort();
                debug!(mission_id = mission_id.0, "timeout monitor: check cancelled");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, check) in self.pending.drain() {
            check.handle.abort();
        }
    }

    pub fn pending_deadline(&self, mission_id: MissionId) -> Option<DateTime<Utc>> {
        self.pending.get(&mission_id).map(|check| check.deadline)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for TimeoutMonitor {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use chrono::Duration;

    fn monitor() -> (TimeoutMonitor, mpsc::UnboundedReceiver<MissionId>, Arc<dyn Clock>) {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let (tx, rx) = mpsc::unbounded_channel();
        (TimeoutMonitor::new(Arc::clone(&clock), tx), rx, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_at_deadline() {
        let (mut monitor, mut rx, clock) = monitor();
        monitor.schedule(MissionId(1), clock.now() + Duration::seconds(5));

        tokio::time::sleep(std::time::Duration::from_millis(4_900)).await;
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await, Some(MissionId(1)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_deadline_stays_pending() {
        let (mut monitor, mut rx, _clock) = monitor();
        monitor.schedule(MissionId(1), DateTime::<Utc>::MAX_UTC);
        assert_eq!(monitor.pending_count(), 1);

        tokio::time::sleep(std::time::Duration::from_secs(3_600)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(
            monitor.pending_deadline(MissionId(1)),
            Some(DateTime::<Utc>::MAX_UTC)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_check_never_fires() {
        let (mut monitor, mut rx, clock) = monitor();
        monitor.schedule(MissionId(1), clock.now() + Duration::seconds(5));
        assert!(monitor.cancel(MissionId(1)));
        assert!(!monitor.cancel(MissionId(1)));
        assert_eq!(monitor.pending_count(), 0);

        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_earlier_check() {
        let (mut monitor, mut rx, clock) = monitor();
        let later = clock.now() + Duration::seconds(8);
        monitor.schedule(MissionId(2), clock.now() + Duration::seconds(3));
        monitor.schedule(MissionId(2), later);
        assert_eq!(monitor.pending_count(), 1);
        assert_eq!(monitor.pending_deadline(MissionId(2)), Some(later));

        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(std::time::Duration::from_secs(4)).await;
        assert_eq!(rx.try_recv().ok(), Some(MissionId(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fires_immediately() {
        let (mut monitor, mut rx, clock) = monitor();
        monitor.schedule(MissionId(3), clock.now() - Duration::seconds(1));
        assert_eq!(rx.recv().await, Some(MissionId(3)));
    }
}
