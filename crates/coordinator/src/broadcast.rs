use shared::protocol::SessionSnapshot;
use tokio::sync::broadcast;
use tracing::debug;

/// Fans committed snapshots out to every subscribed viewer.
#[derive(Debug, Clone)]
pub struct SnapshotPublisher {
    tx: broadcast::Sender<SessionSnapshot>,
}

impl SnapshotPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, snapshot: SessionSnapshot) {
        let revision = snapshot.revision;
        match self.tx.send(snapshot) {
            Ok(receivers) => debug!(revision, receivers, "snapshot published"),
            Err(_) => debug!(revision, "snapshot published with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
