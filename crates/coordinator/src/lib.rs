//! Server-authoritative mission lifecycle: registry, session state, the
//! serialized command store, deadline monitoring and snapshot publication.

pub mod broadcast;
pub mod clock;
pub mod monitor;
pub mod registry;
pub mod session;
pub mod store;

pub use broadcast::SnapshotPublisher;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use monitor::TimeoutMonitor;
pub use registry::{
    MissionRegistry, MissionSpec, RegistryError, DEFAULT_TIME_LIMIT_SECONDS, MAX_TIME_LIMIT_SECONDS,
};
pub use session::{CommandError, Effect, Expiry, Mission, Session};
pub use store::{CommandResult, Coordinator, CoordinatorOptions, Rejection, ResetTarget};
