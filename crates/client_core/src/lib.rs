//! Viewer side of the mission protocol: display derivation, snapshot
//! bookkeeping and the transport to the coordinator.

pub mod controller;
pub mod transport;
pub mod view;

pub use controller::{ApplyOutcome, ViewController, ViewError};
pub use transport::{ClientEvent, ClientOptions, CommandSink, MissionClient};
pub use view::{render, AdminRow, DisplayState, ParticipantMode, ParticipantView, ViewerRole};
