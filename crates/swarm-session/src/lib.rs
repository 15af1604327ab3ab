//! Session plumbing for the swarm monitor: backend triggers, the snapshot push
//! channel, and the controller that ties them to a [`swarm_core::Reconciler`].

pub mod backend;
pub mod config;
pub mod controller;
pub mod transport;

pub use backend::{Endpoint, HttpTriggerBackend, TriggerBackend, TriggerError};
pub use config::{ConfigError, MonitorConfig};
pub use controller::{event_channel, SessionController, SessionError, SessionSignal};
pub use transport::{
    FrameStream, SnapshotSource, Transport, TransportError, TransportEvent, WsSnapshotSource,
};
