//! Client connection management
//!
//! Connection wrapper, the shared registry and the per-connection supervisor.

pub mod connection;
pub mod handler;
pub mod registry;
pub mod state;

pub use connection::{ClientSink, Connection, LineReader, Offer, ReadLine};
pub use handler::{ConnectionSupervisor, handle_client};
pub use registry::{Registry, Snapshot};
pub use state::{CloseReason, SupervisorState};
