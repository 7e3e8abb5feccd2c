//! Server core functionality
//!
//! The accept loop and graceful shutdown.

pub mod core;
pub mod shutdown;

pub use core::Server;
pub use shutdown::ShutdownHandle;
