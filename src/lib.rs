//! Multi-client chat relay.
//!
//! Clients connect over TCP and send newline-delimited text; every line is
//! rebroadcast to the connected clients as `<label>: <text>`, with join and
//! leave notices sent as `SERVER: <text>`.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod utils;

pub use config::ServerConfig;
pub use server::{Server, ShutdownHandle};
