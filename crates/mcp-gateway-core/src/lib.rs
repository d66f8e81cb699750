//! Gateway core - backend process lifecycle and call forwarding
//!
//! This crate owns the machinery under the gateway's tool surface:
//! spawning and supervising backend MCP server processes, the protocol
//! handshake, typed call forwarding with request correlation, reply
//! normalization into the canonical result contract, and clean teardown.

mod backend;
mod config;
mod error;
mod normalize;
mod registry;
mod transport;

pub use backend::*;
pub use config::*;
pub use error::*;
pub use normalize::*;
pub use registry::*;
pub use transport::*;
