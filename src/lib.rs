//! Signaling core for peer-to-peer call setup: presence tracking,
//! invite/answer relaying and per-call lifecycle management over
//! WebSocket. Negotiation payloads are opaque to this crate; it routes
//! them between identified endpoints and never looks inside.

pub mod call;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod server;
