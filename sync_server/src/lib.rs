//! `sync_server`
//!
//! Server-side systems:
//! - Client handshake and full-state login
//! - Authoritative world tree, editable by the host
//! - Per-client delta publishing on a fixed tick
//! - Input and chat relay
//!
//! Networking model: one reliable, ordered TCP stream per client.

pub mod server;

pub use server::GameServer;
