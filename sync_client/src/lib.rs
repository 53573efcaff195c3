//! `sync_client`
//!
//! Client-side systems:
//! - Synchronization session (login, delta application, snapshot history)
//! - Interpolation of entity state at a fixed delay behind server time
//! - Input sampling into outbound `action` messages
//! - Connection driver with an inbound queue drained once per frame
//! - Rendering seam (`RenderSink`)

pub mod client;
pub mod input;
pub mod interp;
pub mod render;
pub mod session;

pub use client::GameClient;
pub use interp::{InterpolatedFrame, InterpolationEngine, SnapshotHistory};
pub use session::{SessionState, SyncSession};
