//! `sync_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Pure, deterministic state handling (tree + delta codec do no I/O).
//! - Clear separation of concerns (tree, delta, net, config, events).
//! - Malformed input is reported, never panicked on.
//! - No `unsafe`.

pub mod config;
pub mod delta;
pub mod error;
pub mod event;
pub mod math;
pub mod net;
pub mod tree;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::delta::*;
    pub use crate::error::*;
    pub use crate::event::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::tree::*;
}
