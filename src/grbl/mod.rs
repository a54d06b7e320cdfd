//! GRBL protocol layer.
//!
//! - [`status`]: connection state and `<...>` status-frame parsing.
//! - [`client`]: the actor-based protocol client that owns the transport.

pub mod client;
pub mod status;

pub use client::{GrblClient, GrblEvent, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_BACKOFF};
pub use status::{ConnectionState, GrblStatus};

/// Real-time status query (`?`).
pub const RT_STATUS: u8 = b'?';
/// Real-time feed hold (`!`).
pub const RT_HOLD: u8 = b'!';
/// Real-time cycle start / resume (`~`).
pub const RT_RESUME: u8 = b'~';
/// Real-time soft reset (Ctrl-X).
pub const RT_SOFT_RESET: u8 = 0x18;
/// Real-time jog cancel.
pub const RT_JOG_CANCEL: u8 = 0x85;
