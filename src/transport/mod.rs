//! Byte transport abstraction for the controller link.
//!
//! The GRBL client owns exactly one [`Transport`] and never cares what the
//! physical channel is. Inbound traffic is newline-delimited text; the
//! transport pushes each received line into the sender installed with
//! [`Transport::set_line_sender`] and drops that sender when the read side
//! terminates, which is how the client learns the link died.

use crate::error::AppResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod mock;
#[cfg(feature = "serial")]
pub mod serial;

pub use mock::MockTransport;
#[cfg(feature = "serial")]
pub use serial::SerialTransport;

/// Bidirectional byte channel to the controller board.
///
/// Implementations must be safe to drive from a single owner task; the client
/// serializes all access.
#[async_trait]
pub trait Transport: Send {
    /// Install the single consumer of inbound lines. Must be called before
    /// `connect`; the sender is dropped when the read loop ends.
    fn set_line_sender(&mut self, tx: mpsc::UnboundedSender<String>);

    /// Establish the connection to `address`.
    async fn connect(&mut self, address: &str) -> AppResult<()>;

    /// Whether the link is currently up.
    fn is_connected(&self) -> bool;

    /// Write raw bytes. Returns `false` on failure.
    async fn write(&mut self, bytes: &[u8]) -> bool;

    /// Tear the connection down. Idempotent.
    async fn close(&mut self);
}
