//! Core library for the slidelapse controller.
//!
//! This library contains the transport abstraction, the GRBL protocol
//! client, the scene sequencer, and the timelapse capture loop. It is used
//! by the CLI binary and by integration tests driving a mock transport.

pub mod error;
pub mod grbl;
pub mod scenes;
pub mod session;
pub mod settings;
pub mod timelapse;
pub mod transport;
