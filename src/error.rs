//! Custom error types for the application.
//!
//! This module defines the primary error type, `SliderError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures that can occur,
//! from configuration and I/O issues to transport-level problems.
//!
//! ## Error Hierarchy
//!
//! `SliderError` consolidates these error sources:
//!
//! - **`Config`**: Wraps errors from the `config` crate, typically related to
//!   file parsing or format issues in the settings file.
//! - **`Io`**: Wraps standard `std::io::Error`, covering file and stream I/O.
//! - **`Transport`**: Failures of the byte channel to the controller board
//!   (connect failures, broken streams).
//! - **`NotConnected`**: An operation that requires a live link was attempted
//!   while disconnected.
//! - **`FeatureNotEnabled`**: The code attempted to use functionality (such as
//!   the serial transport) that was not included at compile time via feature
//!   flags. This provides a clear message on how to enable it.
//!
//! By using `#[from]`, `SliderError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the crate with the `?`
//! operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SliderError>;

#[derive(Error, Debug)]
pub enum SliderError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not connected to a controller")]
    NotConnected,

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
}
