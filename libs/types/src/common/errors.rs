//! Error types for identifier parsing
//!
//! Ids are minted by hashing, never parsed from user input on the hot path;
//! parsing exists for configuration files, logs and test fixtures.

use thiserror::Error;

/// Errors that can occur while decoding an identifier
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Input was not valid hexadecimal
    #[error("Invalid hex in identifier: {reason}")]
    InvalidHex { reason: String },

    /// Decoded byte length does not match the fixed id width
    #[error("Invalid identifier length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}
