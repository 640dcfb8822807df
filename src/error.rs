//! Error types for the CEC bridge core

use thiserror::Error;

use crate::cec::LogicalAddress;

/// Errors raised by the CEC protocol layer and bus operations.
#[derive(Debug, Error)]
pub enum CecError {
    /// Bus text that could not be decoded into a frame.
    /// Always logged and dropped by the listener, never turned into device state.
    #[error("malformed CEC frame '{text}': {reason}")]
    MalformedFrame { text: String, reason: &'static str },

    /// An inbound command failed validation
    #[error("unrecognized command: {path} ({payload})")]
    UnrecognizedCommand { path: String, payload: String },

    /// A query got no answer within its deadline
    #[error("device {0} did not respond")]
    DeviceUnresponsive(LogicalAddress),

    /// Opening the adapter failed (fatal at startup)
    #[error("could not connect to CEC adapter: {0}")]
    BusConnectionFailure(String),

    /// The adapter rejected a write or has gone away
    #[error("CEC adapter error: {0}")]
    Adapter(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CecError {
    pub(crate) fn malformed(text: &str, reason: &'static str) -> Self {
        Self::MalformedFrame {
            text: text.to_string(),
            reason,
        }
    }

    pub(crate) fn unrecognized(path: &str, payload: &str) -> Self {
        Self::UnrecognizedCommand {
            path: path.to_string(),
            payload: payload.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CecError>;
