// src/core/errors.rs

//! Defines the primary error type for the relay engine.

use crate::core::persistence::StorageError;
use crate::core::relation::RelationError;
use std::sync::Arc;
use thiserror::Error;

/// Every failure a connection worker can run into.
///
/// The variants fall into the five families the engine reacts to differently:
/// protocol, authentication, I/O, storage and validation failures. See
/// [`RelayError::closes_connection`] for the policy derived from them.
#[derive(Error, Debug, Clone)]
pub enum RelayError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    // --- Protocol errors ---
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown message type '{0}'")]
    UnknownMessageType(String),

    #[error("Frame exceeds the maximum size of {0} bytes")]
    FrameTooLarge(usize),

    // --- Authentication errors ---
    #[error("No login request received before the timeout")]
    AuthTimeout,

    #[error("Malformed login request: {0}")]
    MalformedLogin(String),

    #[error("Account '{0}' does not exist")]
    UnknownUser(String),

    #[error("Invalid username or password")]
    BadCredential,

    // --- Routing and storage errors ---
    #[error("Delivery to '{0}' failed: {1}")]
    Delivery(String, String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl RelayError {
    /// True for the failures raised while authenticating a connection.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            RelayError::AuthTimeout
                | RelayError::MalformedLogin(_)
                | RelayError::UnknownUser(_)
                | RelayError::BadCredential
        )
    }

    /// Whether an error surfacing from the active message loop must end the
    /// connection. Protocol, storage and validation problems are reported and
    /// the loop carries on; a broken socket cannot be recovered.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            RelayError::Io(_) | RelayError::ConnectionClosed | RelayError::FrameTooLarge(_)
        ) || self.is_auth_failure()
    }
}

impl PartialEq for RelayError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RelayError::Io(e1), RelayError::Io(e2)) => e1.kind() == e2.kind(),
            (RelayError::Protocol(s1), RelayError::Protocol(s2)) => s1 == s2,
            (RelayError::UnknownMessageType(s1), RelayError::UnknownMessageType(s2)) => s1 == s2,
            (RelayError::FrameTooLarge(n1), RelayError::FrameTooLarge(n2)) => n1 == n2,
            (RelayError::MalformedLogin(s1), RelayError::MalformedLogin(s2)) => s1 == s2,
            (RelayError::UnknownUser(s1), RelayError::UnknownUser(s2)) => s1 == s2,
            (RelayError::Delivery(a1, b1), RelayError::Delivery(a2, b2)) => a1 == a2 && b1 == b2,
            (RelayError::Storage(e1), RelayError::Storage(e2)) => e1 == e2,
            (RelayError::Validation(s1), RelayError::Validation(s2)) => s1 == s2,
            (RelayError::Internal(s1), RelayError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Protocol(format!("invalid JSON payload: {e}"))
    }
}

impl From<RelationError> for RelayError {
    fn from(e: RelationError) -> Self {
        RelayError::Validation(e.to_string())
    }
}

impl From<std::num::ParseIntError> for RelayError {
    fn from(e: std::num::ParseIntError) -> Self {
        RelayError::Validation(format!("not a valid number: {e}"))
    }
}

/// Helper function to check for non-critical disconnection errors.
pub fn is_normal_disconnect(e: &RelayError) -> bool {
    match e {
        RelayError::ConnectionClosed => true,
        RelayError::Io(arc_err) => matches!(
            arc_err.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionAborted
        ),
        _ => false,
    }
}
