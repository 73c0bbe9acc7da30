//! Error types for the call listener

use std::io;
use thiserror::Error;

/// Result type for listener operations
pub type ListenerResult<T> = Result<T, ListenerError>;

/// Errors surfaced by the listener engine.
///
/// Every variant is recoverable. Connection, authentication and stream
/// failures send the engine into its retry cycle; file failures are reported
/// and the engine keeps running. Nothing here ends a run — only
/// [`stop`](crate::CallListener::stop) does.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ListenerError {
    /// TCP connection to the PBX failed or timed out
    #[error("connection failed: {reason}")]
    Connection { reason: String },

    /// PBX rejected the login, or the reply never carried the accept marker
    #[error("authentication failed: {reason}")]
    Authentication { reason: String },

    /// Event stream broke mid-session: EOF, read error, or framing desync
    #[error("event stream error: {reason}")]
    Stream { reason: String },

    /// Call record could not be written to the status file
    #[error("failed to write status file: {0}")]
    FileWrite(#[source] io::Error),

    /// Status file could not be cleared
    #[error("failed to clear status file: {0}")]
    FileClear(#[source] io::Error),
}

impl ListenerError {
    /// Connection-phase failure.
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Login failure.
    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Mid-session stream failure.
    pub fn stream(reason: impl Into<String>) -> Self {
        Self::Stream {
            reason: reason.into(),
        }
    }
}
