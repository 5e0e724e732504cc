//! Error taxonomy for sessions, transactions and launches.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::session::NodeId;

/// Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised while launching, driving or tearing down a device session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Budget exhausted while waiting for a terminal marker, echo or prompt.
    #[error("node {node}: timed out after {budget:?} waiting for {waiting_for}")]
    Timeout {
        node: NodeId,
        waiting_for: String,
        budget: Duration,
    },
    /// The device reported an explicit error line.
    #[error("node {node}: device error: {message}")]
    DeviceError {
        node: NodeId,
        code: Option<u32>,
        message: String,
    },
    /// The underlying channel ended before the exchange completed.
    #[error("node {0}: console channel closed")]
    ChannelClosed(NodeId),
    /// Another transaction is already in flight on this session.
    #[error("node {0}: session busy, a transaction is already in flight")]
    SessionBusy(NodeId),
    /// The backing service never became ready, or the session is not usable.
    #[error("node {node}: launch failed: {reason}")]
    LaunchFailed { node: NodeId, reason: String },
    /// Command text rejected before it reached the device.
    #[error("invalid command {0:?}: commands must be a single non-empty line")]
    InvalidCommand(String),
    /// The response did not have the shape the caller asked for.
    #[error("node {node}: unexpected output for {command:?}: {detail}")]
    UnexpectedOutput {
        node: NodeId,
        command: String,
        detail: String,
    },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    pub(crate) fn timeout(node: NodeId, waiting_for: impl Into<String>, budget: Duration) -> Self {
        SessionError::Timeout {
            node,
            waiting_for: waiting_for.into(),
            budget,
        }
    }

    pub(crate) fn launch_failed(node: NodeId, reason: impl Into<String>) -> Self {
        SessionError::LaunchFailed {
            node,
            reason: reason.into(),
        }
    }

    pub(crate) fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        SessionError::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Whether this error leaves the session's console unusable.
    ///
    /// `Timeout` is reported separately because its disposition depends on
    /// [`SessionConfig::timeout_is_fatal`](crate::SessionConfig).
    pub fn is_channel_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::ChannelClosed(_) | SessionError::LaunchFailed { .. } | SessionError::Io(_)
        )
    }
}

/// A line a decoder could not parse. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSkipped {
    pub decoder: &'static str,
    pub line: String,
    pub reason: String,
}

impl ParseSkipped {
    pub(crate) fn new(decoder: &'static str, line: &str, reason: impl Into<String>) -> Self {
        Self {
            decoder,
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// Record the skip as a diagnostic.
    pub(crate) fn log(self) {
        tracing::warn!(decoder = self.decoder, line = %self.line, "skipped line: {}", self.reason);
    }
}

impl fmt::Display for ParseSkipped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: skipped {:?} ({})", self.decoder, self.line, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_display() {
        let err = SessionError::DeviceError {
            node: 2,
            code: Some(35),
            message: "InvalidCommand".into(),
        };
        assert_eq!(err.to_string(), "node 2: device error: InvalidCommand");
    }

    #[test]
    fn test_channel_fatal_classification() {
        assert!(SessionError::ChannelClosed(1).is_channel_fatal());
        assert!(!SessionError::SessionBusy(1).is_channel_fatal());
        assert!(!SessionError::timeout(1, "Done", Duration::from_secs(1)).is_channel_fatal());
    }

    #[test]
    fn test_parse_skipped_display() {
        let skip = ParseSkipped::new("table", "| 1 |", "width mismatch");
        assert_eq!(skip.to_string(), "table: skipped \"| 1 |\" (width mismatch)");
    }
}
