//! Error types for the instrument command channel.
//!
//! Two layers of failure are kept apart on purpose: [`TransportError`] covers
//! the byte pipe (open, read, write), while [`ChannelError`] covers the
//! command/reply conversation on top of it. A reply that *arrives* but carries
//! a device error token is not an error at either layer — classifying device
//! errors is the caller's job, because only the caller knows what the command
//! meant.

use std::time::Duration;
use thiserror::Error;

/// Failures of the underlying byte transport (serial, TCP, USB bridge).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("device not found: {0}")]
    NotFound(String),

    #[error("permission denied opening {0}")]
    PermissionDenied(String),

    #[error("device rejected configuration: {0}")]
    ConfigRejected(String),

    #[error("transport is already open")]
    AlreadyOpen,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Whether a retry within the same session can plausibly succeed.
    ///
    /// Open-time failures and `Closed` are final; a mid-session I/O hiccup
    /// is worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Io(_))
    }
}

/// Failures of a command/reply exchange or of the probing/streaming layers
/// built on it.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No reply terminator arrived within the per-attempt deadline.
    #[error("no reply terminator within {0:?}")]
    Timeout(Duration),

    /// The device sent a bare terminator with no payload.
    #[error("empty reply line")]
    EmptyReply,

    /// A reply field that should have been a finite number was not.
    #[error("field {index} is not a finite number: {text:?}")]
    Protocol { index: usize, text: String },

    /// Every attempt allowed by the retry policy failed.
    #[error("command {command:?} failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        command: String,
        attempts: u32,
        last: Box<ChannelError>,
    },

    /// No candidate spelling of the query produced a well-formed reply.
    ///
    /// Carries everything the operator needs for manual diagnosis: which
    /// variants went out, and what (if anything) came back for each.
    #[error("no working command variant; tried {tried:?}, replies {replies:?}")]
    ProbeFailed {
        tried: Vec<String>,
        replies: Vec<String>,
    },

    /// The operation was abandoned because the session was cancelled.
    #[error("cancelled before completion")]
    Cancelled,
}

impl ChannelError {
    /// Whether the retry loop should try again after this failure.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            ChannelError::Transport(t) => t.is_transient(),
            ChannelError::Timeout(_) | ChannelError::EmptyReply => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_not_transient() {
        assert!(!TransportError::Closed.is_transient());
        assert!(TransportError::Io(std::io::Error::other("reset by peer")).is_transient());
    }

    #[test]
    fn retry_classification() {
        assert!(ChannelError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ChannelError::EmptyReply.is_retryable());
        assert!(!ChannelError::Transport(TransportError::Closed).is_retryable());
        assert!(!ChannelError::Protocol {
            index: 0,
            text: "N/A".into()
        }
        .is_retryable());
    }
}
