//! Error types for the pull pipeline
//!
//! Every stage of `kubectl image pull` reports failures through [`PullError`].
//! Each variant names the phase that failed, and the message carries the
//! rendered cause chain so the user sees what actually went wrong.

pub mod handlers;

use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PullError>;

/// Stage of a transfer at which a protocol failure or cancellation happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Loading configuration and credentials
    Credentials,
    /// Establishing the TLS channel
    Dial,
    /// Sending the envelope and opening the response stream
    StreamOpen,
    /// Reading frames from the stream
    Receive,
    /// Writing received frames to local storage
    Write,
    /// Copying the archive into the image store
    Commit,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Credentials => "credentials",
            Phase::Dial => "dial",
            Phase::StreamOpen => "stream-open",
            Phase::Receive => "receive",
            Phase::Write => "write",
            Phase::Commit => "commit",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PullError {
    /// Bad argument count or coordinate grammar
    #[error("Usage error: {0}")]
    Usage(String),
    /// Missing configuration or empty token
    #[error("Credential error: {0}")]
    Credential(String),
    /// Dial or TLS handshake failure
    #[error("Connection error: {0}")]
    Connection(String),
    /// Stream-open or mid-stream failure
    #[error("Protocol error during {phase}: {message}")]
    Protocol { phase: Phase, message: String },
    /// Temp resource creation failure
    #[error("Storage error: {0}")]
    Storage(String),
    /// Archive reference construction failure
    #[error("Format error: {0}")]
    Format(String),
    /// Image store copy failure
    #[error("Commit error: {0}")]
    Commit(String),
    /// The caller's cancellation signal was raised
    #[error("Cancelled during {phase}")]
    Cancelled { phase: Phase },
    /// Invalid application configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PullError {
    pub fn protocol(phase: Phase, message: impl Into<String>) -> Self {
        PullError::Protocol {
            phase,
            message: message.into(),
        }
    }

    pub fn cancelled(phase: Phase) -> Self {
        PullError::Cancelled { phase }
    }

    /// Short tag naming the failure class, used in log output
    pub fn kind(&self) -> &'static str {
        match self {
            PullError::Usage(_) => "usage",
            PullError::Credential(_) => "credential",
            PullError::Connection(_) => "connection",
            PullError::Protocol { .. } => "protocol",
            PullError::Storage(_) => "storage",
            PullError::Format(_) => "format",
            PullError::Commit(_) => "commit",
            PullError::Cancelled { .. } => "cancelled",
            PullError::Config(_) => "config",
        }
    }

    /// Process exit code for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            PullError::Usage(_) | PullError::Config(_) => 2,
            PullError::Cancelled { .. } => 130,
            _ => 1,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PullError::Cancelled { .. })
    }
}

impl From<serde_json::Error> for PullError {
    fn from(err: serde_json::Error) -> Self {
        PullError::Commit(format!("Failed to encode image record: {}", err))
    }
}
