//! Uniform status taxonomy.
//!
//! Every fallible operation in the workspace returns [`Result<T>`]. The error
//! kinds mirror the states a simulated federation can surface: transport
//! drops, sequence violations, wire-format failures, consensus search
//! exhaustion, and cooperative cancellation.

use thiserror::Error;

/// Discriminant for [`Error`], used where callers dispatch on the failure
/// class rather than the message (e.g. treating `InvalidState` on a channel
/// open as "already open").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    NetworkDrop,
    InvalidState,
    Serialization,
    ConsensusFault,
    ChannelClosed,
    NotFound,
    Cancelled,
    Unknown,
}

/// Workspace-wide error type. Each variant carries a human-readable message.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Reserved: no per-operation timeouts exist today.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The simulated network dropped the message.
    #[error("network drop: {0}")]
    NetworkDrop(String),

    /// An operation was attempted against incompatible state (double start,
    /// duplicate binding, sequence mismatch, ...).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A wire frame or packet could not be decoded.
    #[error("serialization: {0}")]
    Serialization(String),

    /// A consensus engine could not produce or verify a block.
    #[error("consensus fault: {0}")]
    ConsensusFault(String),

    /// The channel is closed; Open -> Closed is terminal.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// A lookup (endpoint, mailbox, binding) found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A blocking operation was cancelled by shutdown (queue closed).
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("unknown: {0}")]
    Unknown(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::NetworkDrop(_) => ErrorKind::NetworkDrop,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::ConsensusFault(_) => ErrorKind::ConsensusFault,
            Error::ChannelClosed(_) => ErrorKind::ChannelClosed,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub fn network_drop(msg: impl Into<String>) -> Self {
        Error::NetworkDrop(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Error::Serialization(msg.into())
    }

    pub fn consensus_fault(msg: impl Into<String>) -> Self {
        Error::ConsensusFault(msg.into())
    }

    pub fn channel_closed(msg: impl Into<String>) -> Self {
        Error::ChannelClosed(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Error::Cancelled(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
