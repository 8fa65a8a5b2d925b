//! Error types for the pager core.

use thiserror::Error;

/// A specialized Result type for pager operations.
pub type Result<T> = std::result::Result<T, PagerError>;

/// Errors surfaced by the watch engine and its capabilities.
#[derive(Debug, Error)]
pub enum PagerError {
    /// The leadership token could not be acquired, released or destroyed.
    #[error("leadership lock unavailable during {op}: {reason}")]
    LockUnavailable {
        /// Lock operation that failed (acquire, release, destroy, query)
        op: &'static str,
        /// Underlying cause
        reason: String,
    },

    /// A long-poll against the membership service failed.
    #[error("{source_kind} query failed: {reason}")]
    SourceQueryFailed {
        /// Which stream was being polled (health, events)
        source_kind: &'static str,
        /// Underlying cause
        reason: String,
    },

    /// Delivery was requested for an id with no alert.
    #[error("alert not found: {id}")]
    AlertNotFound {
        /// The missing alert id
        id: String,
    },

    /// A delivery for this alert is already running.
    #[error("delivery already in flight for alert {id}")]
    DeliveryInFlight {
        /// The alert id
        id: String,
    },

    /// The alert has not been failing for the maturity threshold yet.
    #[error("alert {id} is not mature")]
    AlertNotMature {
        /// The alert id
        id: String,
    },

    /// This episode of the alert was already delivered.
    #[error("alert {id} was already sent")]
    AlertAlreadySent {
        /// The alert id
        id: String,
    },

    /// A maturity threshold string failed to parse.
    #[error("invalid duration {value:?}: {reason}")]
    InvalidDuration {
        /// The rejected input
        value: String,
        /// Parser message
        reason: String,
    },

    /// A channel cannot be registered.
    #[error("invalid channel: {reason}")]
    InvalidChannel {
        /// Why the channel was refused
        reason: String,
    },
}

impl PagerError {
    /// Create a lock error for the given operation.
    pub fn lock(op: &'static str, reason: impl std::fmt::Display) -> Self {
        PagerError::LockUnavailable {
            op,
            reason: reason.to_string(),
        }
    }

    /// Create a source error for the given stream.
    pub fn source(source_kind: &'static str, reason: impl std::fmt::Display) -> Self {
        PagerError::SourceQueryFailed {
            source_kind,
            reason: reason.to_string(),
        }
    }
}

/// Parse a maturity threshold such as `3s`, `90s` or `1h 30m`.
pub fn parse_duration(value: &str) -> Result<std::time::Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| PagerError::InvalidDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })
}
