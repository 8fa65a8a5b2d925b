//! Notification channel capability.

use crate::alert::Alert;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Why a channel failed to deliver an alert
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

/// A notification backend.
///
/// Implementations must not keep mutable state shared with other channels;
/// the engine invokes `send` concurrently across channels without any
/// locking of its own. Marking an alert as sent is the engine's job.
#[async_trait]
pub trait Channel: Send + Sync + fmt::Debug {
    /// Registry key. Never empty for a registered channel.
    fn id(&self) -> &str;

    /// Deliver one alert.
    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError>;
}

/// Outcome of one channel's delivery attempt
#[derive(Debug, Clone)]
pub struct ChannelOutcome {
    pub channel: String,
    pub result: Result<(), DeliveryError>,
}

/// Per-channel outcomes of one fan-out
#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub alert_id: String,
    pub outcomes: Vec<ChannelOutcome>,
}

impl DeliveryReport {
    /// Channels that accepted the alert.
    pub fn delivered(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.channel.as_str())
    }

    /// Channels that failed, with their errors.
    pub fn failed(&self) -> impl Iterator<Item = (&str, &DeliveryError)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Ok(()) => None,
            Err(e) => Some((o.channel.as_str(), e)),
        })
    }

    pub fn is_complete_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}
