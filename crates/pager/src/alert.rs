//! Alert lifecycle.

use crate::source::Severity;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// One in-flight problem for one monitored entity.
///
/// An alert lives in the engine's map exactly as long as the entity keeps
/// reporting a non-passing status. `created_at` never changes, so a new
/// episode after recovery always gets a new alert with a fresh clock.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub severity: Option<Severity>,

    #[serde(skip)]
    created_at: Instant,

    sent: bool,

    /// Set while a fan-out is running for this instance
    #[serde(skip)]
    pub(crate) in_flight: bool,

    /// Distinguishes successive alerts with the same id
    #[serde(skip)]
    pub(crate) episode: u64,
}

impl Alert {
    /// Create a fresh, unsent alert stamped with the current time.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_episode(id, 0)
    }

    pub(crate) fn with_episode(id: impl Into<String>, episode: u64) -> Self {
        Self {
            id: id.into(),
            subject: String::new(),
            body: String::new(),
            severity: None,
            created_at: Instant::now(),
            sent: false,
            in_flight: false,
            episode,
        }
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// How long the entity has been failing.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// True once the alert has existed for at least `threshold`.
    pub fn is_mature(&self, threshold: Duration) -> bool {
        self.age() >= threshold
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Flip the delivery flag. Never goes back to false.
    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
        self.in_flight = false;
    }

    /// Overwrite the mutable content fields.
    pub fn update(&mut self, subject: &str, body: &str, severity: Severity) {
        if self.subject != subject {
            self.subject = subject.to_string();
        }
        if self.body != body {
            self.body = body.to_string();
        }
        self.severity = Some(severity);
    }

    /// Human readable form: `[severity] subject` followed by the body.
    pub fn render_message(&self) -> String {
        let severity = self.severity.map(Severity::as_str).unwrap_or_default();
        format!("[{}] {}\n{}", severity, self.subject, self.body)
    }
}
