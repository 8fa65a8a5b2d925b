//! Membership and health source capability.
//!
//! The engine consumes two blocking streams from the membership service:
//! the health state of every registered check and the user event log. Both
//! follow the long-poll contract: a request carries the last seen index and
//! a wait bound, and returns either as soon as the index moves or when the
//! wait elapses with nothing new.
//!
//! Record field names follow the Consul HTTP API so adapters can decode
//! responses straight into these types.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Check status reported by the membership service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
    /// Anything else (maintenance, unknown); ignored by the engine
    #[serde(other)]
    Other,
}

impl HealthStatus {
    /// Severity for a non-passing status, `None` for passing and ignored ones.
    pub fn severity(self) -> Option<Severity> {
        match self {
            HealthStatus::Warning => Some(Severity::Warning),
            HealthStatus::Critical => Some(Severity::Critical),
            HealthStatus::Passing | HealthStatus::Other => None,
        }
    }
}

/// Severity carried by an alert once it has matured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which checks to return from a health watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    Any,
    Passing,
    Warning,
    Critical,
}

impl StateFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            StateFilter::Any => "any",
            StateFilter::Passing => "passing",
            StateFilter::Warning => "warning",
            StateFilter::Critical => "critical",
        }
    }
}

/// One health check as seen by the membership service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthRecord {
    #[serde(default)]
    pub node: String,

    #[serde(rename = "CheckID", default)]
    pub check_id: String,

    /// Entity name; the alert key
    pub name: String,

    pub status: HealthStatus,

    #[serde(default)]
    pub notes: String,

    #[serde(default)]
    pub output: String,

    #[serde(rename = "ServiceID", default)]
    pub service_id: String,

    #[serde(default)]
    pub service_name: String,
}

impl HealthRecord {
    /// Minimal record, mostly for tests and fixtures.
    pub fn new(name: impl Into<String>, status: HealthStatus, notes: impl Into<String>) -> Self {
        Self {
            node: String::new(),
            check_id: String::new(),
            name: name.into(),
            status,
            notes: notes.into(),
            output: String::new(),
            service_id: String::new(),
            service_name: String::new(),
        }
    }

    /// Free text describing the failure: the notes, or the check output
    /// when no notes were registered.
    pub fn description(&self) -> &str {
        if self.notes.trim().is_empty() {
            self.output.trim()
        } else {
            self.notes.as_str()
        }
    }
}

/// A user event from the cluster event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserEvent {
    #[serde(rename = "ID")]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub payload: Option<String>,

    #[serde(default)]
    pub node_filter: String,

    #[serde(default)]
    pub service_filter: String,

    #[serde(default)]
    pub tag_filter: String,

    #[serde(default)]
    pub version: u32,

    #[serde(rename = "LTime", default)]
    pub ltime: u64,
}

/// Result of one blocking query
#[derive(Debug, Clone, PartialEq)]
pub struct WatchResponse<T> {
    pub items: Vec<T>,
    /// Index to resume from on the next request
    pub index: u64,
}

impl<T> WatchResponse<T> {
    pub fn new(items: Vec<T>, index: u64) -> Self {
        Self { items, index }
    }
}

/// Membership/health source
///
/// Both calls may block for up to `wait`. Errors are reported as
/// [`crate::PagerError::SourceQueryFailed`].
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Blocking query for health records matching `filter`.
    async fn watch_health(
        &self,
        filter: StateFilter,
        wait: Duration,
        since: u64,
    ) -> Result<WatchResponse<HealthRecord>>;

    /// Blocking query for the user event log.
    async fn watch_events(&self, wait: Duration, since: u64) -> Result<WatchResponse<UserEvent>>;
}

/// Next index to request, given the previous one and a response.
///
/// Indexes are opaque but monotonic; when the service reports a smaller value
/// (snapshot restore, leader change on its side) the watch restarts from zero.
pub fn next_index(previous: u64, reported: u64) -> u64 {
    if reported < previous { 0 } else { reported }
}
