//! Leader-coordinated alert pager.
//!
//! This crate watches a cluster membership service for failing health checks
//! and pages humans once a failure has persisted long enough. Only the
//! instance holding a distributed leadership lock watches, so a fleet of
//! pagers sends each alert once.
//!
//! # Features
//!
//! - Maturity threshold filters out flapping checks
//! - At most one delivery per alert episode, across leadership changes
//! - Pluggable notification channels, lock and membership source
//! - Deduplicated user event stream with bounded memory
//!
//! # Example
//!
//! ```no_run
//! use pager::{EngineOptions, MemoryLock, WatchEngine};
//! use pager::source::MembershipSource;
//! use std::sync::Arc;
//!
//! # async fn example(source: Arc<dyn MembershipSource>) -> Result<(), Box<dyn std::error::Error>> {
//! let options = EngineOptions::default().with_maturity("30s")?;
//! let engine = WatchEngine::new(Arc::new(MemoryLock::new()), source, options, None);
//!
//! engine.run().await?;
//! assert!(engine.is_leader().await);
//!
//! engine.destroy().await?;
//! # Ok(())
//! # }
//! ```

pub mod alert;
pub mod channel;
pub mod engine;
pub mod error;
pub mod events;
pub mod lock;
pub mod metrics;
pub mod source;
pub mod watch;

pub use alert::Alert;
pub use channel::{Channel, ChannelOutcome, DeliveryError, DeliveryReport};
pub use engine::{EngineOptions, EnginePhase, WatchEngine};
pub use error::{PagerError, Result};
pub use lock::{LeadershipLock, MemoryLock};
pub use metrics::PagerMetrics;
pub use source::{HealthRecord, HealthStatus, MembershipSource, Severity, UserEvent};
pub use watch::LoopExit;
