//! Leader-gated watch engine.
//!
//! The engine owns the alert map and the channel registry. While it holds the
//! leadership token it runs two independent long-poll loops (see
//! [`crate::watch`]): one over check health, one over the user event log.
//! Lifecycle calls (`run`, `stop`, `destroy`) are the only code that changes
//! the lock's acquisition state; the loops only ask it questions.
//!
//! # States
//!
//! - `Idle`: no lock held, no loops running
//! - `Acquiring`: lock acquisition in flight
//! - `Leading`: lock held, loops running
//! - `SteppingDown`: loops still running but the lock says we lost it

use crate::alert::Alert;
use crate::channel::{Channel, ChannelOutcome, DeliveryReport};
use crate::error::{PagerError, Result, parse_duration};
use crate::lock::LeadershipLock;
use crate::metrics::PagerMetrics;
use crate::source::{HealthRecord, HealthStatus, MembershipSource, UserEvent};
use crate::watch::{self, LoopExit, WatchKind};
use futures::future::join_all;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, error, info, warn};

/// Tunables for one engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// How long an entity must keep failing before its alert is delivered
    pub default_maturity: Duration,

    /// Long-poll wait bound; also bounds how late a loop notices lost leadership
    pub wait_timeout: Duration,

    /// Polls an event id may go unseen before it leaves the dedup cache
    pub event_retention_cycles: u64,

    /// Capacity of the new-event broadcast
    pub event_buffer: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_maturity: Duration::from_secs(3),
            wait_timeout: Duration::from_secs(3),
            event_retention_cycles: 64,
            event_buffer: 256,
        }
    }
}

impl EngineOptions {
    /// Set the maturity threshold from a duration string such as `3s`.
    pub fn with_maturity(mut self, value: &str) -> Result<Self> {
        self.default_maturity = parse_duration(value)?;
        Ok(self)
    }

    pub fn with_wait_timeout(mut self, wait: Duration) -> Self {
        self.wait_timeout = wait;
        self
    }
}

/// Coarse lifecycle state, derived from the lock and the live loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    Acquiring,
    Leading,
    SteppingDown,
}

impl EnginePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            EnginePhase::Idle => "idle",
            EnginePhase::Acquiring => "acquiring",
            EnginePhase::Leading => "leading",
            EnginePhase::SteppingDown => "stepping_down",
        }
    }
}

/// A delivery the health loop decided to make
pub(crate) struct Claim {
    alert: Alert,
    channels: Vec<Arc<dyn Channel>>,
}

/// Alerts and channels, guarded together
#[derive(Default)]
pub(crate) struct AlertBook {
    alerts: HashMap<String, Alert>,
    channels: HashMap<String, Arc<dyn Channel>>,
    next_episode: u64,
}

impl AlertBook {
    /// Apply one batch of health records and return the deliveries it triggers.
    fn apply(
        &mut self,
        records: &[HealthRecord],
        maturity: Duration,
        metrics: Option<&PagerMetrics>,
    ) -> Vec<Claim> {
        let mut claims = Vec::new();

        for record in records {
            let severity = match record.status {
                HealthStatus::Passing => {
                    if let Some(alert) = self.alerts.remove(&record.name) {
                        info!(id = %alert.id, sent = alert.is_sent(), "Check passing, alert cleared");
                        if let Some(m) = metrics {
                            m.record_alert_cleared();
                        }
                    }
                    continue;
                }
                HealthStatus::Other => continue,
                HealthStatus::Warning | HealthStatus::Critical => match record.status.severity() {
                    Some(severity) => severity,
                    None => continue,
                },
            };

            match self.alerts.entry(record.name.clone()) {
                Entry::Vacant(entry) => {
                    self.next_episode += 1;
                    entry.insert(Alert::with_episode(&record.name, self.next_episode));
                    info!(id = %record.name, %severity, "Check failing, alert created");
                    if let Some(m) = metrics {
                        m.record_alert_created();
                    }
                }
                Entry::Occupied(mut entry) => {
                    let alert = entry.get_mut();
                    alert.update(&record.name, record.description(), severity);

                    if !alert.is_sent() && !alert.in_flight && alert.is_mature(maturity) {
                        debug!(id = %alert.id, age_ms = alert.age().as_millis() as u64, "Alert matured");
                        alert.in_flight = true;
                        claims.push(Claim {
                            alert: alert.clone(),
                            channels: self.channels.values().cloned().collect(),
                        });
                    }
                }
            }
        }

        claims
    }
}

/// State shared between the engine handle and its loops
pub(crate) struct EngineCore {
    pub(crate) lock: Arc<dyn LeadershipLock>,
    pub(crate) source: Arc<dyn MembershipSource>,
    pub(crate) options: EngineOptions,
    pub(crate) metrics: Option<Arc<PagerMetrics>>,
    pub(crate) events_tx: broadcast::Sender<UserEvent>,
    book: RwLock<AlertBook>,

    /// Current leadership term; bumped each time loops are launched
    term: AtomicU64,
    /// Term of the live health loop, 0 when none
    health_term: AtomicU64,
    /// Term of the live event loop, 0 when none
    events_term: AtomicU64,
    live_loops: AtomicUsize,
    acquiring: AtomicBool,

    /// Serializes run/stop/destroy
    lifecycle: Mutex<()>,
}

impl EngineCore {
    pub(crate) fn current_term(&self) -> u64 {
        self.term.load(Ordering::SeqCst)
    }

    /// Apply a health batch, then deliver whatever matured.
    pub(crate) async fn process_health(&self, records: &[HealthRecord]) -> Vec<DeliveryReport> {
        let claims = {
            let mut book = self.book.write().await;
            let claims = book.apply(
                records,
                self.options.default_maturity,
                self.metrics.as_deref(),
            );
            if let Some(ref m) = self.metrics {
                m.set_alerts_active(book.alerts.len());
            }
            claims
        };

        let mut reports = Vec::with_capacity(claims.len());
        for claim in claims {
            reports.push(self.fan_out(claim).await);
        }
        reports
    }

    /// Send one claimed alert to every channel, then mark it sent.
    ///
    /// Runs without the book lock held. One channel failing does not stop the
    /// others, and the alert is marked sent once all of them were attempted.
    async fn fan_out(&self, claim: Claim) -> DeliveryReport {
        let Claim { alert, channels } = claim;

        let outcomes = join_all(channels.iter().map(|channel| {
            let alert = &alert;
            async move {
                ChannelOutcome {
                    channel: channel.id().to_string(),
                    result: channel.send(alert).await,
                }
            }
        }))
        .await;

        for outcome in &outcomes {
            match &outcome.result {
                Ok(()) => info!(id = %alert.id, channel = %outcome.channel, "Alert delivered"),
                Err(e) => warn!(id = %alert.id, channel = %outcome.channel, error = %e, "Alert delivery failed"),
            }
            if let Some(ref m) = self.metrics {
                m.record_delivery(&outcome.channel, outcome.result.is_ok());
            }
        }

        let mut book = self.book.write().await;
        match book.alerts.get_mut(&alert.id) {
            Some(current) if current.episode == alert.episode => current.mark_sent(),
            _ => debug!(id = %alert.id, "Alert cleared while delivering"),
        }

        DeliveryReport {
            alert_id: alert.id,
            outcomes,
        }
    }

    /// Reason to leave a loop at an iteration boundary, if any.
    pub(crate) async fn leadership_exit(&self, term: u64) -> Option<LoopExit> {
        if self.current_term() != term {
            return Some(LoopExit::Superseded);
        }
        match self.lock.is_leader().await {
            Ok(true) => None,
            Ok(false) => Some(LoopExit::LeadershipLost),
            Err(e) => Some(LoopExit::LeadershipCheckFailed(e.to_string())),
        }
    }

    fn slot(&self, kind: WatchKind) -> &AtomicU64 {
        match kind {
            WatchKind::Health => &self.health_term,
            WatchKind::Events => &self.events_term,
        }
    }

    /// Called by a loop on its way out.
    pub(crate) fn loop_finished(&self, kind: WatchKind, term: u64, exit: &LoopExit) {
        let _ = self
            .slot(kind)
            .compare_exchange(term, 0, Ordering::SeqCst, Ordering::SeqCst);
        self.live_loops.fetch_sub(1, Ordering::SeqCst);

        match exit {
            LoopExit::LeadershipLost => info!(watch = kind.name(), term, "Leadership lost, watch loop stopped"),
            LoopExit::Superseded => debug!(watch = kind.name(), term, "Newer term running, watch loop stopped"),
            LoopExit::LeadershipCheckFailed(e) => {
                warn!(watch = kind.name(), term, error = %e, "Leadership check failed, watch loop stopped")
            }
            LoopExit::SourceFailed(e) => {
                error!(watch = kind.name(), term, error = %e, "Membership query failed, watch loop stopped")
            }
        }

        if let Some(ref m) = self.metrics {
            m.record_loop_exit(kind.name(), exit.reason());
        }
    }
}

/// Watch engine handle.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct WatchEngine {
    core: Arc<EngineCore>,
}

impl WatchEngine {
    /// Create an idle engine. Nothing is contacted until [`WatchEngine::run`].
    pub fn new(
        lock: Arc<dyn LeadershipLock>,
        source: Arc<dyn MembershipSource>,
        options: EngineOptions,
        metrics: Option<Arc<PagerMetrics>>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(options.event_buffer.max(1));

        Self {
            core: Arc::new(EngineCore {
                lock,
                source,
                options,
                metrics,
                events_tx,
                book: RwLock::new(AlertBook::default()),
                term: AtomicU64::new(0),
                health_term: AtomicU64::new(0),
                events_term: AtomicU64::new(0),
                live_loops: AtomicUsize::new(0),
                acquiring: AtomicBool::new(false),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.core.options
    }

    pub fn metrics(&self) -> Option<&Arc<PagerMetrics>> {
        self.core.metrics.as_ref()
    }

    /// Try to become leader and launch both watch loops.
    ///
    /// Returns as soon as the loops are spawned. When leadership is already
    /// held and both loops of the current term are alive this is a no-op.
    /// Fails with [`PagerError::LockUnavailable`] when another watcher holds
    /// the token; the caller owns the retry policy.
    pub async fn run(&self) -> Result<()> {
        let _guard = self.core.lifecycle.lock().await;

        if self.is_watching() && self.is_leader().await {
            debug!(term = self.core.current_term(), "Already leading");
            return Ok(());
        }

        self.core.acquiring.store(true, Ordering::SeqCst);
        let acquired = self.core.lock.acquire().await;
        self.core.acquiring.store(false, Ordering::SeqCst);

        if let Err(e) = acquired {
            debug!(error = %e, "Leadership not acquired");
            return Err(e);
        }

        let term = self.core.term.fetch_add(1, Ordering::SeqCst) + 1;
        self.core.health_term.store(term, Ordering::SeqCst);
        self.core.events_term.store(term, Ordering::SeqCst);
        self.core.live_loops.fetch_add(2, Ordering::SeqCst);

        if let Some(ref m) = self.core.metrics {
            m.record_acquisition();
        }
        info!(term, "Leadership acquired, starting watch loops");

        watch::spawn_loops(self.core.clone(), term);
        Ok(())
    }

    /// Release leadership.
    ///
    /// Loops are not cancelled: each notices at its next leadership check and
    /// exits, so an iteration already past its poll may still update alerts.
    /// Calling this when already stopped succeeds.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.core.lifecycle.lock().await;
        self.release().await
    }

    /// Release leadership and remove the lock's coordination resource.
    ///
    /// Both steps are attempted even if the first fails; the first error is
    /// returned.
    pub async fn destroy(&self) -> Result<()> {
        let _guard = self.core.lifecycle.lock().await;

        let released = self.release().await;
        if let Err(ref e) = released {
            warn!(error = %e, "Release failed, removing lock resource anyway");
        }

        let destroyed = self.core.lock.destroy().await;
        match destroyed {
            Ok(()) => info!("Lock resource destroyed"),
            Err(ref e) => warn!(error = %e, "Failed to destroy lock resource"),
        }

        released.and(destroyed)
    }

    async fn release(&self) -> Result<()> {
        if self.core.lock.is_unlocked().await {
            debug!("Already stopped");
            return Ok(());
        }
        self.core.lock.release().await?;
        info!(term = self.core.current_term(), "Leadership released");
        Ok(())
    }

    /// Ask the lock whether we lead. Query errors count as "no".
    pub async fn is_leader(&self) -> bool {
        match self.core.lock.is_leader().await {
            Ok(leader) => leader,
            Err(e) => {
                warn!(error = %e, "Leadership query failed");
                false
            }
        }
    }

    pub async fn is_stopped(&self) -> bool {
        self.core.lock.is_unlocked().await
    }

    /// Both loops of the current term are alive.
    pub fn is_watching(&self) -> bool {
        let term = self.core.current_term();
        term != 0
            && self.core.health_term.load(Ordering::SeqCst) == term
            && self.core.events_term.load(Ordering::SeqCst) == term
    }

    /// Number of watch loops still running, across all terms.
    pub fn active_loops(&self) -> usize {
        self.core.live_loops.load(Ordering::SeqCst)
    }

    pub fn term(&self) -> u64 {
        self.core.current_term()
    }

    pub async fn phase(&self) -> EnginePhase {
        if self.core.acquiring.load(Ordering::SeqCst) {
            return EnginePhase::Acquiring;
        }
        if self.active_loops() == 0 {
            return EnginePhase::Idle;
        }
        if self.is_leader().await {
            EnginePhase::Leading
        } else {
            EnginePhase::SteppingDown
        }
    }

    /// Register a channel under its id, replacing any previous one.
    pub async fn add_channel(&self, channel: Arc<dyn Channel>) -> Result<()> {
        let id = channel.id().to_string();
        if id.trim().is_empty() {
            return Err(PagerError::InvalidChannel {
                reason: "channel id is empty".to_string(),
            });
        }

        let replaced = self.core.book.write().await.channels.insert(id.clone(), channel);
        if replaced.is_some() {
            info!(channel = %id, "Channel replaced");
        } else {
            info!(channel = %id, "Channel registered");
        }
        Ok(())
    }

    pub async fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.core.book.read().await.channels.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn has_alert(&self, id: &str) -> bool {
        self.core.book.read().await.alerts.contains_key(id)
    }

    /// Whether the alert for `id` is at least `duration` old.
    ///
    /// False for unknown ids and for unparseable durations.
    pub async fn alert_is_mature(&self, id: &str, duration: &str) -> bool {
        let threshold = match parse_duration(duration) {
            Ok(threshold) => threshold,
            Err(e) => {
                warn!(error = %e, "Rejected maturity threshold");
                return false;
            }
        };
        self.core
            .book
            .read()
            .await
            .alerts
            .get(id)
            .is_some_and(|alert| alert.is_mature(threshold))
    }

    pub async fn alert_is_sent(&self, id: &str) -> bool {
        self.core
            .book
            .read()
            .await
            .alerts
            .get(id)
            .is_some_and(Alert::is_sent)
    }

    /// Snapshot of one alert.
    pub async fn alert(&self, id: &str) -> Option<Alert> {
        self.core.book.read().await.alerts.get(id).cloned()
    }

    pub async fn alert_count(&self) -> usize {
        self.core.book.read().await.alerts.len()
    }

    /// Deliver the alert for `id` to every channel now instead of waiting
    /// for the next health cycle.
    ///
    /// Follows the same rules as the health loop: the alert must be mature
    /// and its current episode not yet sent.
    pub async fn send_alert(&self, id: &str) -> Result<DeliveryReport> {
        let maturity = self.core.options.default_maturity;
        let claim = {
            let mut book = self.core.book.write().await;
            let channels: Vec<_> = book.channels.values().cloned().collect();
            let alert = book
                .alerts
                .get_mut(id)
                .ok_or_else(|| PagerError::AlertNotFound { id: id.to_string() })?;
            if alert.is_sent() {
                return Err(PagerError::AlertAlreadySent { id: id.to_string() });
            }
            if alert.in_flight {
                return Err(PagerError::DeliveryInFlight { id: id.to_string() });
            }
            if !alert.is_mature(maturity) {
                return Err(PagerError::AlertNotMature { id: id.to_string() });
            }
            alert.in_flight = true;
            Claim {
                alert: alert.clone(),
                channels,
            }
        };

        Ok(self.core.fan_out(claim).await)
    }

    /// Apply a batch of health records as the health loop would.
    pub async fn process_health(&self, records: &[HealthRecord]) -> Vec<DeliveryReport> {
        self.core.process_health(records).await
    }

    /// Receive user events as the event loop first observes them.
    pub fn subscribe_events(&self) -> broadcast::Receiver<UserEvent> {
        self.core.events_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DeliveryError;
    use crate::lock::MockLeadershipLock;
    use crate::source::{StateFilter, WatchResponse};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct SilentSource;

    #[async_trait]
    impl MembershipSource for SilentSource {
        async fn watch_health(
            &self,
            _filter: StateFilter,
            wait: Duration,
            since: u64,
        ) -> Result<WatchResponse<HealthRecord>> {
            tokio::time::sleep(wait).await;
            Ok(WatchResponse::new(Vec::new(), since))
        }

        async fn watch_events(&self, wait: Duration, since: u64) -> Result<WatchResponse<UserEvent>> {
            tokio::time::sleep(wait).await;
            Ok(WatchResponse::new(Vec::new(), since))
        }
    }

    #[derive(Debug)]
    struct NullChannel(&'static str);

    #[async_trait]
    impl Channel for NullChannel {
        fn id(&self) -> &str {
            self.0
        }

        async fn send(&self, _alert: &Alert) -> std::result::Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn engine_with(lock: MockLeadershipLock) -> WatchEngine {
        WatchEngine::new(
            Arc::new(lock),
            Arc::new(SilentSource),
            EngineOptions::default(),
            None,
        )
    }

    fn record(name: &str, status: HealthStatus) -> HealthRecord {
        HealthRecord::new(name, status, "notes")
    }

    #[tokio::test]
    async fn test_run_surfaces_acquire_failure() {
        let mut lock = MockLeadershipLock::new();
        lock.expect_acquire()
            .times(1)
            .returning(|| Err(PagerError::lock("acquire", "held elsewhere")));

        let engine = engine_with(lock);
        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, PagerError::LockUnavailable { op: "acquire", .. }));
        assert_eq!(engine.active_loops(), 0);
        assert_eq!(engine.term(), 0);
        assert_eq!(engine.phase().await, EnginePhase::Idle);
    }

    #[tokio::test]
    async fn test_leader_query_error_means_not_leader() {
        let mut lock = MockLeadershipLock::new();
        lock.expect_is_leader()
            .returning(|| Err(PagerError::lock("query", "connection refused")));

        let engine = engine_with(lock);
        assert!(!engine.is_leader().await);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_skips_release() {
        let mut lock = MockLeadershipLock::new();
        lock.expect_is_unlocked().returning(|| true);
        lock.expect_release().never();

        let engine = engine_with(lock);
        engine.stop().await.unwrap();
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_attempts_both_steps() {
        let mut lock = MockLeadershipLock::new();
        lock.expect_is_unlocked().returning(|| false);
        lock.expect_release()
            .times(1)
            .returning(|| Err(PagerError::lock("release", "session gone")));
        lock.expect_destroy().times(1).returning(|| Ok(()));

        let engine = engine_with(lock);
        let err = engine.destroy().await.unwrap_err();
        assert!(matches!(err, PagerError::LockUnavailable { op: "release", .. }));
    }

    #[tokio::test]
    async fn test_destroy_reports_destroy_failure() {
        let mut lock = MockLeadershipLock::new();
        lock.expect_is_unlocked().returning(|| true);
        lock.expect_destroy()
            .times(1)
            .returning(|| Err(PagerError::lock("destroy", "lock in use")));

        let engine = engine_with(lock);
        let err = engine.destroy().await.unwrap_err();
        assert!(matches!(err, PagerError::LockUnavailable { op: "destroy", .. }));
    }

    #[tokio::test]
    async fn test_empty_channel_id_is_refused() {
        let engine = engine_with(MockLeadershipLock::new());
        let err = engine.add_channel(Arc::new(NullChannel(""))).await.unwrap_err();
        assert!(matches!(err, PagerError::InvalidChannel { .. }));

        engine.add_channel(Arc::new(NullChannel("chat"))).await.unwrap();
        engine.add_channel(Arc::new(NullChannel("chat"))).await.unwrap();
        assert_eq!(engine.channel_ids().await, vec!["chat".to_string()]);
    }

    #[tokio::test]
    async fn test_send_alert_unknown_id() {
        let engine = engine_with(MockLeadershipLock::new());
        let err = engine.send_alert("nope").await.unwrap_err();
        assert!(matches!(err, PagerError::AlertNotFound { ref id } if id == "nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_table() {
        let engine = engine_with(MockLeadershipLock::new());

        // First failing observation only creates the alert
        engine.process_health(&[record("db", HealthStatus::Warning)]).await;
        let alert = engine.alert("db").await.unwrap();
        assert!(alert.severity.is_none());
        assert!(alert.body.is_empty());

        // Ignored statuses do not touch the map
        engine.process_health(&[record("maint", HealthStatus::Other)]).await;
        assert!(!engine.has_alert("maint").await);

        // Later failing observations refresh content but wait for maturity
        engine.process_health(&[record("db", HealthStatus::Critical)]).await;
        let alert = engine.alert("db").await.unwrap();
        assert_eq!(alert.render_message(), "[critical] db\nnotes");
        assert!(!alert.is_sent());

        tokio::time::advance(Duration::from_secs(3)).await;
        let reports = engine.process_health(&[record("db", HealthStatus::Critical)]).await;
        assert_eq!(reports.len(), 1);
        assert!(engine.alert_is_sent("db").await);

        // Mature and sent: nothing more
        let reports = engine.process_health(&[record("db", HealthStatus::Critical)]).await;
        assert!(reports.is_empty());

        // Passing clears even a sent alert
        engine.process_health(&[record("db", HealthStatus::Passing)]).await;
        assert!(!engine.has_alert("db").await);
        assert_eq!(engine.alert_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_is_mature_query() {
        let engine = engine_with(MockLeadershipLock::new());
        engine.process_health(&[record("db", HealthStatus::Warning)]).await;

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(engine.alert_is_mature("db", "1s").await);
        assert!(!engine.alert_is_mature("db", "13s").await);
        assert!(!engine.alert_is_mature("db", "a while").await);
        assert!(!engine.alert_is_mature("other", "1s").await);
    }

    #[test]
    fn test_options_reject_bad_maturity() {
        let err = EngineOptions::default().with_maturity("3 fortnights-ish").unwrap_err();
        assert!(matches!(err, PagerError::InvalidDuration { .. }));

        let options = EngineOptions::default().with_maturity("90s").unwrap();
        assert_eq!(options.default_maturity, Duration::from_secs(90));
    }
}
