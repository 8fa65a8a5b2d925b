//! Fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use pager::source::{StateFilter, WatchResponse};
use pager::{
    Alert, Channel, DeliveryError, EngineOptions, HealthRecord, HealthStatus, MembershipSource,
    PagerError, PagerMetrics, Result, UserEvent, WatchEngine,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
struct Snapshot<T> {
    index: u64,
    items: Vec<T>,
}

/// In-memory membership service with blocking-query semantics.
///
/// A query at the current index blocks until the data changes or `wait`
/// runs out, then returns the full current state.
#[derive(Debug)]
pub struct ScriptedSource {
    health: watch::Sender<Snapshot<HealthRecord>>,
    events: watch::Sender<Snapshot<UserEvent>>,
    health_fault: AtomicBool,
    health_polls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        let (health, _) = watch::channel(Snapshot {
            index: 1,
            items: Vec::new(),
        });
        let (events, _) = watch::channel(Snapshot {
            index: 1,
            items: Vec::new(),
        });
        Arc::new(Self {
            health,
            events,
            health_fault: AtomicBool::new(false),
            health_polls: AtomicUsize::new(0),
        })
    }

    pub fn set_health(&self, records: Vec<HealthRecord>) {
        self.health.send_modify(|snapshot| {
            snapshot.index += 1;
            snapshot.items = records;
        });
    }

    pub fn set_events(&self, events: Vec<UserEvent>) {
        self.events.send_modify(|snapshot| {
            snapshot.index += 1;
            snapshot.items = events;
        });
    }

    /// Make the next health queries fail until cleared.
    pub fn fail_health(&self, failing: bool) {
        self.health_fault.store(failing, Ordering::SeqCst);
    }

    pub fn health_polls(&self) -> usize {
        self.health_polls.load(Ordering::SeqCst)
    }
}

async fn blocking_query<T: Clone>(
    tx: &watch::Sender<Snapshot<T>>,
    wait: Duration,
    since: u64,
) -> WatchResponse<T> {
    let mut rx = tx.subscribe();
    let current = rx.borrow_and_update().clone();
    if current.index != since {
        return WatchResponse::new(current.items, current.index);
    }

    let _ = tokio::time::timeout(wait, rx.changed()).await;
    let current = rx.borrow().clone();
    WatchResponse::new(current.items, current.index)
}

#[async_trait]
impl MembershipSource for ScriptedSource {
    async fn watch_health(
        &self,
        _filter: StateFilter,
        wait: Duration,
        since: u64,
    ) -> Result<WatchResponse<HealthRecord>> {
        self.health_polls.fetch_add(1, Ordering::SeqCst);
        if self.health_fault.load(Ordering::SeqCst) {
            return Err(PagerError::source("health", "connection refused"));
        }
        Ok(blocking_query(&self.health, wait, since).await)
    }

    async fn watch_events(&self, wait: Duration, since: u64) -> Result<WatchResponse<UserEvent>> {
        Ok(blocking_query(&self.events, wait, since).await)
    }
}

/// A delivered message as seen by a channel
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub channel: String,
    pub alert_id: String,
    pub message: String,
}

/// Channel that records every alert it is handed.
#[derive(Debug, Clone)]
pub struct RecordingChannel {
    id: String,
    sink: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingChannel {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            sink: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.sink.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sink.lock().unwrap().len()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, alert: &Alert) -> std::result::Result<(), DeliveryError> {
        self.sink.lock().unwrap().push(Delivery {
            channel: self.id.clone(),
            alert_id: alert.id.clone(),
            message: alert.render_message(),
        });
        Ok(())
    }
}

/// Channel that always fails, counting attempts.
#[derive(Debug, Default)]
pub struct FailingChannel {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl Channel for FailingChannel {
    fn id(&self) -> &str {
        "broken"
    }

    async fn send(&self, _alert: &Alert) -> std::result::Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError::Transport("connection reset".to_string()))
    }
}

pub fn critical(name: &str) -> HealthRecord {
    HealthRecord::new(name, HealthStatus::Critical, format!("{name} is down"))
}

pub fn passing(name: &str) -> HealthRecord {
    HealthRecord::new(name, HealthStatus::Passing, "")
}

pub fn event(id: &str, name: &str) -> UserEvent {
    UserEvent {
        id: id.to_string(),
        name: name.to_string(),
        payload: Some(format!("payload of {id}")),
        node_filter: String::new(),
        service_filter: String::new(),
        tag_filter: String::new(),
        version: 1,
        ltime: 1,
    }
}

/// 3s maturity, 1s long-poll wait.
pub fn options() -> EngineOptions {
    EngineOptions::default()
        .with_maturity("3s")
        .unwrap()
        .with_wait_timeout(Duration::from_secs(1))
}

pub fn engine(
    lock: pager::MemoryLock,
    source: Arc<ScriptedSource>,
) -> (WatchEngine, Arc<PagerMetrics>) {
    common::logging::try_init("debug");
    let metrics = Arc::new(PagerMetrics::new());
    let engine = WatchEngine::new(Arc::new(lock), source, options(), Some(metrics.clone()));
    (engine, metrics)
}
