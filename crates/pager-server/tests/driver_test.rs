//! Integration tests for the leadership driver

use async_trait::async_trait;
use pager::source::{StateFilter, WatchResponse};
use pager::{
    EngineOptions, HealthRecord, MembershipSource, MemoryLock, PagerError, UserEvent, WatchEngine,
};
use pager_server::{Driver, DriverState};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// Source with nothing to report; health queries can be made to fail
#[derive(Default)]
struct QuietSource {
    failing: AtomicBool,
}

#[async_trait]
impl MembershipSource for QuietSource {
    async fn watch_health(
        &self,
        _filter: StateFilter,
        wait: Duration,
        since: u64,
    ) -> pager::Result<WatchResponse<HealthRecord>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PagerError::source("health", "agent restarting"));
        }
        tokio::time::sleep(wait).await;
        Ok(WatchResponse::new(Vec::new(), since))
    }

    async fn watch_events(
        &self,
        wait: Duration,
        since: u64,
    ) -> pager::Result<WatchResponse<UserEvent>> {
        tokio::time::sleep(wait).await;
        Ok(WatchResponse::new(Vec::new(), since))
    }
}

fn engine(lock: MemoryLock, source: Arc<QuietSource>) -> Arc<WatchEngine> {
    let options = EngineOptions::default().with_wait_timeout(Duration::from_secs(1));
    Arc::new(WatchEngine::new(Arc::new(lock), source, options, None))
}

#[tokio::test(start_paused = true)]
async fn test_first_tick_takes_leadership() {
    let engine = engine(MemoryLock::new(), Arc::new(QuietSource::default()));
    let mut driver = Driver::new(engine.clone(), Duration::from_secs(10));
    assert_eq!(driver.state(), DriverState::Idle);

    assert_eq!(driver.tick().await, DriverState::Leading);
    assert!(engine.is_leader().await);
    assert!(engine.is_watching());

    // Nothing to do on a healthy tick
    assert_eq!(driver.tick().await, DriverState::Leading);
    assert_eq!(engine.term(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_standby_takes_over_after_leader_stops() {
    let source = Arc::new(QuietSource::default());
    let lock = MemoryLock::new();
    let leader = engine(lock.clone(), source.clone());
    let standby = engine(lock.contender(), source);

    let mut leader_driver = Driver::new(leader.clone(), Duration::from_secs(10));
    let mut standby_driver = Driver::new(standby.clone(), Duration::from_secs(10));

    assert_eq!(leader_driver.tick().await, DriverState::Leading);
    assert_eq!(standby_driver.tick().await, DriverState::Idle);

    leader.stop().await.unwrap();
    assert_eq!(standby_driver.tick().await, DriverState::Leading);
    assert_eq!(leader_driver.tick().await, DriverState::Idle);
    assert!(standby.is_leader().await);
}

#[tokio::test(start_paused = true)]
async fn test_dead_watch_loop_is_restarted() {
    let source = Arc::new(QuietSource::default());
    let engine = engine(MemoryLock::new(), source.clone());
    let mut driver = Driver::new(engine.clone(), Duration::from_secs(10));

    driver.tick().await;
    source.failing.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!engine.is_watching());

    source.failing.store(false, Ordering::SeqCst);
    assert_eq!(driver.tick().await, DriverState::Leading);
    assert!(engine.is_watching());
    assert_eq!(engine.term(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_and_destroys() {
    let engine = engine(MemoryLock::new(), Arc::new(QuietSource::default()));
    let driver = Driver::new(engine.clone(), Duration::from_secs(10));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(driver.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.is_leader().await);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
    assert!(engine.is_stopped().await);
    assert!(!engine.is_leader().await);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_ticks_retry_acquisition() {
    let source = Arc::new(QuietSource::default());
    let lock = MemoryLock::new();
    let holder = engine(lock.clone(), source.clone());
    let waiting = engine(lock.contender(), source);

    holder.run().await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Driver::new(waiting.clone(), Duration::from_secs(10)).run(shutdown_rx));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!waiting.is_leader().await);

    holder.stop().await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(waiting.is_leader().await);

    drop(shutdown_tx);
    handle.await.unwrap().unwrap();
}
