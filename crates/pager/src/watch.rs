//! Health and user-event watch loops.
//!
//! Each loop long-polls the membership source, handles what came back,
//! advances its cursor, then asks whether it should keep going. Loops never
//! touch the lock's acquisition state; they exit and let the caller decide.

use crate::engine::EngineCore;
use crate::events::EventCache;
use crate::source::{StateFilter, next_index};
use std::sync::Arc;
use tracing::{debug, info};

/// Why a watch loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// The lock reports another holder, or none
    LeadershipLost,
    /// The lock could not be asked; treated as lost
    LeadershipCheckFailed(String),
    /// A newer term launched its own loops
    Superseded,
    /// The membership source returned an error
    SourceFailed(String),
}

impl LoopExit {
    /// Metric label value
    pub fn reason(&self) -> &'static str {
        match self {
            LoopExit::LeadershipLost => "leadership_lost",
            LoopExit::LeadershipCheckFailed(_) => "leadership_check_failed",
            LoopExit::Superseded => "superseded",
            LoopExit::SourceFailed(_) => "source_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchKind {
    Health,
    Events,
}

impl WatchKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            WatchKind::Health => "health",
            WatchKind::Events => "events",
        }
    }
}

/// Launch both loops for `term`. The caller has already registered them.
pub(crate) fn spawn_loops(core: Arc<EngineCore>, term: u64) {
    debug!(term, "Spawning watch loops");
    tokio::spawn(health_loop(core.clone(), term));
    tokio::spawn(events_loop(core, term));
}

async fn health_loop(core: Arc<EngineCore>, term: u64) -> LoopExit {
    let wait = core.options.wait_timeout;
    let mut index = 0;

    let exit = loop {
        let response = match core.source.watch_health(StateFilter::Any, wait, index).await {
            Ok(response) => response,
            Err(e) => break LoopExit::SourceFailed(e.to_string()),
        };

        // A stale loop must not mutate alerts once a newer term owns them
        if core.current_term() != term {
            break LoopExit::Superseded;
        }

        debug!(term, records = response.items.len(), index = response.index, "Health batch");
        core.process_health(&response.items).await;
        index = next_index(index, response.index);

        if let Some(exit) = core.leadership_exit(term).await {
            break exit;
        }
    };

    core.loop_finished(WatchKind::Health, term, &exit);
    exit
}

async fn events_loop(core: Arc<EngineCore>, term: u64) -> LoopExit {
    let wait = core.options.wait_timeout;
    let mut cache = EventCache::new(core.options.event_retention_cycles);
    let mut index = 0;

    let exit = loop {
        let response = match core.source.watch_events(wait, index).await {
            Ok(response) => response,
            Err(e) => break LoopExit::SourceFailed(e.to_string()),
        };

        if core.current_term() != term {
            break LoopExit::Superseded;
        }

        let fresh = cache.observe(response.items);
        for event in &fresh {
            info!(
                term,
                id = %event.id,
                name = %event.name,
                ltime = event.ltime,
                payload = event.payload.as_deref().unwrap_or(""),
                "New user event"
            );
            // No subscribers is fine
            let _ = core.events_tx.send(event.clone());
        }
        if let Some(ref m) = core.metrics {
            m.record_events_observed(fresh.len(), cache.len());
        }
        index = next_index(index, response.index);

        if let Some(exit) = core.leadership_exit(term).await {
            break exit;
        }
    };

    core.loop_finished(WatchKind::Events, term, &exit);
    exit
}
