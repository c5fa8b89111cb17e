//! Per-run event buffer with sliding-window eviction and TTL expiry.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::{BufferConfig, MIN_CLEANUP_INTERVAL};
use crate::event::{BufferedEvent, format_event_id, parse_event_id};

/// Event history for one run.
struct RunBuffer {
    /// Stored events in sequence order, oldest first.
    events: VecDeque<BufferedEvent>,

    /// Sequence number the next stored event receives.
    next_sequence: u64,

    /// When the run was first stored.
    created_at: Instant,

    /// Last store or completion.
    last_activity: Instant,

    /// Whether the run reached a terminal state.
    completed: bool,

    /// Wakes replays that are following this run.
    notify: Arc<Notify>,
}

impl RunBuffer {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            events: VecDeque::new(),
            next_sequence: 0,
            created_at: now,
            last_activity: now,
            completed: false,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Position of the event with `sequence`, if it is still in the window.
    fn index_of(&self, sequence: u64) -> Option<usize> {
        let first = self.events.front()?.sequence;
        if sequence < first || sequence >= self.next_sequence {
            return None;
        }
        Some((sequence - first) as usize)
    }
}

/// Buffer statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStats {
    /// Runs currently held.
    pub active_runs: usize,
    /// Events held across all runs.
    pub total_events: usize,
}

/// Append-only, bounded, expiring log of stream events keyed by run id.
///
/// Cheap to clone; clones share the same runs. All operations take a short
/// internal lock and never block on I/O.
#[derive(Clone)]
pub struct RunEventBuffer {
    runs: Arc<Mutex<HashMap<String, RunBuffer>>>,
    config: BufferConfig,
}

impl Default for RunEventBuffer {
    fn default() -> Self {
        Self::new(BufferConfig::default())
    }
}

impl RunEventBuffer {
    /// Create an empty buffer.
    pub fn new(config: BufferConfig) -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Get the buffer configuration.
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Append an event to a run, creating the run on first use.
    ///
    /// Returns the assigned event id. If the run already holds
    /// `max_events_per_run` events the oldest one is dropped first.
    pub fn store(&self, run_id: &str, event_type: &str, payload: impl Into<String>) -> String {
        let mut runs = self.runs.lock();
        let run = runs
            .entry(run_id.to_string())
            .or_insert_with(RunBuffer::new);

        while run.events.len() >= self.config.max_events_per_run.max(1) {
            if let Some(evicted) = run.events.pop_front() {
                trace!(run_id = %run_id, event_id = %evicted.id, "Evicted oldest buffered event");
            }
        }

        let sequence = run.next_sequence;
        run.next_sequence += 1;
        let id = format_event_id(run_id, sequence);

        run.events.push_back(BufferedEvent {
            id: id.clone(),
            sequence,
            event_type: event_type.to_string(),
            payload: payload.into(),
            timestamp: Utc::now(),
        });
        run.last_activity = Instant::now();
        run.notify.notify_waiters();

        trace!(run_id = %run_id, event_id = %id, event_type = %event_type, "Stored event");
        id
    }

    /// Events strictly after `last_event_id`, in order.
    ///
    /// An unknown run yields nothing. An id that is no longer (or never was)
    /// in the run's window yields the whole current window, so a client that
    /// fell behind the eviction window still gets everything that is left.
    pub fn get_events_after(&self, run_id: &str, last_event_id: &str) -> Vec<BufferedEvent> {
        let runs = self.runs.lock();
        let Some(run) = runs.get(run_id) else {
            return Vec::new();
        };

        let position = parse_event_id(last_event_id)
            .ok()
            .filter(|(owner, _)| *owner == run_id)
            .and_then(|(_, sequence)| run.index_of(sequence));

        match position {
            Some(index) => run.events.iter().skip(index + 1).cloned().collect(),
            None => {
                debug!(
                    run_id = %run_id,
                    last_event_id = %last_event_id,
                    "Last event id not in buffer window, replaying everything held"
                );
                run.events.iter().cloned().collect()
            }
        }
    }

    /// Snapshot of every event currently held for a run.
    pub fn get_all_events(&self, run_id: &str) -> Vec<BufferedEvent> {
        self.runs
            .lock()
            .get(run_id)
            .map(|run| run.events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Events with a sequence number of at least `sequence`.
    ///
    /// Used to follow a live run without re-reading what was already sent.
    /// Evicted events are skipped silently.
    pub fn events_since(&self, run_id: &str, sequence: u64) -> Vec<BufferedEvent> {
        self.runs
            .lock()
            .get(run_id)
            .map(|run| {
                run.events
                    .iter()
                    .filter(|e| e.sequence >= sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mark a run terminal. Later stores are still accepted.
    ///
    /// Returns `false` if the run is unknown.
    pub fn mark_completed(&self, run_id: &str) -> bool {
        let mut runs = self.runs.lock();
        match runs.get_mut(run_id) {
            Some(run) => {
                run.completed = true;
                run.last_activity = Instant::now();
                run.notify.notify_waiters();
                debug!(run_id = %run_id, events = run.events.len(), "Run marked completed");
                true
            }
            None => false,
        }
    }

    /// Check whether a run is held.
    pub fn has(&self, run_id: &str) -> bool {
        self.runs.lock().contains_key(run_id)
    }

    /// Check whether a run is held and terminal.
    pub fn is_completed(&self, run_id: &str) -> bool {
        self.runs
            .lock()
            .get(run_id)
            .is_some_and(|run| run.completed)
    }

    /// Drop a run. Returns `true` if it existed.
    pub fn remove(&self, run_id: &str) -> bool {
        match self.runs.lock().remove(run_id) {
            Some(run) => {
                run.notify.notify_waiters();
                true
            }
            None => false,
        }
    }

    /// Notification handle that fires on every store, completion and
    /// removal for the run.
    pub fn subscribe(&self, run_id: &str) -> Option<Arc<Notify>> {
        self.runs
            .lock()
            .get(run_id)
            .map(|run| Arc::clone(&run.notify))
    }

    /// Remove every run idle for longer than the TTL.
    ///
    /// Returns the number of runs removed.
    pub fn cleanup_expired(&self) -> usize {
        let ttl = self.config.ttl;
        let now = Instant::now();
        let mut runs = self.runs.lock();

        let before = runs.len();
        runs.retain(|run_id, run| {
            let expired = now.duration_since(run.last_activity) > ttl;
            if expired {
                debug!(
                    run_id = %run_id,
                    age_secs = now.duration_since(run.created_at).as_secs(),
                    "Cleaning up expired run"
                );
                run.notify.notify_waiters();
            }
            !expired
        });
        let removed = before - runs.len();

        if removed > 0 {
            debug!(count = removed, "Cleaned up expired runs");
        }
        removed
    }

    /// Get buffer statistics.
    pub fn stats(&self) -> BufferStats {
        let runs = self.runs.lock();
        BufferStats {
            active_runs: runs.len(),
            total_events: runs.values().map(|run| run.events.len()).sum(),
        }
    }

    /// Run `cleanup_expired` every `cleanup_interval` until `shutdown` fires.
    pub fn spawn_cleanup_task(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let buffer = self.clone();
        let period = self.config.cleanup_interval.max(MIN_CLEANUP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Buffer cleanup task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        buffer.cleanup_expired();
                    }
                }
            }
        })
    }
}
