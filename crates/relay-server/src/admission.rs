//! Bounded, FIFO admission control for generations.
//!
//! At most `max_concurrent` generations hold a slot at once. Callers beyond
//! that wait in a first-come-first-served list of at most `max_queue_size`
//! entries, each for at most `queue_timeout`. A released slot is handed
//! straight to the head of the list under the same lock, so the active
//! count never dips while someone is waiting.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use relay_types::QueueStats;

/// Default number of generations allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Default number of callers allowed to wait for a slot.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 50;

/// Default time a caller may wait for a slot (60 seconds).
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(60);

// ─────────────────────────────────────────────────────────────────────────────
// Configuration & Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Admission queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Slots available to generations.
    pub max_concurrent: usize,
    /// Waiting-list capacity.
    pub max_queue_size: usize,
    /// How long a queued caller waits before giving up.
    pub queue_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
        }
    }
}

impl QueueConfig {
    /// Create a config with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency limit.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the waiting-list capacity.
    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    /// Set the queue timeout.
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }
}

/// Why a caller was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The waiting list is at capacity.
    #[error("Queue is full (max {max_queue_size} waiting requests)")]
    Full { max_queue_size: usize },

    /// No slot freed up in time.
    #[error("Timed out after {}ms waiting for a generation slot", timeout.as_millis())]
    Timeout { timeout: Duration },

    /// The queue was drained while the caller waited.
    #[error("Queue drained while waiting for a generation slot")]
    Drained,
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue State
// ─────────────────────────────────────────────────────────────────────────────

/// A caller waiting for a slot.
struct Waiter {
    id: u64,
    enqueued_at: Instant,
    grant: oneshot::Sender<()>,
}

struct QueueState {
    active: usize,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
}

struct QueueInner {
    state: Mutex<QueueState>,
    config: QueueConfig,
}

impl QueueInner {
    /// Free one slot, handing it to the longest waiter that is still there.
    fn release(&self) {
        let mut state = self.state.lock();

        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.grant.send(()).is_ok() {
                debug!(
                    waited_ms = waiter.enqueued_at.elapsed().as_millis() as u64,
                    active = state.active,
                    queued = state.waiters.len(),
                    "Slot handed to queued request"
                );
                return;
            }
        }

        state.active = state.active.saturating_sub(1);
        trace!(active = state.active, "Slot released");
    }

    /// Remove a waiter by id. Returns `false` if it already left the list.
    fn remove_waiter(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        match state.waiters.iter().position(|w| w.id == id) {
            Some(index) => {
                state.waiters.remove(index);
                true
            }
            None => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Admission Queue
// ─────────────────────────────────────────────────────────────────────────────

/// Concurrency gate for generations.
///
/// Cheap to clone; clones share the same slots.
#[derive(Clone)]
pub struct AdmissionQueue {
    inner: Arc<QueueInner>,
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl AdmissionQueue {
    /// Create a queue with the given limits.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    active: 0,
                    waiters: VecDeque::new(),
                    next_waiter_id: 0,
                }),
                config,
            }),
        }
    }

    /// Get the queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Wait for a generation slot.
    ///
    /// Returns immediately while slots are free. Otherwise joins the tail of
    /// the waiting list and resolves once every earlier waiter was served, or
    /// fails with [`QueueError::Timeout`] after `queue_timeout`. Fails at once
    /// with [`QueueError::Full`] if the list is at capacity.
    ///
    /// Dropping the returned future while queued gives up the place in line.
    pub async fn acquire(&self) -> Result<AdmissionPermit, QueueError> {
        let config = &self.inner.config;

        let (id, receiver) = {
            let mut state = self.inner.state.lock();

            if state.active < config.max_concurrent {
                state.active += 1;
                trace!(active = state.active, "Slot granted immediately");
                return Ok(self.permit());
            }

            if state.waiters.len() >= config.max_queue_size {
                warn!(
                    active = state.active,
                    queued = state.waiters.len(),
                    max_queue_size = config.max_queue_size,
                    "Admission queue full, rejecting request"
                );
                return Err(QueueError::Full {
                    max_queue_size: config.max_queue_size,
                });
            }

            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            let (grant, receiver) = oneshot::channel();
            state.waiters.push_back(Waiter {
                id,
                enqueued_at: Instant::now(),
                grant,
            });
            debug!(
                active = state.active,
                queued = state.waiters.len(),
                "Request queued for a generation slot"
            );
            (id, receiver)
        };

        let mut pending = PendingWaiter {
            inner: &self.inner,
            id,
            receiver,
            settled: false,
        };

        let outcome = match tokio::time::timeout(config.queue_timeout, &mut pending.receiver).await
        {
            Ok(Ok(())) => Ok(self.permit()),
            Ok(Err(_)) => Err(QueueError::Drained),
            Err(_) if self.inner.remove_waiter(id) => {
                warn!(
                    timeout_ms = config.queue_timeout.as_millis() as u64,
                    "Queued request timed out"
                );
                Err(QueueError::Timeout {
                    timeout: config.queue_timeout,
                })
            }
            // The timer fired after the waiter left the list: either a slot was
            // handed over or the queue was drained in between.
            Err(_) => match pending.receiver.try_recv() {
                Ok(()) => Ok(self.permit()),
                Err(_) => Err(QueueError::Drained),
            },
        };

        pending.settled = true;
        outcome
    }

    /// Current occupancy.
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        let config = &self.inner.config;
        QueueStats {
            active: state.active,
            queued: state.waiters.len(),
            max_concurrent: config.max_concurrent,
            max_queue_size: config.max_queue_size,
            available: config.max_concurrent.saturating_sub(state.active),
        }
    }

    /// Fail every queued caller with [`QueueError::Drained`].
    ///
    /// Active slots are untouched. Returns the number of callers drained.
    pub fn drain(&self) -> usize {
        let drained: Vec<Waiter> = self.inner.state.lock().waiters.drain(..).collect();
        let count = drained.len();
        drop(drained);

        if count > 0 {
            info!(count, "Drained admission queue");
        }
        count
    }

    fn permit(&self) -> AdmissionPermit {
        AdmissionPermit {
            inner: Some(Arc::clone(&self.inner)),
        }
    }
}

/// Cleans up a queued `acquire` that is dropped before it settles.
struct PendingWaiter<'a> {
    inner: &'a Arc<QueueInner>,
    id: u64,
    receiver: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for PendingWaiter<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if self.inner.remove_waiter(self.id) {
            debug!("Queued request abandoned");
            return;
        }
        // Already granted a slot nobody is going to use.
        if self.receiver.try_recv().is_ok() {
            self.inner.release();
        }
    }
}

/// A held generation slot. The slot is released exactly once, when the
/// permit is dropped or [`AdmissionPermit::release`] is called.
#[must_use = "dropping the permit releases the slot immediately"]
pub struct AdmissionPermit {
    inner: Option<Arc<QueueInner>>,
}

impl AdmissionPermit {
    /// Release the slot now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release();
        }
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").finish_non_exhaustive()
    }
}
