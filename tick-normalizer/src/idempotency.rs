use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

/// Remembers which event ids already produced an output, so redeliveries can be dropped.
///
/// Entries expire `ttl` after they were marked. Expiry is evaluated lazily on lookup, and
/// `sweep` reclaims memory for ids that are never looked up again. When more than
/// `max_entries` ids are live, the oldest are evicted first.
///
/// The guard is shared by every partition worker. All state lives behind one mutex and
/// is never handed out, so check-and-mark is atomic.
pub struct IdempotencyGuard {
    ttl: Duration,
    max_entries: usize,
    state: Mutex<GuardState>,
}

#[derive(Default)]
struct GuardState {
    entries: HashMap<String, Instant>,
    // Insertion order. An id can appear more than once if it was re-marked; only the
    // position whose instant matches `entries` is live.
    order: VecDeque<(String, Instant)>,
}

impl GuardState {
    fn is_live(&self, id: &str, ttl: Duration, now: Instant) -> bool {
        self.entries
            .get(id)
            .is_some_and(|marked_at| now.saturating_duration_since(*marked_at) < ttl)
    }

    fn insert(&mut self, id: &str, now: Instant, max_entries: usize) {
        self.entries.insert(id.to_string(), now);
        self.order.push_back((id.to_string(), now));

        while self.entries.len() > max_entries {
            let Some((oldest, marked_at)) = self.order.pop_front() else {
                break;
            };
            if self.entries.get(&oldest) == Some(&marked_at) {
                self.entries.remove(&oldest);
            }
        }

        // Re-marks leave stale positions behind; don't let them pile up
        if self.order.len() > self.entries.len().saturating_mul(2).max(64) {
            let entries = &self.entries;
            self.order
                .retain(|(id, marked_at)| entries.get(id) == Some(marked_at));
        }
    }
}

impl IdempotencyGuard {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            state: Mutex::new(GuardState::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True iff the id was marked less than `ttl` ago.
    pub fn seen(&self, id: &str) -> bool {
        self.seen_at(id, Instant::now())
    }

    /// Record the id as processed now, refreshing any existing entry.
    pub fn mark(&self, id: &str) {
        self.mark_at(id, Instant::now())
    }

    /// Mark the id unless a live entry exists. Returns true if this call marked it.
    pub fn try_mark(&self, id: &str) -> bool {
        self.try_mark_at(id, Instant::now())
    }

    /// Drop the entry for an id, so its next delivery is processed again.
    pub fn forget(&self, id: &str) {
        let mut state = self.lock();
        state.entries.remove(id);
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn seen_at(&self, id: &str, now: Instant) -> bool {
        let mut state = self.lock();
        if state.is_live(id, self.ttl, now) {
            return true;
        }
        // Lazily drop the expired entry, its queue position is cleaned up later
        state.entries.remove(id);
        false
    }

    fn mark_at(&self, id: &str, now: Instant) {
        let mut state = self.lock();
        state.insert(id, now, self.max_entries);
    }

    fn try_mark_at(&self, id: &str, now: Instant) -> bool {
        let mut state = self.lock();
        if state.is_live(id, self.ttl, now) {
            return false;
        }
        state.insert(id, now, self.max_entries);
        true
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        let ttl = self.ttl;

        state
            .entries
            .retain(|_, marked_at| now.saturating_duration_since(*marked_at) < ttl);
        let GuardState { entries, order } = &mut *state;
        order.retain(|(id, marked_at)| entries.get(id) == Some(marked_at));

        let removed = before - state.entries.len();
        if removed > 0 {
            debug!(removed, remaining = state.entries.len(), "swept idempotency guard");
        }
        removed
    }

    // A panic while holding the lock can't leave the maps half-updated in a way that
    // matters here, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
