//! Per-pool bookkeeping
//!
//! All fields of [`PoolState`] are guarded by the pool mutex. Each sequence
//! of updates between two suspension points runs under a single lock
//! acquisition and leaves the state consistent before the lock is released.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::connection::{BackendConnection, ConnectionId};
use crate::waiter::WaiterQueue;

/// Live connection id to owning pool name
pub(crate) type OwnerMap = Mutex<HashMap<ConnectionId, String>>;

/// Point-in-time view of a pool's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Idle connections ready for reuse
    pub spare: usize,
    /// Connections checked out by requesters
    pub busy: usize,
    /// Fetches parked on the wait queue
    pub pending_fetch: usize,
    /// Parked fetches already signalled but not yet served
    pub resume_fetch: usize,
    /// Factory calls in flight
    pub initializing: usize,
    /// Configured total cap
    pub max_conns: usize,
    /// Configured spare threshold
    pub max_spare_conns: usize,
}

impl PoolStatus {
    /// Every connection slot accounted against `max_conns`
    pub fn occupied(&self) -> usize {
        self.spare + self.busy + self.pending_fetch + self.initializing
    }
}

#[derive(Debug, Default)]
pub(crate) struct PoolState {
    /// LIFO: the most recently returned connection is reused first
    pub(crate) spare: Vec<BackendConnection>,
    pub(crate) busy: HashSet<ConnectionId>,
    pub(crate) pending_fetch_count: usize,
    pub(crate) resume_fetch_count: usize,
    pub(crate) initializing_count: usize,
    /// Refreshed on every transition into `busy`
    pub(crate) last_used: HashMap<ConnectionId, Instant>,
    pub(crate) waiters: WaiterQueue,
    pub(crate) shut_down: bool,
}

impl PoolState {
    /// Slots counted against `max_conns`
    pub(crate) fn occupied(&self) -> usize {
        self.busy.len() + self.spare.len() + self.pending_fetch_count + self.initializing_count
    }

    /// A spare may be taken without stealing one reserved for a signalled waiter.
    pub(crate) fn has_unreserved_spare(&self) -> bool {
        !self.spare.is_empty() && self.spare.len() > self.resume_fetch_count
    }

    pub(crate) fn mark_busy(&mut self, id: ConnectionId, now: Instant) {
        self.busy.insert(id);
        self.last_used.insert(id, now);
    }

    /// Drop every trace of `id` from the bookkeeping.
    pub(crate) fn forget(&mut self, id: ConnectionId) {
        self.busy.remove(&id);
        self.last_used.remove(&id);
    }

    /// Whether a healthy connection coming back from `busy` should be closed
    /// instead of pooled.
    pub(crate) fn should_evict(&self, id: ConnectionId, config: &PoolConfig, now: Instant) -> bool {
        if self.spare.len() + self.initializing_count < config.max_spare_conns {
            return false;
        }
        let idle = self
            .last_used
            .get(&id)
            .map(|at| now.saturating_duration_since(*at))
            .unwrap_or(config.max_spare_exp);
        idle >= config.max_spare_exp
    }

    /// Push a healthy connection onto the spare list and hand its id to the
    /// oldest parked fetch, if any. Returns whether a waiter was signalled.
    pub(crate) fn push_spare(&mut self, conn: BackendConnection) -> bool {
        let id = conn.id();
        self.spare.push(conn);
        self.wake_next(id)
    }

    /// Reserve an unreserved spare for the oldest parked fetch and signal it.
    pub(crate) fn wake_next(&mut self, token: ConnectionId) -> bool {
        if self.pending_fetch_count == 0 || self.spare.len() <= self.resume_fetch_count {
            return false;
        }
        self.resume_fetch_count += 1;
        if self.waiters.notify_one(token) {
            true
        } else {
            self.resume_fetch_count -= 1;
            false
        }
    }

    /// Panics if an id sits in both `spare` and `busy`.
    #[cfg(test)]
    pub(crate) fn assert_disjoint(&self) {
        for conn in &self.spare {
            assert!(
                !self.busy.contains(&conn.id()),
                "{} is both spare and busy",
                conn.id()
            );
        }
    }

    pub(crate) fn status(&self, config: &PoolConfig) -> PoolStatus {
        PoolStatus {
            spare: self.spare.len(),
            busy: self.busy.len(),
            pending_fetch: self.pending_fetch_count,
            resume_fetch: self.resume_fetch_count,
            initializing: self.initializing_count,
            max_conns: config.max_conns,
            max_spare_conns: config.max_spare_conns,
        }
    }
}

/// A named pool: immutable configuration plus guarded state
#[derive(Debug)]
pub(crate) struct Pool {
    pub(crate) name: String,
    pub(crate) config: PoolConfig,
    pub(crate) state: Mutex<PoolState>,
}

impl Pool {
    pub(crate) fn new(name: String, config: PoolConfig) -> Self {
        Self {
            name,
            config,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub(crate) fn status(&self) -> PoolStatus {
        self.state.lock().status(&self.config)
    }
}
