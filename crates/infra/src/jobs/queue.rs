//! Priority run queue shared by the worker pool.
//!
//! One FIFO lane per priority class. Entries may carry a `ready_at` instant
//! (retry backoff); a lane yields its oldest *ready* entry, so a job waiting
//! out its backoff never blocks the jobs queued behind it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use animforge_core::JobId;

use super::types::Priority;

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: JobId,
    ready_at: Instant,
}

#[derive(Debug, Default)]
struct Lanes {
    lanes: BTreeMap<Priority, VecDeque<Entry>>,
    closed: bool,
}

impl Lanes {
    fn take_ready(&mut self, now: Instant) -> Option<JobId> {
        for lane in self.lanes.values_mut().rev() {
            if let Some(pos) = lane.iter().position(|e| e.ready_at <= now) {
                return lane.remove(pos).map(|e| e.id);
            }
        }
        None
    }

    fn next_ready_at(&self) -> Option<Instant> {
        self.lanes.values().flatten().map(|e| e.ready_at).min()
    }

    fn len(&self) -> usize {
        self.lanes.values().map(VecDeque::len).sum()
    }
}

/// Outcome of [`JobQueue::pop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop {
    Job(JobId),
    /// Nothing became ready within the wait budget.
    Idle,
    Closed,
}

#[derive(Debug, Default)]
pub struct JobQueue {
    state: Mutex<Lanes>,
    ready: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue at the back of `priority`'s lane. Returns `false` once closed.
    pub fn push(&self, id: JobId, priority: Priority, ready_at: Instant) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return false;
        }
        state
            .lanes
            .entry(priority)
            .or_default()
            .push_back(Entry { id, ready_at });
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Block up to `wait` for the next ready job, highest priority first.
    pub fn pop(&self, wait: Duration) -> Pop {
        let deadline = Instant::now() + wait;
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Pop::Closed;
            }
            let now = Instant::now();
            if let Some(id) = state.take_ready(now) {
                return Pop::Job(id);
            }
            if now >= deadline {
                return Pop::Idle;
            }
            let wake = state
                .next_ready_at()
                .map_or(deadline, |at| at.min(deadline));
            let timeout = wake.saturating_duration_since(now);
            state = self.ready.wait_timeout(state, timeout).unwrap().0;
        }
    }

    /// Drop a queued entry (cancellation). Returns whether it was present.
    pub fn remove(&self, id: JobId) -> bool {
        let mut state = self.state.lock().unwrap();
        for lane in state.lanes.values_mut() {
            if let Some(pos) = lane.iter().position(|e| e.id == id) {
                lane.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting work and wake every waiting worker.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.ready.notify_all();
    }
}
