//! Rate-limited work queue with single-flight per key.
//!
//! A key is handed to at most one worker at a time. Adding a key that is being processed marks it
//! dirty; it becomes available again once the worker calls [`WorkQueue::done`]. Adding a key that
//! is already waiting is a no-op, so bursts of change notifications collapse into one pass.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use jenkins_provider_core::ResourceKey;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::backoff::BackoffPolicy;

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<ResourceKey>,
    dirty: HashSet<ResourceKey>,
    processing: HashSet<ResourceKey>,
    delayed: BinaryHeap<Reverse<(Instant, ResourceKey)>>,
    waiting: HashMap<ResourceKey, Instant>,
    retries: HashMap<ResourceKey, u32>,
    shut_down: bool,
}

impl QueueState {
    fn enqueue(&mut self, key: ResourceKey) -> bool {
        if self.shut_down || !self.dirty.insert(key.clone()) {
            return false;
        }
        if self.processing.contains(&key) {
            return false;
        }
        self.ready.push_back(key);
        true
    }

    /// Move due delayed keys to the ready list. Returns how many became ready.
    fn promote_due(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        while let Some(Reverse((at, _))) = self.delayed.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((at, key))) = self.delayed.pop() else {
                break;
            };
            // stale heap entry: superseded by an earlier add_after
            if self.waiting.get(&key) != Some(&at) {
                continue;
            }
            self.waiting.remove(&key);
            if self.enqueue(key) {
                promoted += 1;
            }
        }
        promoted
    }

    fn next_wake(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse((at, _))| *at)
    }
}

#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: BackoffPolicy,
}

impl WorkQueue {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
        }
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Make a key available now
    pub fn add(&self, key: ResourceKey) {
        if self.lock().enqueue(key) {
            self.notify.notify_one();
        }
    }

    /// Make a key available after `delay`. An earlier pending deadline for the same key wins.
    pub fn add_after(&self, key: ResourceKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let at = Instant::now() + delay;
        let mut state = self.lock();
        if state.shut_down {
            return;
        }
        if state.waiting.get(&key).is_some_and(|existing| *existing <= at) {
            return;
        }
        state.waiting.insert(key.clone(), at);
        state.delayed.push(Reverse((at, key)));
        drop(state);
        // waiters must recompute their wake-up time
        self.notify.notify_waiters();
    }

    /// Requeue after the backoff delay for one more failure; returns the delay used
    pub fn add_rate_limited(&self, key: ResourceKey) -> Duration {
        let failures = {
            let mut state = self.lock();
            let retries = state.retries.entry(key.clone()).or_default();
            *retries = retries.saturating_add(1);
            *retries
        };
        let delay = self.backoff.delay(failures);
        self.add_after(key, delay);
        delay
    }

    /// Requeue at the capped interval
    pub fn add_capped(&self, key: ResourceKey) -> Duration {
        let delay = self.backoff.capped();
        self.add_after(key, delay);
        delay
    }

    /// Reset the failure count of a key
    pub fn forget(&self, key: &ResourceKey) {
        self.lock().retries.remove(key);
    }

    pub fn retries(&self, key: &ResourceKey) -> u32 {
        self.lock().retries.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next available key. Returns `None` once the queue is shut down.
    pub async fn next(&self) -> Option<ResourceKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.lock();
                if state.shut_down {
                    return None;
                }
                state.promote_due(Instant::now());
                if let Some(key) = state.ready.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.ready.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                state.next_wake()
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Mark a pass finished. A key added while it was processing becomes available again.
    pub fn done(&self, key: &ResourceKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shut_down {
            state.ready.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shutdown(&self) {
        self.lock().shut_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Keys ready to be handed out
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys waiting for their requeue delay
    pub fn delayed_len(&self) -> usize {
        self.lock().waiting.len()
    }

    pub fn is_processing(&self, key: &ResourceKey) -> bool {
        self.lock().processing.contains(key)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
