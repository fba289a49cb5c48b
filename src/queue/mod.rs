// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Rate-limited, deduplicating work queue.
//!
//! A key is never handed to two workers at once. Adding a key that is already
//! queued is a no-op; adding a key that is being processed marks it dirty and
//! it is queued again when the worker calls [`WorkQueue::done`]. A pass that
//! runs after such an add therefore observes state at least as new as the add.
//!
//! [`WorkQueue::shut_down`] is the only cancellation: blocked [`WorkQueue::get`]
//! calls return `None` once the queue has drained.

pub mod backoff;

use backoff::ItemRateLimiter;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    limiter: Mutex<ItemRateLimiter>,
    notify: Notify,
}

/// Cloneable handle to a shared work queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self::with_rate_limiter(name, ItemRateLimiter::default())
    }

    #[must_use]
    pub fn with_rate_limiter(name: &str, limiter: ItemRateLimiter) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                state: Mutex::new(State::default()),
                limiter: Mutex::new(limiter),
                notify: Notify::new(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn limiter(&self) -> MutexGuard<'_, ItemRateLimiter> {
        self.inner
            .limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a key. Idempotent while the key is waiting.
    pub fn add(&self, key: &str) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            trace!(queue = %self.inner.name, key, "Key is being processed, will requeue on done");
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down and empty.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    // Another waiter may be able to take the next key
                    if !state.queue.is_empty() {
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release a key returned by [`WorkQueue::get`].
    pub fn done(&self, key: &str) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Enqueue a key after a delay.
    pub fn add_after(&self, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }

    /// Enqueue a key after its per-key exponential backoff.
    pub fn add_rate_limited(&self, key: &str) {
        let delay = self.limiter().when(key);
        trace!(queue = %self.inner.name, key, delay = ?delay, "Requeue with backoff");
        self.add_after(key, delay);
    }

    /// Reset the failure history of a key.
    pub fn forget(&self, key: &str) {
        self.limiter().forget(key);
    }

    #[must_use]
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.limiter().num_requeues(key)
    }

    /// Stop accepting keys and wake every blocked [`WorkQueue::get`].
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of keys waiting to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
