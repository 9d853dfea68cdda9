//! Work queue with per-item single flight.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
struct QueueState {
    /// Items ready to be handed out, in order.
    queue: VecDeque<String>,
    /// Items that need processing. Each appears at most once in `queue`.
    dirty: HashSet<String>,
    /// Items currently held by a worker.
    processing: HashSet<String>,
    /// Deadline of the one pending delayed add per item.
    waiting: HashMap<String, Instant>,
    shutting_down: bool,
}

/// A deduplicating queue of object names.
///
/// An item is never handed to two workers at once. Adding an item while it
/// is being processed marks it dirty, and it is queued again once the
/// worker calls [`WorkQueue::done`].
///
/// Each item has at most one pending delayed add. A later delay never
/// replaces an earlier one, and adding or handing out the item cancels it.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, item: &str) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        state.waiting.remove(item);
        if !state.dirty.insert(item.to_string()) {
            return;
        }
        if state.processing.contains(item) {
            return;
        }
        state.queue.push_back(item.to_string());
        drop(state);
        self.notify.notify_one();
    }

    /// Add `item` once `delay` has passed, unless it is already due sooner.
    pub fn add_after(self: &Arc<Self>, item: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let deadline = Instant::now() + delay;
        {
            let mut state = self.lock();
            if state.shutting_down
                || state
                    .waiting
                    .get(item)
                    .is_some_and(|pending| *pending <= deadline)
            {
                return;
            }
            state.waiting.insert(item.to_string(), deadline);
        }

        let queue = Arc::clone(self);
        let item = item.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            queue.fire(&item, deadline);
        });
    }

    /// Add `item` if the timer for `deadline` is still the pending one.
    fn fire(&self, item: &str, deadline: Instant) {
        {
            let mut state = self.lock();
            if state.waiting.get(item) != Some(&deadline) {
                return;
            }
            state.waiting.remove(item);
        }
        self.add(item);
    }

    /// Wait for the next item. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.waiting.remove(&item);
                    state.processing.insert(item.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Release an item handed out by [`WorkQueue::get`].
    pub fn done(&self, item: &str) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out items and wake every waiting worker.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shutting_down = true;
        state.waiting.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    /// Items waiting to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_processing(&self, item: &str) -> bool {
        self.lock().processing.contains(item)
    }

    /// Whether a delayed add is pending for `item`.
    pub fn is_waiting(&self, item: &str) -> bool {
        self.lock().waiting.contains_key(item)
    }
}
