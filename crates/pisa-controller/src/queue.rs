//! Deduplicating work queue
//!
//! A key is held at most once in the queue and handed to at most one worker
//! at a time. Adding a key that is being processed marks it dirty; it is
//! queued again when the worker calls [`WorkQueue::done`].
//!
//! Delayed adds are merged per key: only the earliest pending ready time is
//! kept, so a key never has more than one live timer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-key exponential backoff: `base * 2^attempt`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            max_ms: max.as_millis() as u64,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_ms.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(exponential.min(self.max_ms))
    }
}

#[derive(Debug)]
struct QueueState<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be processed, queued or not
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    /// Ready time of the one pending delayed add per key
    waiting: HashMap<K, Instant>,
    shutting_down: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            failures: HashMap::new(),
            waiting: HashMap::new(),
            shutting_down: false,
        }
    }
}

impl<K> QueueState<K> {
    fn record_depth(&self) {
        metrics::gauge!("pisa_workqueue_depth").set(self.queue.len() as f64);
    }
}

#[derive(Debug)]
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    backoff: Backoff,
    closed: CancellationToken,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(backoff: Backoff) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
            closed: CancellationToken::new(),
        })
    }

    /// Queue `key` unless it is already waiting
    pub async fn add(&self, key: K) {
        let mut state = self.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }

        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }

        state.queue.push_back(key);
        state.record_depth();
        drop(state);
        self.notify.notify_one();
    }

    /// Queue `key` once `delay` has elapsed. A no-op when the key already
    /// waits for the same or an earlier time; otherwise this time replaces
    /// the pending one.
    pub async fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        let ready_at = Instant::now() + delay;
        {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return;
            }
            if matches!(state.waiting.get(&key), Some(pending) if *pending <= ready_at) {
                return;
            }
            state.waiting.insert(key.clone(), ready_at);
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.closed.cancelled() => {}
                _ = tokio::time::sleep_until(ready_at) => queue.fire(key, ready_at).await,
            }
        });
    }

    /// Timer expiry; ignored when a newer timer superseded this one
    async fn fire(&self, key: K, ready_at: Instant) {
        {
            let mut state = self.state.lock().await;
            if state.waiting.get(&key) != Some(&ready_at) {
                return;
            }
            state.waiting.remove(&key);
        }
        self.add(key).await;
    }

    /// Number of keys with a pending delayed add
    pub async fn num_waiting(&self) -> usize {
        self.state.lock().await.waiting.len()
    }

    /// Queue `key` after its backoff delay and count one more failure
    pub async fn add_rate_limited(self: &Arc<Self>, key: K) -> Duration {
        let attempt = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let attempt = *failures;
            *failures = failures.saturating_add(1);
            attempt
        };

        let delay = self.backoff.delay(attempt);
        self.add_after(key, delay).await;
        delay
    }

    /// Reset the failure count of `key`
    pub async fn forget(&self, key: &K) {
        self.state.lock().await.failures.remove(key);
    }

    pub async fn num_requeues(&self, key: &K) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    state.record_depth();
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark `key` as processed
    pub async fn done(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);

        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            state.record_depth();
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Drop queued keys, stop accepting new ones and wake every waiting worker
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shutting_down = true;
        state.queue.clear();
        state.dirty.clear();
        state.waiting.clear();
        state.record_depth();
        drop(state);

        self.closed.cancel();
        self.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.state.lock().await.shutting_down
    }

    /// Number of keys waiting to be handed out
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
