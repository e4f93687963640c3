//! Per-key debouncer
//!
//! `schedule(key, value, callback)` (re)starts the key's timer; the latest
//! value and callback win. When the timer fires the key is removed from the
//! pending table and the callback runs with the surviving value. The
//! debouncer never blocks the caller; callbacks run on spawned tasks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type DebounceCallback<V> = Box<dyn FnOnce(V) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

struct Pending<V> {
    value: V,
    callback: DebounceCallback<V>,
    generation: u64,
    timer: JoinHandle<()>,
}

struct DebounceState<V> {
    pending: HashMap<String, Pending<V>>,
    next_generation: u64,
}

/// Keyed trailing-edge debouncer.
pub struct Debouncer<V> {
    delay: Duration,
    state: Arc<Mutex<DebounceState<V>>>,
}

impl<V: Send + 'static> Debouncer<V> {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            state: Arc::new(Mutex::new(DebounceState {
                pending: HashMap::new(),
                next_generation: 0,
            })),
        }
    }

    /// (Re)start the timer for `key`. Replaces any pending value and
    /// callback for the same key.
    pub fn schedule<F, Fut>(&self, key: impl Into<String>, value: V, callback: F)
    where
        F: FnOnce(V) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let key = key.into();
        let mut state = lock(&self.state);
        state.next_generation += 1;
        let generation = state.next_generation;

        if let Some(previous) = state.pending.remove(&key) {
            previous.timer.abort();
        }

        let timer = tokio::spawn(fire_after(
            Arc::clone(&self.state),
            key.clone(),
            generation,
            self.delay,
        ));

        state.pending.insert(
            key,
            Pending {
                value,
                callback: Box::new(move |value| -> BoxFuture<'static, anyhow::Result<()>> {
                    Box::pin(callback(value))
                }),
                generation,
                timer,
            },
        );
    }

    /// Drop a pending key without firing. Idempotent.
    pub fn cancel(&self, key: &str) {
        if let Some(pending) = lock(&self.state).pending.remove(key) {
            pending.timer.abort();
            debug!(key, "Debounce cancelled");
        }
    }

    /// Drop every pending key without firing.
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        for (_, pending) in state.pending.drain() {
            pending.timer.abort();
        }
    }

    /// Number of distinct keys with an active timer.
    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }
}

async fn fire_after<V: Send + 'static>(
    state: Arc<Mutex<DebounceState<V>>>,
    key: String,
    generation: u64,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;

    let fired = {
        let mut state = lock(&state);
        match state.pending.get(&key) {
            Some(pending) if pending.generation == generation => state.pending.remove(&key),
            // A newer schedule replaced this timer between sleep and lock.
            _ => None,
        }
    };

    if let Some(pending) = fired {
        if let Err(error) = (pending.callback)(pending.value).await {
            warn!(key = %key, error = %error, "Debounce callback failed");
        }
    }
}

fn lock<V>(state: &Arc<Mutex<DebounceState<V>>>) -> std::sync::MutexGuard<'_, DebounceState<V>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
