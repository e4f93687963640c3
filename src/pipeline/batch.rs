//! Throttled batcher
//!
//! Items accumulate in a FIFO queue; deliveries take up to `max_batch_size`
//! items from the head, spaced at least `min_delay_ms` apart. The first
//! delivery is immediate by design — there is no prior delivery to space
//! against. At most one delivery schedule is in flight at a time.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::warn;

type BatchSink<T> = Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct BatchState<T> {
    queue: VecDeque<T>,
    last_delivery: Option<Instant>,
    scheduled: bool,
    /// Bumped by `clear()`; an in-flight schedule from an older epoch exits
    /// without delivering.
    epoch: u64,
}

/// FIFO batcher with a minimum spacing between deliveries.
pub struct Batcher<T> {
    min_delay: Duration,
    max_batch_size: usize,
    state: Arc<Mutex<BatchState<T>>>,
    sink: BatchSink<T>,
}

impl<T: Send + 'static> Batcher<T> {
    /// `sink` receives every delivered batch. A failing sink is logged;
    /// items still queued are delivered on the next tick.
    pub fn new<F, Fut>(min_delay_ms: u64, max_batch_size: usize, sink: F) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            min_delay: Duration::from_millis(min_delay_ms),
            max_batch_size: max_batch_size.max(1),
            state: Arc::new(Mutex::new(BatchState {
                queue: VecDeque::new(),
                last_delivery: None,
                scheduled: false,
                epoch: 0,
            })),
            sink: Arc::new(move |batch| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(sink(batch))
            }),
        }
    }

    /// Append an item and ensure a delivery is scheduled.
    pub fn add(&self, item: T) {
        let mut state = lock(&self.state);
        state.queue.push_back(item);
        if !state.scheduled {
            state.scheduled = true;
            let epoch = state.epoch;
            tokio::spawn(run_deliveries(
                Arc::clone(&self.state),
                Arc::clone(&self.sink),
                self.min_delay,
                self.max_batch_size,
                epoch,
            ));
        }
    }

    /// Number of items waiting for delivery.
    pub fn queue_len(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Drop queued items and cancel the pending delivery schedule.
    /// A delivery already handed to the sink completes.
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.queue.clear();
        state.scheduled = false;
        state.epoch += 1;
    }
}

async fn run_deliveries<T: Send + 'static>(
    state: Arc<Mutex<BatchState<T>>>,
    sink: BatchSink<T>,
    min_delay: Duration,
    max_batch_size: usize,
    epoch: u64,
) {
    loop {
        let delay = {
            let state = lock(&state);
            if state.epoch != epoch {
                return;
            }
            match state.last_delivery {
                None => Duration::ZERO,
                Some(last) => (last + min_delay).saturating_duration_since(Instant::now()),
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let batch = {
            let mut state = lock(&state);
            if state.epoch != epoch {
                return;
            }
            if state.queue.is_empty() {
                state.scheduled = false;
                return;
            }
            let take = state.queue.len().min(max_batch_size);
            state.last_delivery = Some(Instant::now());
            state.queue.drain(..take).collect::<Vec<T>>()
        };

        if let Err(error) = sink(batch).await {
            warn!(error = %error, "Batch sink failed — remaining items stay queued");
        }

        let mut state_guard = lock(&state);
        if state_guard.epoch != epoch {
            return;
        }
        if state_guard.queue.is_empty() {
            state_guard.scheduled = false;
            return;
        }
        drop(state_guard);
        // Queue still non-empty: loop around and space the next delivery.
    }
}

fn lock<T>(state: &Arc<Mutex<BatchState<T>>>) -> std::sync::MutexGuard<'_, BatchState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
