//! Signal Bus — typed pub/sub with sequential per-emission dispatch
//!
//! Dispatch contract:
//! - `emit` snapshots the handler list for the signal's kind at emission
//!   start, then awaits each handler in subscription order.
//! - A failing handler never stops the remaining handlers and never
//!   propagates to the emitter; failures go to the optional error hook.
//! - Handlers subscribed during a dispatch run from the next emission on;
//!   handlers that unsubscribe themselves still let the rest of the
//!   snapshot run.
//!
//! Duplicate subscription of the same handler registers twice (FIFO);
//! one unsubscribe removes exactly one registration.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::types::{Signal, SignalKind};

/// Boxed handler future.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A subscribed handler. Receives a shared reference to the signal.
pub type SignalHandler = Arc<dyn Fn(Arc<Signal>) -> HandlerFuture + Send + Sync>;

/// Hook invoked with every handler failure: `(kind, snapshot_index, error)`.
pub type ErrorHook = Arc<dyn Fn(SignalKind, usize, &anyhow::Error) + Send + Sync>;

struct Registration {
    id: u64,
    handler: SignalHandler,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    handlers: HashMap<SignalKind, Vec<Registration>>,
    emissions: u64,
    handler_errors: u64,
}

/// Typed pub/sub bus. Cheap to share behind an `Arc`.
pub struct SignalBus {
    state: Arc<Mutex<BusState>>,
    on_error: Option<ErrorHook>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            on_error: None,
        }
    }

    /// Bus with an error hook that observes every handler failure.
    pub fn with_error_hook<F>(hook: F) -> Self
    where
        F: Fn(SignalKind, usize, &anyhow::Error) + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            on_error: Some(Arc::new(hook)),
        }
    }

    /// Register `handler` for signals of `kind`. Duplicate subscriptions
    /// register independently.
    pub fn subscribe<F, Fut>(&self, kind: SignalKind, handler: F) -> Subscription
    where
        F: Fn(Arc<Signal>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: SignalHandler =
            Arc::new(move |signal| -> HandlerFuture { Box::pin(handler(signal)) });
        let mut state = self.lock_state();
        state.next_id += 1;
        let id = state.next_id;
        state
            .handlers
            .entry(kind)
            .or_default()
            .push(Registration { id, handler });
        debug!(kind = %kind, registration = id, "Handler subscribed");
        Subscription {
            state: Arc::downgrade(&self.state),
            kind,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Synonym for [`subscribe`](Self::subscribe).
    pub fn on<F, Fut>(&self, kind: SignalKind, handler: F) -> Subscription
    where
        F: Fn(Arc<Signal>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe(kind, handler)
    }

    /// Dispatch `signal` to every handler registered for its kind at the
    /// moment the call starts. Completes when all handlers have finished.
    pub async fn emit(&self, signal: Signal) {
        let signal = Arc::new(signal);
        let kind = signal.kind();
        let snapshot: Vec<SignalHandler> = {
            let mut state = self.lock_state();
            state.emissions += 1;
            state
                .handlers
                .get(&kind)
                .map(|regs| regs.iter().map(|r| Arc::clone(&r.handler)).collect())
                .unwrap_or_default()
        };

        debug!(kind = %kind, id = %signal.id, handlers = snapshot.len(), "Emitting signal");

        for (index, handler) in snapshot.iter().enumerate() {
            if let Err(error) = handler(Arc::clone(&signal)).await {
                self.lock_state().handler_errors += 1;
                warn!(
                    kind = %kind,
                    index,
                    error = %error,
                    "Signal handler failed — continuing with remaining handlers"
                );
                if let Some(hook) = &self.on_error {
                    hook(kind, index, &error);
                }
            }
        }
    }

    /// Remove every subscription.
    pub fn clear(&self) {
        self.lock_state().handlers.clear();
    }

    /// Number of live registrations for a kind.
    pub fn subscriber_count(&self, kind: SignalKind) -> usize {
        self.lock_state()
            .handlers
            .get(&kind)
            .map_or(0, Vec::len)
    }

    pub fn stats(&self) -> BusStats {
        let state = self.lock_state();
        BusStats {
            emissions: state.emissions,
            handler_errors: state.handler_errors,
            registrations: state.handlers.values().map(Vec::len).sum(),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BusState> {
        // Never held across an await; a poisoned lock just means a panicking
        // test handler, so take the state as-is.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned from `subscribe`. Unsubscribing is idempotent and removes
/// exactly one registration; dropping the handle leaves the subscription
/// alive.
pub struct Subscription {
    state: Weak<Mutex<BusState>>,
    kind: SignalKind,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(state) = self.state.upgrade() {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(regs) = state.handlers.get_mut(&self.kind) {
                if let Some(pos) = regs.iter().position(|r| r.id == self.id) {
                    regs.remove(pos);
                    debug!(kind = %self.kind, registration = self.id, "Handler unsubscribed");
                }
            }
        }
    }
}

/// Bus counters for telemetry surfaces.
#[derive(Debug, Clone, Copy)]
pub struct BusStats {
    pub emissions: u64,
    pub handler_errors: u64,
    pub registrations: usize,
}

impl std::fmt::Display for BusStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bus: {} emissions, {} handler errors, {} registrations",
            self.emissions, self.handler_errors, self.registrations
        )
    }
}
