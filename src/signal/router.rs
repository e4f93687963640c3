//! Thalamus Router — rule-based selection of responders for each signal
//!
//! Routes are evaluated in declared order. The first matching route marked
//! `terminal` stops evaluation; otherwise every matching route contributes
//! its dispatch set. The union is deduplicated preserving first-seen order,
//! unknown handler ids are dropped silently, and the surviving handlers run
//! in parallel with per-handler error capture.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::bus::{HandlerFuture, SignalHandler};
use super::matcher::Matcher;
use crate::types::Signal;

/// A routing rule.
#[derive(Debug, Clone)]
pub struct Route {
    pub id: String,
    pub matcher: Matcher,
    /// Handler ids to dispatch to when the route matches.
    pub dispatch: Vec<String>,
    /// A matching terminal route stops evaluation of later routes.
    pub terminal: bool,
    pub disabled: bool,
}

impl Route {
    pub fn new(id: impl Into<String>, matcher: Matcher, dispatch: Vec<String>) -> Self {
        Self {
            id: id.into(),
            matcher,
            dispatch,
            terminal: false,
            disabled: false,
        }
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

/// A handler failure captured during dispatch.
#[derive(Debug, Clone)]
pub struct DispatchError {
    pub handler_id: String,
    pub message: String,
}

/// Result of routing one signal.
#[derive(Debug, Clone, Default)]
pub struct RouteOutcome {
    pub matched_routes: Vec<String>,
    pub dispatched_to: Vec<String>,
    pub errors: Vec<DispatchError>,
}

/// Rule-based signal router with a named-handler registry.
#[derive(Default)]
pub struct ThalamusRouter {
    routes: Vec<Route>,
    registry: HashMap<String, SignalHandler>,
    default_dispatch: Vec<String>,
}

impl ThalamusRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route. Evaluation order is insertion order.
    pub fn add_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Register a named handler that routes can dispatch to.
    pub fn register_handler<F, Fut>(&mut self, id: impl Into<String>, handler: F)
    where
        F: Fn(Arc<Signal>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: SignalHandler = Arc::new(move |signal| -> HandlerFuture {
            Box::pin(handler(signal))
        });
        self.registry.insert(id.into(), handler);
    }

    /// Handlers to use when no route matches.
    pub fn set_default_dispatch(&mut self, handler_ids: Vec<String>) {
        self.default_dispatch = handler_ids;
    }

    /// Route one signal: match rules, dispatch the deduplicated handler
    /// union in parallel, and collect per-handler errors.
    pub async fn route(&self, signal: &Signal) -> RouteOutcome {
        let mut matched_routes = Vec::new();
        let mut handler_ids: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for route in &self.routes {
            if route.disabled {
                continue;
            }
            if !route.matcher.matches(signal) {
                continue;
            }
            matched_routes.push(route.id.clone());
            for id in &route.dispatch {
                if seen.insert(id.as_str()) {
                    handler_ids.push(id.clone());
                }
            }
            if route.terminal {
                debug!(route = %route.id, "Terminal route matched — stopping evaluation");
                break;
            }
        }

        if matched_routes.is_empty() {
            for id in &self.default_dispatch {
                if seen.insert(id.as_str()) {
                    handler_ids.push(id.clone());
                }
            }
        }

        // Unknown handler ids are dropped silently.
        let dispatched: Vec<(String, SignalHandler)> = handler_ids
            .into_iter()
            .filter_map(|id| {
                self.registry
                    .get(&id)
                    .map(|handler| (id, Arc::clone(handler)))
            })
            .collect();

        let signal = Arc::new(signal.clone());
        let dispatched_to: Vec<String> = dispatched.iter().map(|(id, _)| id.clone()).collect();

        let results = join_all(
            dispatched
                .into_iter()
                .map(|(id, handler)| {
                    let signal = Arc::clone(&signal);
                    async move { (id, handler(signal).await) }
                }),
        )
        .await;

        let mut errors = Vec::new();
        for (handler_id, result) in results {
            if let Err(error) = result {
                warn!(handler = %handler_id, error = %error, "Routed handler failed");
                errors.push(DispatchError {
                    handler_id,
                    message: error.to_string(),
                });
            }
        }

        RouteOutcome {
            matched_routes,
            dispatched_to,
            errors,
        }
    }
}
