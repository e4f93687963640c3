//! Learning client — sidecar facade with graceful fallback
//!
//! Every operation builds a typed envelope, calls the shared sidecar
//! connection, and degrades instead of throwing: `select` falls back to a
//! deterministic include-as-many-as-fit baseline, `observe` is
//! fire-and-forget, and the read operations return `None` on any failure.
//! A sidecar outage must never surface as a user-facing error.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::bandit::first_fit;
use crate::config::LearningConfig;
use crate::sidecar::{shared_connection, CallOptions, SidecarConnection, SidecarError};
use crate::types::{Arm, Selection};

/// Per-call select options.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Overrides the configured token budget. 0 means unbounded.
    pub token_budget: Option<u32>,
    /// Opaque context forwarded to the sidecar's learner.
    pub context: Option<Value>,
}

/// Thin facade over a sidecar connection. Never throws to the caller.
pub struct LearningClient {
    learner: String,
    token_budget: u32,
    connection: Option<Arc<dyn SidecarConnection>>,
}

impl LearningClient {
    /// `connection` may be omitted to use the process-wide shared one.
    pub fn new(config: &LearningConfig, connection: Option<Arc<dyn SidecarConnection>>) -> Self {
        Self {
            learner: config.learner_name.clone(),
            token_budget: config.token_budget,
            connection,
        }
    }

    fn connection(&self) -> Option<Arc<dyn SidecarConnection>> {
        self.connection.clone().or_else(shared_connection)
    }

    /// Select arms under the token budget. Falls back to a deterministic
    /// first-fit baseline when the sidecar is unavailable.
    pub async fn select(&self, candidates: &[Arm], opts: &SelectOptions) -> Selection {
        let budget = opts.token_budget.unwrap_or(self.token_budget);
        match self.try_select(candidates, budget, opts).await {
            Ok(selection) => selection,
            Err(error) => {
                debug!(error = %error, "learning_select unavailable — using baseline fallback");
                first_fit(candidates, budget, true)
            }
        }
    }

    async fn try_select(
        &self,
        candidates: &[Arm],
        budget: u32,
        opts: &SelectOptions,
    ) -> Result<Selection, SidecarError> {
        let connection = self.connection().ok_or(SidecarError::NotConnected)?;
        let mut envelope = json!({
            "learner": self.learner,
            "candidates": candidates,
            "token_budget": budget,
        });
        if let Some(context) = &opts.context {
            envelope["context"] = context.clone();
        }
        let response = connection
            .call_tool("learning_select", envelope, CallOptions::default())
            .await?;
        Ok(parse_selection(&response, candidates, budget))
    }

    /// Report an observed outcome. Fire-and-forget: failures are logged
    /// and swallowed.
    pub async fn observe(&self, arm_id: &str, reward: f64, context: Option<Value>) {
        let Some(connection) = self.connection() else {
            debug!(arm = arm_id, "No sidecar connection — dropping observation");
            return;
        };
        let mut envelope = json!({
            "learner": self.learner,
            "arm_id": arm_id,
            "reward": reward,
        });
        if let Some(context) = context {
            envelope["context"] = context;
        }
        if let Err(error) = connection
            .call_tool("learning_observe", envelope, CallOptions::default())
            .await
        {
            warn!(arm = arm_id, error = %error, "learning_observe failed — dropping observation");
        }
    }

    /// Current posteriors for this learner, or `None` on any failure.
    pub async fn posteriors(&self) -> Option<Value> {
        self.call_swallowing("learning_posteriors", json!({"learner": self.learner}))
            .await
    }

    /// Learner metrics over an optional window (e.g. `"7d"`).
    pub async fn metrics(&self, window: Option<&str>) -> Option<Value> {
        let mut args = json!({"learner": self.learner});
        if let Some(window) = window {
            args["window"] = json!(window);
        }
        self.call_swallowing("learning_metrics", args).await
    }

    /// Reset the learner's state.
    pub async fn reset(&self) -> Option<Value> {
        self.call_swallowing("learning_reset", json!({"learner": self.learner}))
            .await
    }

    pub async fn session_start(&self, session_id: &str) -> Option<Value> {
        self.call_swallowing(
            "learning_session_start",
            json!({"learner": self.learner, "session_id": session_id}),
        )
        .await
    }

    pub async fn session_end(&self, session_id: &str) -> Option<Value> {
        self.call_swallowing(
            "learning_session_end",
            json!({"learner": self.learner, "session_id": session_id}),
        )
        .await
    }

    async fn call_swallowing(&self, tool: &str, args: Value) -> Option<Value> {
        let connection = self.connection()?;
        match connection.call_tool(tool, args, CallOptions::default()).await {
            Ok(value) => Some(value),
            Err(error) => {
                debug!(tool, error = %error, "Sidecar call failed — returning none");
                None
            }
        }
    }
}

/// Normalize a sidecar selection response. Arms may arrive as bare id
/// strings or `{id: …}` objects; both flatten to id strings.
fn parse_selection(response: &Value, candidates: &[Arm], budget: u32) -> Selection {
    let selected_arms = arm_ids(response.get("selected_arms"));
    let excluded_arms = arm_ids(response.get("excluded_arms"));

    let scores = response
        .get("scores")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(id, score)| score.as_f64().map(|s| (id.clone(), s)))
                .collect()
        })
        .unwrap_or_default();

    let used_tokens = response
        .get("used_tokens")
        .and_then(Value::as_u64)
        .map_or_else(
            || {
                candidates
                    .iter()
                    .filter(|arm| selected_arms.contains(&arm.id))
                    .map(|arm| arm.token_cost)
                    .sum()
            },
            |v| v as u32,
        );

    Selection {
        selected_arms,
        excluded_arms,
        is_baseline: response
            .get("is_baseline")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        scores,
        token_budget: response
            .get("token_budget")
            .and_then(Value::as_u64)
            .map_or(budget, |v| v as u32),
        used_tokens,
    }
}

fn arm_ids(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| match entry {
                    Value::String(id) => Some(id.clone()),
                    Value::Object(fields) => fields
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}
