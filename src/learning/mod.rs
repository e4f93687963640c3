//! Learning Layer — bandit selection over prompt components
//!
//! Three pieces:
//! - `client`: sidecar-backed select/observe with graceful fallback
//! - `bandit`: the local Thompson sampler used when the sidecar is down
//!   and selection cannot be deferred
//! - `posteriors`: JSON persistence for the local Beta posteriors

pub mod bandit;
pub mod client;
pub mod posteriors;

pub use bandit::{first_fit, select_arms, ThompsonSettings};
pub use client::{LearningClient, SelectOptions};
pub use posteriors::{PosteriorStore, PosteriorStoreError};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::config::{LearningConfig, LearningPhase};
use crate::types::{Arm, Posterior, Selection};
use crate::util::Clock;

/// How the run that produced an observation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Aborted,
    Errored,
}

/// Local selection + posterior bookkeeping for offline operation.
pub struct LocalLearner {
    config: LearningConfig,
    store: PosteriorStore,
    seed_arm_ids: HashSet<String>,
    clock: Arc<dyn Clock>,
}

impl LocalLearner {
    pub fn new(config: LearningConfig, posterior_path: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store: PosteriorStore::new(posterior_path),
            seed_arm_ids: HashSet::new(),
            clock,
        }
    }

    /// Arms that stay exploration-boosted regardless of pull count.
    pub fn with_seed_arms(mut self, seed_arm_ids: impl IntoIterator<Item = String>) -> Self {
        self.seed_arm_ids = seed_arm_ids.into_iter().collect();
        self
    }

    /// Thompson-sample a selection from the persisted posteriors.
    pub async fn select(&self, arms: &[Arm]) -> Selection {
        let posteriors = self.store.load().await;
        let settings = ThompsonSettings {
            token_budget: self.config.token_budget,
            baseline_rate: self.config.baseline_rate,
            min_pulls: self.config.min_pulls,
            seed_arm_ids: self.seed_arm_ids.clone(),
        };
        let mut rng = StdRng::from_entropy();
        select_arms(arms, &posteriors, &settings, &mut rng)
    }

    /// Fold an observed outcome into the arm's posterior and persist it.
    ///
    /// Reward semantics: 1.0 when the arm was referenced in the output,
    /// 0.0 when it was included but not referenced. Excluded arms are not
    /// reported. Skipped entirely in the passive phase and for runs that
    /// aborted or errored.
    pub async fn observe(
        &self,
        arm: &Arm,
        reward: f64,
        run: RunStatus,
    ) -> Result<(), PosteriorStoreError> {
        if self.config.phase == LearningPhase::Passive {
            debug!(arm = %arm.id, "Passive phase — skipping posterior update");
            return Ok(());
        }
        if run != RunStatus::Completed {
            debug!(arm = %arm.id, run = ?run, "Run did not complete — skipping posterior update");
            return Ok(());
        }

        let mut posteriors = self.store.load().await;
        let posterior = posteriors
            .entry(arm.id.clone())
            .or_insert_with(|| Posterior::prior_for(arm.source));
        posterior.observe(reward.clamp(0.0, 1.0), self.clock.now_ms());
        self.store.save(&posteriors).await
    }

    pub fn posterior_store(&self) -> &PosteriorStore {
        &self.store
    }
}
