//! Learning types — bandit arms, Beta posteriors, selection results

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What kind of prompt component an arm represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmType {
    Tool,
    Skill,
    File,
    Memory,
    Section,
}

impl ArmType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Skill => "skill",
            Self::File => "file",
            Self::Memory => "memory",
            Self::Section => "section",
        }
    }
}

/// Where an arm came from. Curated arms start with an optimistic prior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArmSource {
    #[default]
    Curated,
    Learned,
}

/// A candidate prompt component considered for inclusion under a token budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arm {
    /// Structured as `type:category:label`.
    pub id: String,
    #[serde(rename = "type")]
    pub arm_type: ArmType,
    pub category: String,
    pub label: String,
    pub token_cost: u32,
    #[serde(default)]
    pub source: ArmSource,
}

impl Arm {
    /// Build an arm with its structured id derived from the parts.
    pub fn new(arm_type: ArmType, category: &str, label: &str, token_cost: u32) -> Self {
        Self {
            id: format!("{}:{}:{}", arm_type.as_str(), category, label),
            arm_type,
            category: category.to_string(),
            label: label.to_string(),
            token_cost,
            source: ArmSource::Curated,
        }
    }

    pub fn with_source(mut self, source: ArmSource) -> Self {
        self.source = source;
        self
    }
}

/// Beta-distribution belief about one arm's reward probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    pub alpha: f64,
    pub beta: f64,
    pub pulls: u64,
    pub last_updated: u64,
}

impl Posterior {
    /// Initial prior by arm source: curated arms get `(3, 1)`, learned `(1, 1)`.
    pub fn prior_for(source: ArmSource) -> Self {
        let (alpha, beta) = match source {
            ArmSource::Curated => (3.0, 1.0),
            ArmSource::Learned => (1.0, 1.0),
        };
        Self {
            alpha,
            beta,
            pulls: 0,
            last_updated: 0,
        }
    }

    /// Fold in an observed outcome. `reward` is 1.0 when the arm was
    /// referenced in the output, 0.0 when included but unreferenced.
    pub fn observe(&mut self, reward: f64, now_ms: u64) {
        self.alpha += reward;
        self.beta += 1.0 - reward;
        self.pulls += 1;
        self.last_updated = now_ms;
    }
}

/// Result of an arm selection, local or sidecar-backed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub selected_arms: Vec<String>,
    pub excluded_arms: Vec<String>,
    pub is_baseline: bool,
    #[serde(default)]
    pub scores: HashMap<String, f64>,
    pub token_budget: u32,
    pub used_tokens: u32,
}
