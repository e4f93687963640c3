//! Insight types — extraction output and the persisted queue form
//!
//! `ExtractedInsight` is what the LLM pipeline produces; `QueuedInsight`
//! is the accumulator's persisted record. Persisted types serialize in
//! camelCase to stay wire-compatible with existing queue files.

use serde::{Deserialize, Serialize};

use super::signal::SignalKind;

/// Quality scores attached to an insight, each clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightScores {
    pub topic_clarity: f64,
    pub publish_ready: f64,
    pub novelty: f64,
}

/// One insight produced by the extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedInsight {
    /// Assigned at extraction time; stable across re-queues.
    pub id: String,
    pub topic: String,
    pub pillar: Option<String>,
    pub hook: String,
    pub excerpt: String,
    pub scores: InsightScores,
    pub formats: Vec<String>,
}

/// Provenance of an extraction back to the signal it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionSource {
    pub signal_type: SignalKind,
    pub signal_id: String,
    pub path: String,
    pub content_hash: String,
}

/// An insight as persisted in the accumulator queue.
///
/// Identified by `id`: a later record with the same id fully replaces the
/// earlier one during replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedInsight {
    pub id: String,
    pub queued_at: u64,
    pub source_signal_id: String,
    pub source_path: String,
    pub topic: String,
    #[serde(default)]
    pub pillar: Option<String>,
    pub hook: String,
    pub excerpt: String,
    pub scores: InsightScores,
    pub formats: Vec<String>,
}

/// What fired a digest flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushTrigger {
    /// Enough settled insights accumulated.
    Count,
    /// Too long since the last flush (or since the oldest settled insight).
    Time,
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count => f.write_str("count"),
            Self::Time => f.write_str("time"),
        }
    }
}
