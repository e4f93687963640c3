//! OpenClaw core: ambient agency runtime
//!
//! A long-lived, in-process event system that observes signals from a local
//! knowledge vault and scheduled triggers, routes them through typed
//! pipelines, and coordinates three subsystems:
//!
//! ## Architecture
//!
//! - **Signal Bus & Thalamus Router**: typed pub/sub with sequential
//!   per-emission dispatch, plus rule-based routing to responders
//! - **Responder Pipelines**: the insight extractor (debounce → batch →
//!   LLM → parse → emit) and the insight digest accumulator (JSONL queue,
//!   cooldowns, quiet hours, dual-trigger flush)
//! - **Learning Layer**: Thompson-sampling selection of prompt components
//!   under a token budget, backed by a qortex sidecar over stdio or HTTP
//!
//! The core depends only on abstract interfaces for the LLM endpoint, the
//! clock, and the sidecar connection; providers and hosts plug in around it.

pub mod config;
pub mod digest;
pub mod extractor;
pub mod learning;
pub mod llm;
pub mod pipeline;
pub mod sidecar;
pub mod signal;
pub mod telemetry;
pub mod types;
pub mod util;

// Re-export the runtime configuration
pub use config::OpenClawConfig;

// Re-export commonly used types
pub use types::{
    Arm, ArmSource, ArmType, ExtractedInsight, ExtractionSource, FlushTrigger,
    InsightScores, Posterior, QueuedInsight, Selection, Signal, SignalKind, SignalPayload,
};

// Re-export the bus and router
pub use signal::{Matcher, Route, SignalBus, ThalamusRouter};

// Re-export responders
pub use digest::{FlushBatch, InsightDigestResponder};
pub use extractor::InsightExtractor;

// Re-export the learning facade
pub use learning::{LearningClient, LocalLearner};

// Re-export the sidecar contract
pub use sidecar::{CallOptions, SidecarConnection, SidecarError};

// Re-export shared infrastructure
pub use llm::ChatEndpoint;
pub use util::{Clock, ManualClock, SystemClock};
