//! Flow-control primitives for responder pipelines
//!
//! Responders shape bursty signal streams with two building blocks:
//!
//! ```text
//! note-modified ──► Debouncer (per-key, latest wins)
//!                        │ timer fires
//!                        ▼
//!                   Batcher (throttled, bounded batches) ──► LLM / side effects
//! ```
//!
//! Each responder exclusively owns its debouncer and batcher instances.

mod batch;
mod debounce;

pub use batch::Batcher;
pub use debounce::Debouncer;
