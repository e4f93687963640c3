//! Opaque id generation
//!
//! Ids carry identity only; no ordering or timestamp is encoded. The prefix
//! identifies the entity class in logs (`sig_…`, `ins_…`, `req_…`).

use uuid::Uuid;

/// Generate an opaque id with the given prefix.
pub fn generate(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// Id for an emitted signal.
pub fn signal_id() -> String {
    generate("sig")
}

/// Id for an extracted insight.
pub fn insight_id() -> String {
    generate("ins")
}

/// Id for a sidecar request envelope.
pub fn request_id() -> String {
    generate("req")
}
