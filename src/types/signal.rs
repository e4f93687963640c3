//! Signal types — the closed event vocabulary of the bus
//!
//! Signals are immutable once emitted. Identity is carried by `id`; handlers
//! receive a shared reference (`Arc<Signal>`), so equality between in-flight
//! signals is by reference. Only responder-owned state is persisted; signals
//! themselves are ephemeral.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::insight::{ExtractionSource, ExtractedInsight, FlushTrigger, QueuedInsight};
use crate::util::ids;

/// Signal tag. The set is closed and known at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    FileChanged,
    NoteModified,
    BlockTransition,
    UserIdle,
    UserActive,
    CronFired,
    InsightExtracted,
    DigestReady,
}

impl SignalKind {
    /// Wire name of the tag (`note-modified`, `insight-extracted`, …).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileChanged => "file-changed",
            Self::NoteModified => "note-modified",
            Self::BlockTransition => "block-transition",
            Self::UserIdle => "user-idle",
            Self::UserActive => "user-active",
            Self::CronFired => "cron-fired",
            Self::InsightExtracted => "insight-extracted",
            Self::DigestReady => "digest-ready",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vault file changed on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangedPayload {
    pub path: String,
}

/// A note's content changed (debounced upstream of the raw file watcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteModifiedPayload {
    pub path: String,
    pub content: String,
    /// Parsed frontmatter, if the note had any. Shape is vault-defined;
    /// consumers pull out the keys they understand.
    #[serde(default)]
    pub frontmatter: Value,
}

/// Extraction results for one source note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightExtractedPayload {
    pub source: ExtractionSource,
    pub insights: Vec<ExtractedInsight>,
    pub extracted_at: u64,
    pub extractor_version: String,
}

/// A settled batch of insights left the accumulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestReadyPayload {
    pub insights: Vec<QueuedInsight>,
    pub trigger: FlushTrigger,
}

/// Tag-discriminated signal payload. Exhaustive by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalPayload {
    FileChanged(FileChangedPayload),
    NoteModified(NoteModifiedPayload),
    BlockTransition { from_block: Option<String>, to_block: String },
    UserIdle { idle_ms: u64 },
    UserActive {},
    CronFired { job: String },
    InsightExtracted(InsightExtractedPayload),
    DigestReady(DigestReadyPayload),
}

impl SignalPayload {
    /// The tag of this payload.
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::FileChanged(_) => SignalKind::FileChanged,
            Self::NoteModified(_) => SignalKind::NoteModified,
            Self::BlockTransition { .. } => SignalKind::BlockTransition,
            Self::UserIdle { .. } => SignalKind::UserIdle,
            Self::UserActive {} => SignalKind::UserActive,
            Self::CronFired { .. } => SignalKind::CronFired,
            Self::InsightExtracted(_) => SignalKind::InsightExtracted,
            Self::DigestReady(_) => SignalKind::DigestReady,
        }
    }
}

/// An immutable bus event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Opaque identity.
    pub id: String,
    /// Emission time, milliseconds since epoch.
    pub ts: u64,
    #[serde(flatten)]
    pub payload: SignalPayload,
}

impl Signal {
    /// Build a signal with a fresh id.
    pub fn new(ts: u64, payload: SignalPayload) -> Self {
        Self {
            id: ids::signal_id(),
            ts,
            payload,
        }
    }

    pub fn kind(&self) -> SignalKind {
        self.payload.kind()
    }

    /// Filesystem path carried by the payload, when it has one.
    /// Used by route matchers.
    pub fn path(&self) -> Option<&str> {
        match &self.payload {
            SignalPayload::FileChanged(p) => Some(&p.path),
            SignalPayload::NoteModified(p) => Some(&p.path),
            SignalPayload::InsightExtracted(p) => Some(&p.source.path),
            _ => None,
        }
    }

    /// Textual content carried by the payload, when it has any.
    /// Used by magic-string matchers.
    pub fn content(&self) -> Option<&str> {
        match &self.payload {
            SignalPayload::NoteModified(p) => Some(&p.content),
            _ => None,
        }
    }
}
