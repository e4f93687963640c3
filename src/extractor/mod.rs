//! Insight Extractor responder
//!
//! Pipeline: `note-modified` → screen → per-path debounce → throttled batch
//! → LLM call → parse → emit `insight-extracted`.
//!
//! Per-path state machine:
//!
//! ```text
//! IDLE ──note-modified──► PENDING_DEBOUNCE (timer set)
//! PENDING_DEBOUNCE ──note-modified (same path)──► timer reset, latest content wins
//! PENDING_DEBOUNCE ──timer fires──► enqueued into batcher, back to IDLE
//! ```
//!
//! Batches are processed sequentially: one LLM call at a time, and a failed
//! call never skips the other extractions in the batch.

mod filter;
mod parse;
mod prompt;

pub use filter::{is_skipped_path, screen, ScreenedNote};
pub use parse::{parse_insights, ParsedInsight};
pub use prompt::{build_system_prompt, build_user_prompt};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::config::ExtractorConfig;
use crate::llm::ChatEndpoint;
use crate::pipeline::{Batcher, Debouncer};
use crate::signal::{SignalBus, Subscription};
use crate::types::{
    ExtractedInsight, ExtractionSource, InsightExtractedPayload, Signal, SignalKind,
    SignalPayload,
};
use crate::util::{hash, ids, Clock};

/// Version stamped into every `insight-extracted` payload.
pub const EXTRACTOR_VERSION: &str = "2.1.0";

/// A screened note waiting in the debounce/batch pipeline.
#[derive(Debug, Clone)]
pub struct PendingExtraction {
    pub path: String,
    pub content: String,
    pub pillar_hint: Option<String>,
    pub signal_id: String,
}

#[derive(Default)]
struct ExtractorCounters {
    signals_seen: AtomicU64,
    skipped_by_filter: AtomicU64,
    extractions: AtomicU64,
    insights_emitted: AtomicU64,
    llm_failures: AtomicU64,
}

/// Extraction workhorse shared with the batcher sink.
struct ExtractorCore {
    system_prompt: String,
    llm: Arc<dyn ChatEndpoint>,
    bus: Arc<SignalBus>,
    clock: Arc<dyn Clock>,
    counters: ExtractorCounters,
}

impl ExtractorCore {
    async fn process_batch(&self, batch: Vec<PendingExtraction>) {
        // Sequential by contract: one LLM call in flight per responder.
        for extraction in batch {
            if let Err(error) = self.process_one(&extraction).await {
                self.counters.llm_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    path = %extraction.path,
                    error = %error,
                    "Insight extraction failed — continuing with the rest of the batch"
                );
            }
        }
    }

    async fn process_one(&self, extraction: &PendingExtraction) -> anyhow::Result<()> {
        let user_prompt =
            prompt::build_user_prompt(&extraction.content, extraction.pillar_hint.as_deref());
        let response = self.llm.chat(&self.system_prompt, &user_prompt).await?;

        let parsed = parse::parse_insights(&response);
        self.counters.extractions.fetch_add(1, Ordering::Relaxed);
        if parsed.is_empty() {
            debug!(path = %extraction.path, "No insights in LLM response");
            return Ok(());
        }

        let insights: Vec<ExtractedInsight> = parsed
            .into_iter()
            .map(|p| ExtractedInsight {
                id: ids::insight_id(),
                topic: p.topic,
                pillar: p.pillar,
                hook: p.hook,
                excerpt: p.excerpt,
                scores: p.scores,
                formats: p.formats,
            })
            .collect();

        self.counters
            .insights_emitted
            .fetch_add(insights.len() as u64, Ordering::Relaxed);
        info!(
            path = %extraction.path,
            insights = insights.len(),
            "Insights extracted"
        );

        let now = self.clock.now_ms();
        let payload = InsightExtractedPayload {
            source: ExtractionSource {
                signal_type: SignalKind::NoteModified,
                signal_id: extraction.signal_id.clone(),
                path: extraction.path.clone(),
                content_hash: hash::content_hash(&extraction.content),
            },
            insights,
            extracted_at: now,
            extractor_version: EXTRACTOR_VERSION.to_string(),
        };
        self.bus
            .emit(Signal::new(now, SignalPayload::InsightExtracted(payload)))
            .await;
        Ok(())
    }
}

/// The extractor responder. Owns its debouncer and batcher exclusively.
pub struct InsightExtractor {
    config: ExtractorConfig,
    core: Arc<ExtractorCore>,
    debouncer: Debouncer<PendingExtraction>,
    batcher: Arc<Batcher<PendingExtraction>>,
    bus: Arc<SignalBus>,
    subscription: Mutex<Option<Subscription>>,
}

impl InsightExtractor {
    pub fn new(
        config: ExtractorConfig,
        llm: Arc<dyn ChatEndpoint>,
        bus: Arc<SignalBus>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let core = Arc::new(ExtractorCore {
            system_prompt: prompt::build_system_prompt(&config.pillars),
            llm,
            bus: Arc::clone(&bus),
            clock,
            counters: ExtractorCounters::default(),
        });

        let sink_core = Arc::clone(&core);
        let batcher = Arc::new(Batcher::new(
            config.min_batch_delay_ms,
            config.max_batch_size,
            move |batch| {
                let core = Arc::clone(&sink_core);
                async move {
                    core.process_batch(batch).await;
                    Ok(())
                }
            },
        ));

        Arc::new(Self {
            debouncer: Debouncer::new(config.debounce_ms),
            batcher,
            config,
            core,
            bus,
            subscription: Mutex::new(None),
        })
    }

    /// Subscribe to `note-modified` on the bus. Call once.
    pub fn register(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let subscription = self.bus.subscribe(SignalKind::NoteModified, move |signal| {
            let this = Arc::clone(&this);
            async move {
                this.on_note_modified(&signal);
                Ok(())
            }
        });
        *lock(&self.subscription) = Some(subscription);
        info!(
            magic = %self.config.magic_string,
            debounce_ms = self.config.debounce_ms,
            "Insight extractor registered"
        );
    }

    fn on_note_modified(&self, signal: &Signal) {
        let SignalPayload::NoteModified(payload) = &signal.payload else {
            return;
        };
        self.core
            .counters
            .signals_seen
            .fetch_add(1, Ordering::Relaxed);

        let Some(screened) = filter::screen(payload, &self.config) else {
            self.core
                .counters
                .skipped_by_filter
                .fetch_add(1, Ordering::Relaxed);
            debug!(path = %payload.path, "Note skipped by extraction screen");
            return;
        };

        let pending = PendingExtraction {
            path: payload.path.clone(),
            content: payload.content.clone(),
            pillar_hint: screened.pillar_hint,
            signal_id: signal.id.clone(),
        };

        let batcher = Arc::clone(&self.batcher);
        self.debouncer
            .schedule(payload.path.clone(), pending, move |extraction| async move {
                batcher.add(extraction);
                Ok(())
            });
    }

    /// Tear down: unsubscribe and drop all pending debounce/batch work.
    /// Idempotent; work already handed to the LLM completes.
    pub fn dispose(&self) {
        if let Some(subscription) = lock(&self.subscription).take() {
            subscription.unsubscribe();
        }
        self.debouncer.clear();
        self.batcher.clear();
        info!("Insight extractor disposed");
    }

    pub fn stats(&self) -> ExtractorStats {
        let c = &self.core.counters;
        ExtractorStats {
            signals_seen: c.signals_seen.load(Ordering::Relaxed),
            skipped_by_filter: c.skipped_by_filter.load(Ordering::Relaxed),
            extractions: c.extractions.load(Ordering::Relaxed),
            insights_emitted: c.insights_emitted.load(Ordering::Relaxed),
            llm_failures: c.llm_failures.load(Ordering::Relaxed),
        }
    }
}

fn lock(
    slot: &Mutex<Option<Subscription>>,
) -> std::sync::MutexGuard<'_, Option<Subscription>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Extractor counters for telemetry surfaces.
#[derive(Debug, Clone, Copy)]
pub struct ExtractorStats {
    pub signals_seen: u64,
    pub skipped_by_filter: u64,
    pub extractions: u64,
    pub insights_emitted: u64,
    pub llm_failures: u64,
}

impl std::fmt::Display for ExtractorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Extractor: {} signals ({} filtered), {} extractions, {} insights, {} LLM failures",
            self.signals_seen,
            self.skipped_by_filter,
            self.extractions,
            self.insights_emitted,
            self.llm_failures
        )
    }
}
