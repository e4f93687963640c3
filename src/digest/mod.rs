//! Insight Digest responder
//!
//! Accumulates extracted insights in an append-only queue and periodically
//! flushes the settled ones to a caller-supplied consumer:
//!
//! ```text
//! insight-extracted ──► enqueue (JSONL log)
//!        scheduler tick ──► quiet? ──► settled set ──► flush decision
//!                                            │ fire
//!                                            ▼
//!            on_flush(batch) → dequeue → record flush → digest-ready
//! ```
//!
//! A failing flush callback is logged and counted, but never prevents the
//! dequeue + record + emit sequence: the queue must not re-deliver a batch
//! the consumer may have partially handled.

pub mod schedule;
pub mod store;

pub use schedule::{parse_minute_of_day, schedule_check, CheckHandle, QuietHours};
pub use store::{decide_flush, AccumulatorStore, FlushPolicy, QueueState, StoreError};

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, DigestConfig};
use crate::signal::{SignalBus, Subscription};
use crate::types::{
    DigestReadyPayload, FlushTrigger, QueuedInsight, Signal, SignalKind, SignalPayload,
};
use crate::util::Clock;

/// A batch of settled insights handed to the flush consumer.
#[derive(Debug, Clone)]
pub struct FlushBatch {
    pub insights: Vec<QueuedInsight>,
    pub trigger: FlushTrigger,
}

type FlushCallback =
    Arc<dyn Fn(FlushBatch) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Default)]
struct DigestCounters {
    enqueued: AtomicU64,
    count_flushes: AtomicU64,
    time_flushes: AtomicU64,
    flush_callback_errors: AtomicU64,
    quiet_suppressions: AtomicU64,
}

struct DigestCore {
    store: AccumulatorStore,
    quiet: QuietHours,
    bus: Arc<SignalBus>,
    clock: Arc<dyn Clock>,
    on_flush: FlushCallback,
    counters: DigestCounters,
}

impl DigestCore {
    /// One scheduler tick: decide and, when due, run the flush sequence.
    async fn tick(&self) -> anyhow::Result<()> {
        let now = self.clock.now_ms();
        if self.quiet.is_quiet_at(now) {
            self.counters
                .quiet_suppressions
                .fetch_add(1, Ordering::Relaxed);
            debug!("In quiet hours — skipping flush check");
            return Ok(());
        }

        let settled = self.store.get_settled(now).await?;
        let Some(trigger) = self.store.should_flush(&settled, now).await? else {
            return Ok(());
        };

        info!(
            insights = settled.len(),
            trigger = %trigger,
            "Flushing insight digest"
        );

        if let Err(error) = (self.on_flush)(FlushBatch {
            insights: settled.clone(),
            trigger,
        })
        .await
        {
            self.counters
                .flush_callback_errors
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                error = %error,
                "Flush callback failed — completing dequeue and bookkeeping anyway"
            );
        }

        let ids: Vec<String> = settled.iter().map(|i| i.id.clone()).collect();
        self.store.dequeue(&ids).await?;
        self.store.record_flush(now).await?;
        match trigger {
            FlushTrigger::Count => self.counters.count_flushes.fetch_add(1, Ordering::Relaxed),
            FlushTrigger::Time => self.counters.time_flushes.fetch_add(1, Ordering::Relaxed),
        };

        self.bus
            .emit(Signal::new(
                now,
                SignalPayload::DigestReady(DigestReadyPayload {
                    insights: settled,
                    trigger,
                }),
            ))
            .await;
        Ok(())
    }

    async fn enqueue_from_signal(&self, signal: &Signal) -> anyhow::Result<()> {
        let SignalPayload::InsightExtracted(payload) = &signal.payload else {
            return Ok(());
        };
        let now = self.clock.now_ms();
        for insight in &payload.insights {
            let queued = QueuedInsight {
                id: insight.id.clone(),
                queued_at: now,
                source_signal_id: payload.source.signal_id.clone(),
                source_path: payload.source.path.clone(),
                topic: insight.topic.clone(),
                pillar: insight.pillar.clone(),
                hook: insight.hook.clone(),
                excerpt: insight.excerpt.clone(),
                scores: insight.scores,
                formats: insight.formats.clone(),
            };
            // Append failures propagate: a queue that cannot persist is the
            // one fatal runtime condition this responder has.
            self.store.enqueue(queued).await?;
            self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// The digest responder. Owns its accumulator file exclusively.
pub struct InsightDigestResponder {
    core: Arc<DigestCore>,
    check_interval_ms: u64,
    subscription: Mutex<Option<Subscription>>,
    check: Mutex<Option<CheckHandle>>,
}

impl InsightDigestResponder {
    /// Build from a validated digest config. `on_flush` receives every
    /// flushed batch and is awaited before the queue is dequeued.
    pub fn new<F, Fut>(
        config: &DigestConfig,
        bus: Arc<SignalBus>,
        clock: Arc<dyn Clock>,
        on_flush: F,
    ) -> Result<Arc<Self>, ConfigError>
    where
        F: Fn(FlushBatch) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let quiet = config.quiet_hours()?;
        let store = AccumulatorStore::new(
            config.store_path.clone(),
            config.cooldown_ms(),
            config.flush_policy(),
        );
        Ok(Arc::new(Self {
            core: Arc::new(DigestCore {
                store,
                quiet,
                bus,
                clock,
                on_flush: Arc::new(move |batch| -> BoxFuture<'static, anyhow::Result<()>> {
                    Box::pin(on_flush(batch))
                }),
                counters: DigestCounters::default(),
            }),
            check_interval_ms: config.check_interval_ms,
            subscription: Mutex::new(None),
            check: Mutex::new(None),
        }))
    }

    /// Subscribe to `insight-extracted` and start the periodic flush check.
    pub fn register(self: &Arc<Self>) {
        let core = Arc::clone(&self.core);
        let subscription = self
            .core
            .bus
            .subscribe(SignalKind::InsightExtracted, move |signal| {
                let core = Arc::clone(&core);
                async move { core.enqueue_from_signal(&signal).await }
            });
        *lock(&self.subscription) = Some(subscription);

        let core = Arc::clone(&self.core);
        let check = schedule_check(self.check_interval_ms, move || {
            let core = Arc::clone(&core);
            async move { core.tick().await }
        });
        *lock_check(&self.check) = Some(check);

        info!(
            check_interval_ms = self.check_interval_ms,
            "Insight digest responder registered"
        );
    }

    /// Direct store access, for hosts that need to inspect the queue.
    pub fn store(&self) -> &AccumulatorStore {
        &self.core.store
    }

    /// Tear down the subscription and the scheduler. Idempotent; a tick
    /// already in flight completes.
    pub fn dispose(&self) {
        if let Some(subscription) = lock(&self.subscription).take() {
            subscription.unsubscribe();
        }
        if let Some(check) = lock_check(&self.check).take() {
            check.stop();
        }
        info!("Insight digest responder disposed");
    }

    pub fn stats(&self) -> DigestStats {
        let c = &self.core.counters;
        DigestStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            count_flushes: c.count_flushes.load(Ordering::Relaxed),
            time_flushes: c.time_flushes.load(Ordering::Relaxed),
            flush_callback_errors: c.flush_callback_errors.load(Ordering::Relaxed),
            quiet_suppressions: c.quiet_suppressions.load(Ordering::Relaxed),
        }
    }
}

fn lock(
    slot: &Mutex<Option<Subscription>>,
) -> std::sync::MutexGuard<'_, Option<Subscription>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_check(slot: &Mutex<Option<CheckHandle>>) -> std::sync::MutexGuard<'_, Option<CheckHandle>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Digest counters for telemetry surfaces.
#[derive(Debug, Clone, Copy)]
pub struct DigestStats {
    pub enqueued: u64,
    pub count_flushes: u64,
    pub time_flushes: u64,
    pub flush_callback_errors: u64,
    pub quiet_suppressions: u64,
}

impl std::fmt::Display for DigestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Digest: {} enqueued, {} flushes ({} count, {} time), {} callback errors, {} quiet skips",
            self.enqueued,
            self.count_flushes + self.time_flushes,
            self.count_flushes,
            self.time_flushes,
            self.flush_callback_errors,
            self.quiet_suppressions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::types::{
        ExtractedInsight, ExtractionSource, InsightExtractedPayload, InsightScores,
    };
    use crate::util::ManualClock;

    fn extracted_signal(ids: &[&str]) -> Signal {
        let insights = ids
            .iter()
            .map(|id| ExtractedInsight {
                id: (*id).to_string(),
                topic: format!("topic-{id}"),
                pillar: None,
                hook: "hook".to_string(),
                excerpt: "excerpt".to_string(),
                scores: InsightScores {
                    topic_clarity: 0.9,
                    publish_ready: 0.8,
                    novelty: 0.7,
                },
                formats: vec!["thread".to_string()],
            })
            .collect();
        Signal::new(
            1,
            SignalPayload::InsightExtracted(InsightExtractedPayload {
                source: ExtractionSource {
                    signal_type: SignalKind::NoteModified,
                    signal_id: "sig_src".to_string(),
                    path: "/j.md".to_string(),
                    content_hash: "abc".to_string(),
                },
                insights,
                extracted_at: 1,
                extractor_version: "2.1.0".to_string(),
            }),
        )
    }

    struct Fixture {
        responder: Arc<InsightDigestResponder>,
        bus: Arc<SignalBus>,
        clock: Arc<ManualClock>,
        flushes: Arc<Mutex<Vec<FlushBatch>>>,
        digest_signals: Arc<Mutex<Vec<DigestReadyPayload>>>,
        _dir: tempfile::TempDir,
    }

    fn fixture(config_patch: impl FnOnce(&mut DigestConfig), fail_flush: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DigestConfig {
            min_insights_to_flush: 3,
            cooldown_hours: 0.0,
            check_interval_ms: 1_000,
            store_path: dir.path().join("insights.jsonl"),
            // Noon UTC is far from the default 22:00–08:00 window.
            ..DigestConfig::default()
        };
        config_patch(&mut config);

        let bus = Arc::new(SignalBus::new());
        // 2026-03-02T12:00:00Z
        let clock = Arc::new(ManualClock::at(1_772_452_800_000));
        let flushes: Arc<Mutex<Vec<FlushBatch>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&flushes);
        let responder = InsightDigestResponder::new(
            &config,
            Arc::clone(&bus),
            clock.clone(),
            move |batch: FlushBatch| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(batch);
                    if fail_flush {
                        anyhow::bail!("consumer exploded");
                    }
                    Ok(())
                }
            },
        )
        .unwrap();
        responder.register();

        let digest_signals: Arc<Mutex<Vec<DigestReadyPayload>>> = Arc::new(Mutex::new(Vec::new()));
        let collected = Arc::clone(&digest_signals);
        bus.subscribe(SignalKind::DigestReady, move |signal| {
            let collected = Arc::clone(&collected);
            async move {
                if let SignalPayload::DigestReady(payload) = &signal.payload {
                    collected.lock().unwrap().push(payload.clone());
                }
                Ok(())
            }
        });

        Fixture {
            responder,
            bus,
            clock,
            flushes,
            digest_signals,
            _dir: dir,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn count_trigger_flush_end_to_end() {
        let f = fixture(|_| {}, false);

        f.bus.emit(extracted_signal(&["a", "b", "c"])).await;
        assert_eq!(f.responder.stats().enqueued, 3);

        // One scheduler tick later the flush fires.
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        let flushes = f.flushes.lock().unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].trigger, FlushTrigger::Count);
        assert_eq!(flushes[0].insights.len(), 3);
        drop(flushes);

        assert!(f.responder.store().get_queue().await.unwrap().is_empty());
        assert!(f.responder.store().last_flush_at().await.unwrap() > 0);
        assert_eq!(f.digest_signals.lock().unwrap().len(), 1);
        assert_eq!(f.responder.stats().count_flushes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_hours_suppress_flushing() {
        let f = fixture(
            |config| {
                // Window covering the fixture's noon clock.
                config.quiet_hours_start = "11:00".to_string();
                config.quiet_hours_end = "13:00".to_string();
            },
            false,
        );

        f.bus.emit(extracted_signal(&["a", "b", "c"])).await;
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        assert!(f.flushes.lock().unwrap().is_empty(), "no flush across 10 ticks");
        assert_eq!(f.responder.store().get_queue().await.unwrap().len(), 3);
        assert!(f.responder.stats().quiet_suppressions >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn time_trigger_fires_when_count_not_reached() {
        let f = fixture(
            |config| {
                config.min_insights_to_flush = 10;
                config.max_hours_between_flushes = 1.0;
            },
            false,
        );

        f.bus.emit(extracted_signal(&["solo"])).await;

        // Not yet: the insight is settled (cooldown 0) but young.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(f.flushes.lock().unwrap().is_empty());

        // Advance the wall clock past the max interval and tick again.
        f.clock.advance(3_600_000);
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        let flushes = f.flushes.lock().unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].trigger, FlushTrigger::Time);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_callback_failure_still_dequeues_and_emits() {
        let f = fixture(|_| {}, true);

        f.bus.emit(extracted_signal(&["a", "b", "c"])).await;
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(f.flushes.lock().unwrap().len(), 1);
        assert!(f.responder.store().get_queue().await.unwrap().is_empty());
        assert_eq!(f.digest_signals.lock().unwrap().len(), 1);
        assert_eq!(f.responder.stats().flush_callback_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_stops_the_scheduler_and_subscription() {
        let f = fixture(|_| {}, false);
        f.responder.dispose();
        f.responder.dispose(); // idempotent

        f.bus.emit(extracted_signal(&["a", "b", "c"])).await;
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        assert_eq!(f.responder.stats().enqueued, 0, "unsubscribed before emit");
        assert!(f.flushes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_defers_settling() {
        let f = fixture(
            |config| {
                config.cooldown_hours = 1.0;
            },
            false,
        );

        f.bus.emit(extracted_signal(&["a", "b", "c"])).await;
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert!(f.flushes.lock().unwrap().is_empty(), "cooldown not reached");

        f.clock.advance(3_600_000);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(f.flushes.lock().unwrap().len(), 1);
    }
}
