//! Accumulator Store — append-only JSONL queue with replay
//!
//! One file per accumulator. Every mutation appends exactly one tagged
//! line; reads replay the file from the beginning. The only cached
//! read-side value is `last_flush_at`, which is filled on the first full
//! read and kept current by mutations.
//!
//! Fault tolerance: malformed lines are skipped during replay (debug log),
//! a missing file is an empty queue, and the directory is created lazily
//! before the first append. Append failures propagate to the caller — a
//! queue that cannot persist is a fatal condition for its responder.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::types::{FlushTrigger, QueuedInsight};

/// Accumulator persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("queue io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One line of the append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum LogLine {
    Insight { data: QueuedInsight },
    Dequeue { ids: Vec<String> },
    Flush { at: u64 },
    Clear,
}

/// Materialized view of the log.
#[derive(Debug, Clone, Default)]
pub struct QueueState {
    /// 0 when no flush has ever been recorded (or a clear wiped it).
    pub last_flush_at: u64,
    /// Ascending `queued_at`.
    pub insights: Vec<QueuedInsight>,
}

/// When to fire a flush.
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    pub min_insights_to_flush: usize,
    pub max_flush_interval_ms: u64,
}

struct Cache {
    last_flush_at: Option<u64>,
    dir_ready: bool,
}

/// JSONL-backed insight queue. Owned by exactly one responder per path.
pub struct AccumulatorStore {
    path: PathBuf,
    cooldown_ms: u64,
    policy: FlushPolicy,
    // One mutex serializes appends and guards the read-side cache.
    cache: tokio::sync::Mutex<Cache>,
}

impl AccumulatorStore {
    pub fn new(path: PathBuf, cooldown_ms: u64, policy: FlushPolicy) -> Self {
        Self {
            path,
            cooldown_ms,
            policy,
            cache: tokio::sync::Mutex::new(Cache {
                last_flush_at: None,
                dir_ready: false,
            }),
        }
    }

    /// Append an insight record. A later record with the same id fully
    /// replaces the earlier one at read time.
    pub async fn enqueue(&self, insight: QueuedInsight) -> Result<(), StoreError> {
        debug!(id = %insight.id, path = %self.path.display(), "Insight enqueued");
        self.append(&LogLine::Insight { data: insight }).await
    }

    /// Replay the log into the current queue, ascending `queued_at`.
    pub async fn get_queue(&self) -> Result<Vec<QueuedInsight>, StoreError> {
        Ok(self.replay().await?.insights)
    }

    /// Insights whose age at `now` has reached the cooldown (boundary
    /// inclusive: `now − queued_at ≥ cooldown`).
    pub async fn get_settled(&self, now: u64) -> Result<Vec<QueuedInsight>, StoreError> {
        let queue = self.get_queue().await?;
        Ok(queue
            .into_iter()
            .filter(|i| now.saturating_sub(i.queued_at) >= self.cooldown_ms)
            .collect())
    }

    /// Append a dequeue record. No-op when `ids` is empty.
    pub async fn dequeue(&self, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.append(&LogLine::Dequeue { ids: ids.to_vec() }).await
    }

    /// Decide whether a flush should fire for the given settled set.
    pub async fn should_flush(
        &self,
        settled: &[QueuedInsight],
        now: u64,
    ) -> Result<Option<FlushTrigger>, StoreError> {
        let last_flush_at = self.last_flush_at().await?;
        Ok(decide_flush(settled, last_flush_at, now, self.policy))
    }

    /// Record a completed flush at `now`.
    pub async fn record_flush(&self, now: u64) -> Result<(), StoreError> {
        self.append(&LogLine::Flush { at: now }).await?;
        self.cache.lock().await.last_flush_at = Some(now);
        Ok(())
    }

    /// Wipe the queue. Replay treats everything before the clear marker as
    /// gone, and the flush cache resets to 0.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.append(&LogLine::Clear).await?;
        self.cache.lock().await.last_flush_at = Some(0);
        Ok(())
    }

    /// Cached after the first full read; 0 means "never flushed".
    pub async fn last_flush_at(&self) -> Result<u64, StoreError> {
        if let Some(cached) = self.cache.lock().await.last_flush_at {
            return Ok(cached);
        }
        Ok(self.replay().await?.last_flush_at)
    }

    async fn replay(&self) -> Result<QueueState, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut order: Vec<String> = Vec::new();
        let mut by_id: std::collections::HashMap<String, QueuedInsight> =
            std::collections::HashMap::new();
        let mut last_flush_at = 0u64;

        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: LogLine = match serde_json::from_str(line) {
                Ok(parsed) => parsed,
                Err(error) => {
                    debug!(error = %error, "Skipping malformed queue line");
                    continue;
                }
            };
            match parsed {
                LogLine::Insight { data } => {
                    if by_id.insert(data.id.clone(), data.clone()).is_none() {
                        order.push(data.id);
                    }
                }
                LogLine::Dequeue { ids } => {
                    for id in &ids {
                        by_id.remove(id);
                    }
                }
                LogLine::Flush { at } => last_flush_at = at,
                LogLine::Clear => {
                    order.clear();
                    by_id.clear();
                    last_flush_at = 0;
                }
            }
        }

        let mut insights: Vec<QueuedInsight> = order
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect();
        insights.sort_by_key(|i| i.queued_at);

        self.cache.lock().await.last_flush_at = Some(last_flush_at);
        Ok(QueueState {
            last_flush_at,
            insights,
        })
    }

    async fn append(&self, line: &LogLine) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        if !cache.dir_ready {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        warn!(dir = %parent.display(), error = %e, "Could not create queue directory");
                        e
                    })?;
                }
            }
            cache.dir_ready = true;
        }

        let mut encoded = serde_json::to_string(line)?;
        encoded.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(encoded.as_bytes()).await?;
        Ok(())
    }
}

/// Pure flush decision over the settled set, the cached last-flush time,
/// and the policy. Count has priority over time.
pub fn decide_flush(
    settled: &[QueuedInsight],
    last_flush_at: u64,
    now: u64,
    policy: FlushPolicy,
) -> Option<FlushTrigger> {
    if settled.len() >= policy.min_insights_to_flush {
        return Some(FlushTrigger::Count);
    }
    if settled.is_empty() {
        return None;
    }
    if last_flush_at > 0 {
        if now.saturating_sub(last_flush_at) >= policy.max_flush_interval_ms {
            return Some(FlushTrigger::Time);
        }
        return None;
    }
    // Never flushed: measure from the oldest settled insight instead.
    let oldest = settled.iter().map(|i| i.queued_at).min().unwrap_or(now);
    if now.saturating_sub(oldest) >= policy.max_flush_interval_ms {
        return Some(FlushTrigger::Time);
    }
    None
}
