//! Insight extractor end-to-end scenarios
//!
//! Drives the extractor through the public API: signals in, LLM calls and
//! `insight-extracted` emissions out. Timers run on tokio's paused clock so
//! the debounce/batch windows are exact.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use openclaw::config::ExtractorConfig;
use openclaw::types::NoteModifiedPayload;
use openclaw::{
    ChatEndpoint, InsightExtractor, ManualClock, Signal, SignalBus, SignalPayload,
};

/// Chat endpoint that records every user prompt and returns one insight.
struct RecordingChat {
    calls: Mutex<Vec<String>>,
}

impl RecordingChat {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatEndpoint for RecordingChat {
    async fn chat(&self, _system: &str, user: &str) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(user.to_string());
        Ok(r#"[{"topic": "t", "pillar": null, "hook": "h", "excerpt": "e",
                "scores": {"topicClarity": 1, "publishReady": 1, "novelty": 1},
                "formats": ["thread"]}]"#
            .to_string())
    }
}

fn note_signal(path: &str, content: &str) -> Signal {
    Signal::new(
        1,
        SignalPayload::NoteModified(NoteModifiedPayload {
            path: path.to_string(),
            content: content.to_string(),
            frontmatter: Value::Null,
        }),
    )
}

fn pipeline(config: ExtractorConfig) -> (Arc<SignalBus>, Arc<RecordingChat>, Arc<InsightExtractor>) {
    let bus = Arc::new(SignalBus::new());
    let chat = RecordingChat::new();
    let extractor = InsightExtractor::new(
        config,
        chat.clone(),
        Arc::clone(&bus),
        Arc::new(ManualClock::at(1_000)),
    );
    extractor.register();
    (bus, chat, extractor)
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_debounce_to_one_llm_call_with_the_latest_content() {
    let (bus, chat, _extractor) = pipeline(ExtractorConfig {
        debounce_ms: 100,
        min_batch_delay_ms: 50,
        max_batch_size: 5,
        min_content_length: 5,
        ..ExtractorConfig::default()
    });

    for content in [
        "::publish\n\nFirst draft of the thought.",
        "::publish\n\nSecond pass, refined.",
        "::publish\n\nThird and final version.",
    ] {
        bus.emit(note_signal("/j.md", content)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    let calls = chat.calls();
    assert_eq!(calls.len(), 1, "exactly one extraction for the burst");
    assert!(
        calls[0].contains("Third and final"),
        "latest content wins: {:?}",
        calls[0]
    );
}

#[tokio::test(start_paused = true)]
async fn underweight_content_never_reaches_the_llm() {
    let (bus, chat, _extractor) = pipeline(ExtractorConfig {
        debounce_ms: 100,
        min_batch_delay_ms: 50,
        max_batch_size: 5,
        min_content_length: 50,
        ..ExtractorConfig::default()
    });

    bus.emit(note_signal("/j.md", "::publish\n\nShort")).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(chat.calls().is_empty(), "no LLM call for underweight content");
}

#[tokio::test(start_paused = true)]
async fn notes_without_the_magic_string_are_ignored() {
    let (bus, chat, _extractor) = pipeline(ExtractorConfig {
        debounce_ms: 100,
        min_batch_delay_ms: 50,
        max_batch_size: 5,
        min_content_length: 5,
        ..ExtractorConfig::default()
    });

    bus.emit(note_signal("/j.md", "just a regular note, long enough to pass"))
        .await;
    bus.emit(note_signal("/_cadence-weekly.md", "::publish\n\ngenerated digest file"))
        .await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(chat.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn distinct_paths_extract_independently() {
    let (bus, chat, extractor) = pipeline(ExtractorConfig {
        debounce_ms: 100,
        min_batch_delay_ms: 50,
        max_batch_size: 5,
        min_content_length: 5,
        ..ExtractorConfig::default()
    });

    bus.emit(note_signal("/a.md", "::publish\n\nfirst note body")).await;
    bus.emit(note_signal("/b.md", "::publish\n\nsecond note body")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(chat.calls().len(), 2);
    assert_eq!(extractor.stats().insights_emitted, 2);
}
