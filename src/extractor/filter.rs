//! Note screening — decides which `note-modified` payloads enter the
//! extraction pipeline.
//!
//! The screen runs in payload order: path prefix exclusions on the terminal
//! filename, the magic-string sentinel, a minimum-content-length floor, and
//! finally the optional frontmatter pillar hint.

use serde_json::Value;

use crate::config::ExtractorConfig;
use crate::types::NoteModifiedPayload;

/// Filename prefixes that never enter the pipeline.
const SKIPPED_PREFIXES: [&str; 2] = ["_cadence-", "_debug-"];

/// Screen outcome for an eligible note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenedNote {
    pub pillar_hint: Option<String>,
}

/// Evaluate the filter pipeline. `None` means the note is skipped.
pub fn screen(payload: &NoteModifiedPayload, config: &ExtractorConfig) -> Option<ScreenedNote> {
    if is_skipped_path(&payload.path) {
        return None;
    }

    let trimmed = payload.content.trim_start();
    let Some(rest) = trimmed.strip_prefix(config.magic_string.as_str()) else {
        return None;
    };

    if rest.trim_start().len() < config.min_content_length {
        return None;
    }

    Some(ScreenedNote {
        pillar_hint: pillar_hint(&payload.frontmatter),
    })
}

/// Skip generated, debug, and hidden files by their terminal filename.
pub fn is_skipped_path(path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    file_name.starts_with('.')
        || SKIPPED_PREFIXES
            .iter()
            .any(|prefix| file_name.starts_with(prefix))
}

fn pillar_hint(frontmatter: &Value) -> Option<String> {
    let pillar = frontmatter.get("pillar")?.as_str()?.trim();
    if pillar.is_empty() {
        None
    } else {
        Some(pillar.to_string())
    }
}
