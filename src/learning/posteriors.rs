//! Posterior persistence
//!
//! Beta posteriors live in one JSON file keyed by arm id. The file is small
//! (hundreds of arms at most), so load/save reads and rewrites it whole.
//! A missing or corrupt file is an empty posterior map, never a crash.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::types::Posterior;

/// Posterior persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PosteriorStoreError {
    #[error("posterior io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("posterior serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON-file-backed posterior map.
pub struct PosteriorStore {
    path: PathBuf,
}

impl PosteriorStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load every persisted posterior. Missing file means no history;
    /// a corrupt file is logged and treated as empty.
    pub async fn load(&self) -> HashMap<String, Posterior> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No posterior file yet");
                return HashMap::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read posteriors");
                return HashMap::new();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(posteriors) => posteriors,
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    error = %error,
                    "Corrupt posterior file — starting from priors"
                );
                HashMap::new()
            }
        }
    }

    /// Persist the full posterior map, creating the directory on first use.
    pub async fn save(
        &self,
        posteriors: &HashMap<String, Posterior>,
    ) -> Result<(), PosteriorStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let encoded = serde_json::to_string_pretty(posteriors)?;
        tokio::fs::write(&self.path, encoded).await?;
        Ok(())
    }
}
