//! Sidecar Connection — transport-abstracted IPC to the qortex sidecar
//!
//! Two transports implement the same contract: a spawned subprocess speaking
//! line-delimited JSON frames over stdio, and a plain HTTP REST client. The
//! two must be behaviorally indistinguishable from the caller's view.
//!
//! One connection is shared process-wide: it is created once at boot, kept
//! until process exit, and passed by reference to every consumer. The
//! process-wide slot exists for layers that cannot receive the connection
//! at construction time; prefer passing it explicitly.

mod http;
mod routes;
mod stdio;

pub use http::HttpSidecarConnection;
pub use routes::{route_for, RouteMethod, ToolRoute, DEFAULT_TOOL_TIMEOUT_SECS};
pub use stdio::{StdioCommand, StdioSidecarConnection};

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

/// Errors surfaced by a sidecar connection.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("sidecar command not allowed: {0}")]
    CommandNotAllowed(String),
    #[error("sidecar handshake failed: {0}")]
    Handshake(String),
    #[error("sidecar not connected")]
    NotConnected,
    #[error("sidecar call timed out after {0:?}")]
    Timeout(Duration),
    #[error("sidecar tool error: {0}")]
    Tool(String),
    #[error("malformed sidecar response: {0}")]
    MalformedResponse(String),
    #[error("no route for tool: {0}")]
    UnknownTool(String),
    #[error("missing path parameter {param} for tool {tool}")]
    MissingPathParam { tool: String, param: String },
    #[error("sidecar http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sidecar returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("sidecar io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sidecar process exited")]
    ProcessExited,
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Overrides the tool's default timeout.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// The transport-agnostic connection contract.
#[async_trait]
pub trait SidecarConnection: Send + Sync {
    /// Establish the connection (handshake or health probe).
    async fn init(&self) -> Result<(), SidecarError>;

    fn is_connected(&self) -> bool;

    /// Invoke a named tool and return its parsed response value.
    async fn call_tool(
        &self,
        name: &str,
        args: Value,
        opts: CallOptions,
    ) -> Result<Value, SidecarError>;

    /// Tear the connection down. Best-effort; never fails loudly.
    async fn close(&self);
}

/// Truncate a payload excerpt for error messages.
fn excerpt(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut cut = limit;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &text[..cut])
    }
}

// ============================================================================
// Process-wide shared connection
// ============================================================================

static SHARED_CONNECTION: RwLock<Option<Arc<dyn SidecarConnection>>> = RwLock::new(None);

/// Install the process-wide connection. Set once at boot.
pub fn set_shared_connection(connection: Arc<dyn SidecarConnection>) {
    let mut slot = SHARED_CONNECTION
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        warn!("Shared sidecar connection replaced — expected to be set once at boot");
    }
    *slot = Some(connection);
}

/// The process-wide connection, when one has been installed.
pub fn shared_connection() -> Option<Arc<dyn SidecarConnection>> {
    SHARED_CONNECTION
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Drop the process-wide connection (tests and shutdown paths).
pub fn clear_shared_connection() {
    *SHARED_CONNECTION
        .write()
        .unwrap_or_else(PoisonError::into_inner) = None;
}

/// Close the shared connection best-effort when the process receives
/// SIGTERM/SIGINT. Spawned once by the host at boot.
pub fn register_exit_cleanup() -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        if let Some(connection) = shared_connection() {
            info!("Shutdown signal received — closing sidecar connection");
            connection.close().await;
        }
        clear_shared_connection();
    })
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(error) => {
            warn!(error = %error, "Could not install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_truncates_and_marks() {
        assert_eq!(excerpt("short", 200), "short");
        let long = "x".repeat(300);
        let cut = excerpt(&long, 200);
        assert!(cut.len() <= 204); // 200 bytes + ellipsis
        assert!(cut.ends_with('…'));
    }

    struct DummyConnection;

    #[async_trait]
    impl SidecarConnection for DummyConnection {
        async fn init(&self) -> Result<(), SidecarError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn call_tool(
            &self,
            _name: &str,
            _args: Value,
            _opts: CallOptions,
        ) -> Result<Value, SidecarError> {
            Ok(Value::Null)
        }
        async fn close(&self) {}
    }

    #[test]
    fn shared_slot_set_get_clear() {
        clear_shared_connection();
        assert!(shared_connection().is_none());
        set_shared_connection(Arc::new(DummyConnection));
        assert!(shared_connection().is_some());
        clear_shared_connection();
        assert!(shared_connection().is_none());
    }
}
