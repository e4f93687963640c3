//! Subprocess (stdio) transport for the sidecar connection
//!
//! Spawns the sidecar as a child process and speaks line-delimited JSON
//! frames over its stdin/stdout: requests carry an opaque id, responses
//! echo it back with either a `result` or an `error`. Results hold text
//! content blocks the client parses for JSON payloads or error markers.
//!
//! Safety rails: the binary basename must be on a fixed allow-list, only a
//! fixed set of environment prefixes is forwarded to the child, and the
//! child's stderr is piped through prefixed so sidecar diagnostics stay
//! attributable in the host's logs.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::routes::{route_for, DEFAULT_TOOL_TIMEOUT_SECS};
use super::{excerpt, CallOptions, SidecarConnection, SidecarError};
use crate::util::ids;

/// Binaries the stdio transport is willing to spawn.
const ALLOWED_COMMANDS: [&str; 5] = ["uvx", "uv", "python", "python3", "qortex"];

/// Environment prefixes forwarded to the child.
const FORWARDED_ENV_PREFIXES: [&str; 4] = ["QORTEX_", "OTEL_", "VIRTUAL_ENV", "HF_"];

/// Always forwarded on top of the prefix set: the allow-listed launchers
/// are bare names that need `PATH` resolution after `env_clear()`, and the
/// Python toolchain expects `HOME` for its caches.
const FORWARDED_ENV_EXACT: [&str; 2] = ["PATH", "HOME"];

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const STDERR_PREFIX: &str = "[qortex]";

/// Command line for the sidecar subprocess.
#[derive(Debug, Clone)]
pub struct StdioCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env_overrides: HashMap<String, String>,
}

impl StdioCommand {
    /// Split a configured command line, e.g. `"uvx qortex serve"`.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?.to_string();
        Some(Self {
            program,
            args: parts.map(str::to_string).collect(),
            env_overrides: HashMap::new(),
        })
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }
}

#[derive(Serialize)]
struct RequestFrame<'a> {
    id: &'a str,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct ResponseFrame {
    id: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<FrameError>,
}

#[derive(Debug, Deserialize)]
struct FrameError {
    message: String,
}

type PendingMap = Arc<StdMutex<HashMap<String, oneshot::Sender<ResponseFrame>>>>;

struct ProcessIo {
    stdin: ChildStdin,
    child: Child,
}

/// Sidecar connection over a spawned subprocess.
pub struct StdioSidecarConnection {
    command: StdioCommand,
    connected: Arc<AtomicBool>,
    pending: PendingMap,
    process: tokio::sync::Mutex<Option<ProcessIo>>,
}

impl StdioSidecarConnection {
    pub fn new(command: StdioCommand) -> Self {
        Self {
            command,
            connected: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            process: tokio::sync::Mutex::new(None),
        }
    }

    async fn send_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<ResponseFrame, SidecarError> {
        let id = ids::request_id();
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id.clone(), tx);

        let frame = serde_json::to_string(&RequestFrame {
            id: &id,
            method,
            params,
        })
        .map_err(|e| SidecarError::MalformedResponse(e.to_string()))?;

        {
            let mut process = self.process.lock().await;
            let Some(io) = process.as_mut() else {
                lock_pending(&self.pending).remove(&id);
                return Err(SidecarError::NotConnected);
            };
            io.stdin.write_all(frame.as_bytes()).await?;
            io.stdin.write_all(b"\n").await?;
            io.stdin.flush().await?;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(SidecarError::ProcessExited),
            Err(_) => {
                lock_pending(&self.pending).remove(&id);
                Err(SidecarError::Timeout(timeout))
            }
        }
    }
}

#[async_trait]
impl SidecarConnection for StdioSidecarConnection {
    /// Spawn the subprocess and perform the framed handshake.
    async fn init(&self) -> Result<(), SidecarError> {
        validate_command(&self.command.program)?;

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .env_clear()
            .envs(forwarded_env(
                std::env::vars(),
                &self.command.env_overrides,
            ))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SidecarError::Handshake("no stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SidecarError::Handshake("no stderr pipe".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SidecarError::Handshake("no stdin pipe".to_string()))?;

        tokio::spawn(read_stdout(
            stdout,
            Arc::clone(&self.pending),
            Arc::clone(&self.connected),
        ));
        tokio::spawn(pipe_stderr(stderr));

        *self.process.lock().await = Some(ProcessIo { stdin, child });

        let response = self
            .send_request(
                "initialize",
                json!({
                    "client": "openclaw",
                    "version": env!("CARGO_PKG_VERSION"),
                }),
                HANDSHAKE_TIMEOUT,
            )
            .await
            .map_err(|e| SidecarError::Handshake(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(SidecarError::Handshake(error.message));
        }

        self.connected.store(true, Ordering::SeqCst);
        info!(program = %self.command.program, "Sidecar subprocess connected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn call_tool(
        &self,
        name: &str,
        args: Value,
        opts: CallOptions,
    ) -> Result<Value, SidecarError> {
        if !self.is_connected() {
            return Err(SidecarError::NotConnected);
        }

        // Same per-tool defaults as the HTTP transport, so the two stay
        // behaviorally indistinguishable.
        let timeout = opts.timeout.unwrap_or_else(|| {
            Duration::from_secs(
                route_for(name)
                    .map(|route| route.timeout_secs)
                    .unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS),
            )
        });

        let response = self
            .send_request(
                "tools/call",
                json!({"name": name, "arguments": args}),
                timeout,
            )
            .await?;

        if let Some(error) = response.error {
            return Err(SidecarError::Tool(format!("{name}: {}", error.message)));
        }
        parse_tool_result(response.result.unwrap_or(Value::Null))
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut io) = self.process.lock().await.take() {
            if let Err(error) = io.child.kill().await {
                debug!(error = %error, "Sidecar process already gone");
            }
        }
        lock_pending(&self.pending).clear();
    }
}

/// Reject binaries whose basename is not on the allow-list, before spawn.
fn validate_command(program: &str) -> Result<(), SidecarError> {
    let basename = Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(program);
    if ALLOWED_COMMANDS.contains(&basename) {
        Ok(())
    } else {
        Err(SidecarError::CommandNotAllowed(basename.to_string()))
    }
}

/// Filter the host environment down to the forwarded set, then apply
/// explicit overrides on top.
fn forwarded_env(
    vars: impl Iterator<Item = (String, String)>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = vars
        .filter(|(key, _)| {
            FORWARDED_ENV_EXACT.contains(&key.as_str())
                || FORWARDED_ENV_PREFIXES
                    .iter()
                    .any(|prefix| key.starts_with(prefix))
        })
        .collect();
    for (key, value) in overrides {
        env.insert(key.clone(), value.clone());
    }
    env
}

/// Parse a tool result: take the first text content block, check for error
/// markers, and decode the JSON payload. No content means an empty record.
fn parse_tool_result(result: Value) -> Result<Value, SidecarError> {
    if result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let text = first_text_block(&result).unwrap_or_default();
        return Err(SidecarError::Tool(text));
    }

    let Some(text) = first_text_block(&result) else {
        return Ok(Value::Object(Map::new()));
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    if let Some(message) = trimmed.strip_prefix("Error:") {
        return Err(SidecarError::Tool(message.trim().to_string()));
    }
    serde_json::from_str(trimmed)
        .map_err(|_| SidecarError::MalformedResponse(excerpt(trimmed, 200)))
}

fn first_text_block(result: &Value) -> Option<String> {
    result
        .get("content")?
        .as_array()?
        .iter()
        .find(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .and_then(|block| block.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

async fn read_stdout(
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ResponseFrame>(&line) {
            Ok(frame) => match &frame.id {
                Some(id) => {
                    let sender = lock_pending(&pending).remove(id);
                    match sender {
                        Some(tx) => {
                            let _ = tx.send(frame);
                        }
                        None => debug!(id = %id, "Response frame with no pending request"),
                    }
                }
                None => debug!("Response frame without an id"),
            },
            Err(error) => debug!(error = %error, "Unparseable sidecar frame"),
        }
    }

    // EOF: the sidecar went away. Dropping the senders rejects every
    // in-flight request with ProcessExited.
    warn!("Sidecar stdout closed");
    connected.store(false, Ordering::SeqCst);
    lock_pending(&pending).clear();
}

async fn pipe_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        eprintln!("{STDERR_PREFIX} {line}");
    }
}

fn lock_pending(
    pending: &PendingMap,
) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<ResponseFrame>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_accepts_known_binaries() {
        for program in ["uvx", "uv", "python", "python3", "qortex"] {
            validate_command(program).unwrap();
        }
        validate_command("/usr/bin/python3").unwrap();
        validate_command("/home/user/.local/bin/uvx").unwrap();
    }

    #[test]
    fn allow_list_rejects_everything_else() {
        for program in ["bash", "rm", "/usr/bin/node", "python3.11"] {
            assert!(matches!(
                validate_command(program),
                Err(SidecarError::CommandNotAllowed(_))
            ));
        }
    }

    #[tokio::test]
    async fn init_rejects_disallowed_command_before_spawn() {
        let connection =
            StdioSidecarConnection::new(StdioCommand::parse("bash -c evil").unwrap());
        assert!(matches!(
            connection.init().await,
            Err(SidecarError::CommandNotAllowed(_))
        ));
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn call_tool_requires_a_connection() {
        let connection =
            StdioSidecarConnection::new(StdioCommand::parse("qortex serve").unwrap());
        assert!(matches!(
            connection.call_tool("status", Value::Null, CallOptions::default()).await,
            Err(SidecarError::NotConnected)
        ));
    }

    #[test]
    fn parses_command_lines() {
        let command = StdioCommand::parse("uvx qortex serve --profile fast").unwrap();
        assert_eq!(command.program, "uvx");
        assert_eq!(command.args, vec!["qortex", "serve", "--profile", "fast"]);
        assert!(StdioCommand::parse("   ").is_none());
    }

    #[test]
    fn env_forwarding_keeps_prefixes_and_overrides() {
        let vars = vec![
            ("QORTEX_HOME".to_string(), "/q".to_string()),
            ("OTEL_EXPORTER".to_string(), "otlp".to_string()),
            ("VIRTUAL_ENV".to_string(), "/venv".to_string()),
            ("HF_TOKEN".to_string(), "secret".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("AWS_SECRET_ACCESS_KEY".to_string(), "nope".to_string()),
            ("LANG".to_string(), "C".to_string()),
        ];
        let mut overrides = HashMap::new();
        overrides.insert("QORTEX_PROFILE".to_string(), "fast".to_string());

        let env = forwarded_env(vars.into_iter(), &overrides);
        assert_eq!(env.get("QORTEX_HOME").map(String::as_str), Some("/q"));
        assert_eq!(env.get("OTEL_EXPORTER").map(String::as_str), Some("otlp"));
        assert_eq!(env.get("VIRTUAL_ENV").map(String::as_str), Some("/venv"));
        assert_eq!(env.get("HF_TOKEN").map(String::as_str), Some("secret"));
        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert_eq!(env.get("QORTEX_PROFILE").map(String::as_str), Some("fast"));
        assert!(!env.contains_key("AWS_SECRET_ACCESS_KEY"));
        assert!(!env.contains_key("LANG"));
    }

    #[test]
    fn tool_result_parses_json_text_block() {
        let result = json!({
            "content": [{"type": "text", "text": "{\"ok\": true}"}]
        });
        assert_eq!(parse_tool_result(result).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn tool_result_empty_content_is_empty_record() {
        assert_eq!(parse_tool_result(Value::Null).unwrap(), json!({}));
        let result = json!({"content": []});
        assert_eq!(parse_tool_result(result).unwrap(), json!({}));
        let result = json!({"content": [{"type": "text", "text": "  "}]});
        assert_eq!(parse_tool_result(result).unwrap(), json!({}));
    }

    #[test]
    fn tool_result_error_markers_become_tool_errors() {
        let result = json!({
            "content": [{"type": "text", "text": "Error: domain not found"}]
        });
        assert!(matches!(
            parse_tool_result(result),
            Err(SidecarError::Tool(message)) if message == "domain not found"
        ));

        let result = json!({
            "isError": true,
            "content": [{"type": "text", "text": "broken"}]
        });
        assert!(matches!(
            parse_tool_result(result),
            Err(SidecarError::Tool(message)) if message == "broken"
        ));
    }

    #[test]
    fn tool_result_malformed_json_is_truncated() {
        let text = format!("not json {}", "y".repeat(400));
        let result = json!({"content": [{"type": "text", "text": text}]});
        match parse_tool_result(result) {
            Err(SidecarError::MalformedResponse(message)) => {
                assert!(message.len() <= 204);
            }
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }
}
