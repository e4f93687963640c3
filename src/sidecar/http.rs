//! HTTP transport for the sidecar connection
//!
//! Thin REST client over the static route table. Requests carry per-tool
//! timeouts, 5xx responses retry with bounded backoff, and 4xx responses
//! fail fast with the server's `error` field when it provides one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::routes::{route_for, RouteMethod, ToolRoute};
use super::{excerpt, CallOptions, SidecarConnection, SidecarError};

const INIT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(2);

/// REST client for a qortex sidecar reachable over HTTP.
pub struct HttpSidecarConnection {
    http: reqwest::Client,
    base_url: String,
    headers: HashMap<String, String>,
    connected: AtomicBool,
}

impl HttpSidecarConnection {
    pub fn new(base_url: &str, headers: HashMap<String, String>) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("Failed to build HTTP client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
            connected: AtomicBool::new(false),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_once(
        &self,
        route: &ToolRoute,
        prepared: &PreparedCall,
        timeout: Duration,
    ) -> Result<reqwest::Response, SidecarError> {
        let url = format!("{}{}", self.base_url, prepared.path_and_query);
        let mut request = match route.method {
            RouteMethod::Get => self.http.get(&url),
            RouteMethod::Post => self.http.post(&url),
        };
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &prepared.body {
            request = request.json(body);
        }
        Ok(request.timeout(timeout).send().await?)
    }
}

#[async_trait]
impl SidecarConnection for HttpSidecarConnection {
    /// Probe `/v1/health`; non-2xx is a failed init.
    async fn init(&self) -> Result<(), SidecarError> {
        let url = format!("{}/v1/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(INIT_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SidecarError::Status {
                status: response.status().as_u16(),
                message: "health check failed".to_string(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(base_url = %self.base_url, "Sidecar HTTP connection established");
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
        let route = route_for(name).ok_or_else(|| SidecarError::UnknownTool(name.to_string()))?;
        let prepared = prepare_call(route, args)?;
        let timeout = opts
            .timeout
            .unwrap_or(Duration::from_secs(route.timeout_secs));

        let mut attempt = 1;
        let response = loop {
            let response = self.send_once(route, &prepared, timeout).await?;
            let status = response.status();
            if status.is_server_error() && attempt < MAX_ATTEMPTS {
                let backoff = backoff_delay(attempt);
                warn!(
                    tool = name,
                    status = status.as_u16(),
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Sidecar 5xx — retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
                continue;
            }
            break response;
        };

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            // Prefer the server's error field over the bare status code.
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            return Err(SidecarError::Status {
                status: status.as_u16(),
                message,
            });
        }

        debug!(tool = name, bytes = text.len(), "Sidecar call complete");
        parse_body(&text)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// A fully-resolved request: path with query string, plus an optional body.
#[derive(Debug, Clone, PartialEq)]
struct PreparedCall {
    path_and_query: String,
    body: Option<Value>,
}

/// Resolve a route against call args: substitute path params, lift query
/// params, and use whatever remains as the POST body.
fn prepare_call(route: &ToolRoute, args: Value) -> Result<PreparedCall, SidecarError> {
    let mut args = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            // Non-object args: nothing to lift; POST sends the value as-is.
            return Ok(PreparedCall {
                path_and_query: route.path.to_string(),
                body: match route.method {
                    RouteMethod::Post => Some(other),
                    RouteMethod::Get => None,
                },
            });
        }
    };

    let mut path = route.path.to_string();
    for param in route.path_params {
        let value = args
            .remove(*param)
            .ok_or_else(|| SidecarError::MissingPathParam {
                tool: route.tool.to_string(),
                param: (*param).to_string(),
            })?;
        path = path.replace(
            &format!("{{{param}}}"),
            &url_encode(&value_to_param(&value)),
        );
    }

    let mut query_pairs: Vec<String> = Vec::new();
    for param in route.query_params {
        if let Some(value) = args.remove(*param) {
            if value.is_null() {
                continue;
            }
            query_pairs.push(format!(
                "{}={}",
                url_encode(param),
                url_encode(&value_to_param(&value))
            ));
        }
    }
    if !query_pairs.is_empty() {
        path.push('?');
        path.push_str(&query_pairs.join("&"));
    }

    let body = match route.method {
        RouteMethod::Post => Some(Value::Object(args)),
        RouteMethod::Get => None,
    };

    Ok(PreparedCall {
        path_and_query: path,
        body,
    })
}

/// Empty body becomes an empty record; anything else must be valid JSON.
fn parse_body(text: &str) -> Result<Value, SidecarError> {
    if text.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(text)
        .map_err(|_| SidecarError::MalformedResponse(excerpt(text, 200)))
}

fn backoff_delay(attempt: u32) -> Duration {
    (BACKOFF_BASE * 2u32.saturating_pow(attempt - 1)).min(BACKOFF_CAP)
}

fn value_to_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Percent-encode everything outside the unreserved set.
fn url_encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}
