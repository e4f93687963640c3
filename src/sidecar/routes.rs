//! Tool route table
//!
//! One entry per sidecar tool; adding a tool is a one-line change here.
//! The table is versioned with the sidecar API: both transports resolve
//! tool names through it, so their timeout behavior stays identical.

/// Default `call_tool` timeout.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

const INGEST_TIMEOUT_SECS: u64 = 60;
const FEEDBACK_TIMEOUT_SECS: u64 = 10;

/// HTTP method for a tool route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMethod {
    Get,
    Post,
}

/// Static description of one tool's HTTP mapping.
#[derive(Debug, Clone, Copy)]
pub struct ToolRoute {
    pub tool: &'static str,
    pub method: RouteMethod,
    /// Path template; `{name}` placeholders are filled from args.
    pub path: &'static str,
    /// Arg keys substituted into the path (URL-encoded; missing is an error).
    pub path_params: &'static [&'static str],
    /// Arg keys lifted into the query string when present.
    pub query_params: &'static [&'static str],
    pub timeout_secs: u64,
}

const fn get(tool: &'static str, path: &'static str) -> ToolRoute {
    ToolRoute {
        tool,
        method: RouteMethod::Get,
        path,
        path_params: &[],
        query_params: &[],
        timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
    }
}

const fn post(tool: &'static str, path: &'static str) -> ToolRoute {
    ToolRoute {
        tool,
        method: RouteMethod::Post,
        path,
        path_params: &[],
        query_params: &[],
        timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
    }
}

const fn post_with_timeout(tool: &'static str, path: &'static str, timeout_secs: u64) -> ToolRoute {
    ToolRoute {
        tool,
        method: RouteMethod::Post,
        path,
        path_params: &[],
        query_params: &[],
        timeout_secs,
    }
}

/// The closed tool list, versioned with the sidecar API.
pub const ROUTES: &[ToolRoute] = &[
    get("health", "/v1/health"),
    get("status", "/v1/status"),
    get("domains", "/v1/domains"),
    get("stats", "/v1/stats"),
    post("query", "/v1/query"),
    post_with_timeout("feedback", "/v1/feedback", FEEDBACK_TIMEOUT_SECS),
    post_with_timeout("ingest", "/v1/ingest", INGEST_TIMEOUT_SECS),
    post_with_timeout("ingest_text", "/v1/ingest/text", INGEST_TIMEOUT_SECS),
    post_with_timeout("ingest_file", "/v1/ingest/file", INGEST_TIMEOUT_SECS),
    post_with_timeout("ingest_batch", "/v1/ingest/batch", INGEST_TIMEOUT_SECS),
    post("explore", "/v1/explore"),
    get("rules", "/v1/rules"),
    post("learning_select", "/v1/learning/select"),
    post("learning_observe", "/v1/learning/observe"),
    ToolRoute {
        tool: "learning_posteriors",
        method: RouteMethod::Get,
        path: "/v1/learning/{learner}/posteriors",
        path_params: &["learner"],
        query_params: &[],
        timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
    },
    ToolRoute {
        tool: "learning_metrics",
        method: RouteMethod::Get,
        path: "/v1/learning/{learner}/metrics",
        path_params: &["learner"],
        query_params: &["window"],
        timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
    },
    post("learning_reset", "/v1/learning/reset"),
    post("learning_session_start", "/v1/learning/sessions/start"),
    post("learning_session_end", "/v1/learning/sessions/end"),
];

/// Look a tool up by name.
pub fn route_for(tool: &str) -> Option<&'static ToolRoute> {
    ROUTES.iter().find(|route| route.tool == tool)
}
