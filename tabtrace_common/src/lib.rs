//! tabtrace common - shared model and message contract
//!
//! This crate holds the call/session record model, the lifecycle events the
//! observation sources push into the host, and the request/response message
//! contract the extension UI speaks.

pub mod events;
pub mod model;

pub use events::{
    headers_to_map, EventBatch, HeaderEntry, ObservationEvent, RequestCompleted,
    RequestErrored, RequestHeadersSent, RequestStarted, SessionEvent, TabEvent,
};
pub use model::{
    dedupe_calls, now_ms, pretty_body, CallRecord, CaptureMode, Headers, RequestPreset,
    Session, TabId, TabInfo, TabSession, UrlHistoryEntry,
};

use serde::{Deserialize, Serialize};

/// UI to host requests. Every message gets exactly one [`Reply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Message {
    /// Calls of one tab's active session
    GetApiCalls {
        #[serde(default)]
        tab_id: Option<TabId>,
    },
    /// Calls of every active session, deduplicated by id
    GetAllApiCalls,
    GetSessionInfo {
        #[serde(default)]
        tab_id: Option<TabId>,
    },
    /// Historical session log
    GetAllSessions,
    GetAllActiveSessions,
    SaveSession { session: Session },
    ClearSessions,
    SetFullInfoMode { enabled: bool },
    GetFullInfoMode,
    GetTabInfo { tab_id: TabId },
    /// Batch pushed by the in-page observer
    ContentApiCalls {
        tab_id: TabId,
        api_calls: Vec<CallRecord>,
    },
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::GetApiCalls { .. } => "GET_API_CALLS",
            Message::GetAllApiCalls => "GET_ALL_API_CALLS",
            Message::GetSessionInfo { .. } => "GET_SESSION_INFO",
            Message::GetAllSessions => "GET_ALL_SESSIONS",
            Message::GetAllActiveSessions => "GET_ALL_ACTIVE_SESSIONS",
            Message::SaveSession { .. } => "SAVE_SESSION",
            Message::ClearSessions => "CLEAR_SESSIONS",
            Message::SetFullInfoMode { .. } => "SET_FULL_INFO_MODE",
            Message::GetFullInfoMode => "GET_FULL_INFO_MODE",
            Message::GetTabInfo { .. } => "GET_TAB_INFO",
            Message::ContentApiCalls { .. } => "CONTENT_API_CALLS",
        }
    }
}

/// Host response to a [`Message`]
///
/// Serialized without a tag so each reply has the bare shape the UI expects
/// (an array of calls, a session or `null`, `{"success": true}`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    ApiCalls(Vec<CallRecord>),
    Session(Option<Session>),
    Sessions(Vec<Session>),
    ActiveSessions(Vec<TabSession>),
    FullInfoMode { enabled: bool },
    TabInfo(Option<TabInfo>),
    Ack(Ack),
}

/// Success flag for mutating messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Reply body for `GET_FULL_INFO_MODE`, as read by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullInfoMode {
    pub enabled: bool,
}

/// Constants shared by the host and its clients
pub mod constants {
    /// Storage key for the historical session log
    pub const SESSIONS_KEY: &str = "tabtrace_sessions";

    /// Storage key prefix for the per-tab active session slot
    pub const ACTIVE_SESSION_PREFIX: &str = "tabtrace_active_session_";

    /// Storage key for the capture-mode flag
    pub const FULL_INFO_MODE_KEY: &str = "tabtrace_full_info_mode";

    /// Storage key for the analytics result cache
    pub const ANALYTICS_CACHE_KEY: &str = "tabtrace_analytics_cache";

    /// Storage key for visited URL history
    pub const URL_HISTORY_KEY: &str = "tabtrace_url_history";

    /// Storage key for the URL history bound
    pub const MAX_HISTORY_SIZE_KEY: &str = "tabtrace_max_history_size";

    /// Storage key for request-builder presets
    pub const PRESETS_KEY: &str = "tabtrace_request_presets";

    /// Version written into every persisted blob
    pub const SCHEMA_VERSION: u32 = 1;

    /// URL history bound when the user never changed it
    pub const DEFAULT_MAX_HISTORY_SIZE: usize = 10;

    /// Largest URL history bound the settings accept
    pub const MAX_HISTORY_SIZE_LIMIT: usize = 50;

    /// How long a cached analytics snapshot stays usable (milliseconds)
    pub const ANALYTICS_FRESHNESS_MS: i64 = 60_000;

    /// How long the host trusts its cached capture-mode flag (milliseconds)
    pub const CAPTURE_MODE_TTL_MS: u64 = 2_000;

    /// Default bound on the historical session log
    pub const MAX_STORED_SESSIONS: usize = 100;

    /// Default host port
    pub const DEFAULT_PORT: u16 = 7420;

    /// Service name reported by the health endpoint
    pub const SERVICE_NAME: &str = "tabtrace-host";
}
