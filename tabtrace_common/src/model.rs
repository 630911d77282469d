//! Call and session records shared by the host and its clients

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Browser tab identifier. Negative ids mean "not attached to a tab".
pub type TabId = i64;

/// Header name to value mapping, kept ordered so persisted blobs are stable
pub type Headers = BTreeMap<String, String>;

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// How much detail passive capture retains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// URL, method, status and timing only
    #[default]
    Reduced,
    /// Headers and bodies as well
    Full,
}

impl CaptureMode {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            CaptureMode::Full
        } else {
            CaptureMode::Reduced
        }
    }

    pub fn is_full(self) -> bool {
        matches!(self, CaptureMode::Full)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Reduced => "reduced",
            CaptureMode::Full => "full",
        }
    }
}

/// One observed request/response exchange
///
/// Header and body fields are `None` when they were not captured at all and
/// `Some` (possibly empty) when capture was on. Consumers rely on that
/// difference, so never collapse one into the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: String,
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Headers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Headers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    /// `0` while pending and for network errors / aborts
    pub status_code: u16,
    /// Request-initiated time, epoch milliseconds
    pub timestamp: i64,
    /// Unrounded initiated time as the observer reported it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl CallRecord {
    /// Record id for a host-observed request
    pub fn observed_id(request_id: &str) -> String {
        format!("req-{}", request_id)
    }

    /// Create a pending record for a request the host just saw start
    pub fn observed(
        request_id: &str,
        url: String,
        method: String,
        timestamp: i64,
        mode: CaptureMode,
        request_body: Option<String>,
    ) -> Self {
        let full = mode.is_full();
        Self {
            id: Self::observed_id(request_id),
            url,
            method,
            request_headers: full.then(Headers::new),
            request_body: if full { request_body } else { None },
            response_headers: full.then(Headers::new),
            response_body: None,
            status_code: 0,
            timestamp,
            started_at: None,
            duration: None,
        }
    }

    /// Start time in epoch milliseconds, at the finest precision known
    pub fn start_ms(&self) -> f64 {
        self.started_at.unwrap_or(self.timestamp as f64)
    }

    /// A record reaches its closed state once a terminal event set its duration
    pub fn is_closed(&self) -> bool {
        self.duration.is_some()
    }

    /// Apply a terminal event. Returns `false` and leaves the record untouched
    /// if it was already closed.
    pub fn close(
        &mut self,
        status_code: u16,
        duration: f64,
        response_headers: Option<Headers>,
    ) -> bool {
        if self.is_closed() {
            return false;
        }
        self.status_code = status_code;
        self.duration = Some(duration);
        if let Some(headers) = response_headers {
            self.response_headers = Some(headers);
        }
        true
    }

    /// Drop every header and body field (reduced capture)
    pub fn strip_detail(&mut self) {
        self.request_headers = None;
        self.request_body = None;
        self.response_headers = None;
        self.response_body = None;
    }

    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Bytes carried in request and response bodies (UTF-8 length)
    pub fn bandwidth(&self) -> usize {
        self.request_body.as_deref().map_or(0, str::len)
            + self.response_body.as_deref().map_or(0, str::len)
    }
}

/// Pretty-print a body for display if it parses as JSON, otherwise return it unchanged
pub fn pretty_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| body.to_string())
}

/// Merge call lists coming from several observation paths, keeping the first
/// record seen for each id
pub fn dedupe_calls<I>(calls: I) -> Vec<CallRecord>
where
    I: IntoIterator<Item = CallRecord>,
{
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .filter(|call| seen.insert(call.id.clone()))
        .collect()
}

/// One browsing-context capture window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub domain: String,
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    /// Ordered by arrival of each record's first event
    #[serde(default)]
    pub api_calls: Vec<CallRecord>,
}

impl Session {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            id: format!("session-{}", Uuid::new_v4()),
            domain: domain.into(),
            start_time: now_ms(),
            end_time: None,
            api_calls: Vec::new(),
        }
    }

    pub fn find_call(&self, id: &str) -> Option<&CallRecord> {
        self.api_calls.iter().find(|call| call.id == id)
    }

    pub fn find_call_mut(&mut self, id: &str) -> Option<&mut CallRecord> {
        self.api_calls.iter_mut().find(|call| call.id == id)
    }

    /// Mark the session ended, keeping the first end time if called twice
    pub fn end(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(now_ms());
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// An active session together with the tab that owns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSession {
    pub tab_id: TabId,
    pub session: Session,
}

/// The host's view of what a tab currently shows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub tab_id: TabId,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Entry in the bounded visited-URL history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlHistoryEntry {
    pub tab_id: TabId,
    pub url: String,
    pub title: String,
    pub timestamp: i64,
}

/// Saved request-builder form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPreset {
    pub id: String,
    pub name: String,
    pub method: String,
    pub url: String,
    /// Header object as JSON text, exactly as typed in the form
    #[serde(default)]
    pub headers: String,
    #[serde(default)]
    pub body: String,
    pub created_at: i64,
}

impl RequestPreset {
    pub fn new(
        name: String,
        method: String,
        url: String,
        headers: String,
        body: String,
    ) -> Self {
        Self {
            id: format!("preset-{}", Uuid::new_v4()),
            name,
            method,
            url,
            headers,
            body,
            created_at: now_ms(),
        }
    }
}
