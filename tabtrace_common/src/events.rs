//! Lifecycle events flowing into the host and live updates flowing out of it

use crate::model::{CallRecord, Headers, TabId};
use serde::{Deserialize, Serialize};

/// Resource types the host records; everything else is page loading noise
const TRACKED_RESOURCE_TYPES: &[&str] = &["xmlhttprequest", "fetch"];

/// A single `name: value` pair as reported by the observation hooks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Collapse observed header entries into a map, skipping entries without a value
pub fn headers_to_map(entries: &[HeaderEntry]) -> Headers {
    entries
        .iter()
        .filter_map(|entry| {
            entry
                .value
                .as_ref()
                .map(|value| (entry.name.clone(), value.clone()))
        })
        .collect()
}

/// A request is about to leave the browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStarted {
    pub request_id: String,
    pub tab_id: TabId,
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    /// Raw request body bytes, base64 on the wire
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub raw_body: Option<Vec<u8>>,
    #[serde(default)]
    pub resource_type: Option<String>,
    pub timestamp_ms: f64,
}

/// The final outgoing header set is known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHeadersSent {
    pub request_id: String,
    pub tab_id: TabId,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    #[serde(default)]
    pub resource_type: Option<String>,
    pub timestamp_ms: f64,
}

/// The response finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCompleted {
    pub request_id: String,
    pub tab_id: TabId,
    pub url: String,
    pub status_code: u16,
    #[serde(default)]
    pub headers: Option<Vec<HeaderEntry>>,
    #[serde(default)]
    pub resource_type: Option<String>,
    pub timestamp_ms: f64,
}

/// The request failed or was aborted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestErrored {
    pub request_id: String,
    pub tab_id: TabId,
    pub url: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    pub timestamp_ms: f64,
}

/// Raw lifecycle event from the browser's network observation hooks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ObservationEvent {
    RequestInitiated(RequestStarted),
    HeadersAboutToSend(RequestHeadersSent),
    Completed(RequestCompleted),
    Errored(RequestErrored),
}

impl ObservationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ObservationEvent::RequestInitiated(_) => "request-initiated",
            ObservationEvent::HeadersAboutToSend(_) => "headers-about-to-send",
            ObservationEvent::Completed(_) => "completed",
            ObservationEvent::Errored(_) => "errored",
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            ObservationEvent::RequestInitiated(e) => &e.request_id,
            ObservationEvent::HeadersAboutToSend(e) => &e.request_id,
            ObservationEvent::Completed(e) => &e.request_id,
            ObservationEvent::Errored(e) => &e.request_id,
        }
    }

    pub fn tab_id(&self) -> TabId {
        match self {
            ObservationEvent::RequestInitiated(e) => e.tab_id,
            ObservationEvent::HeadersAboutToSend(e) => e.tab_id,
            ObservationEvent::Completed(e) => e.tab_id,
            ObservationEvent::Errored(e) => e.tab_id,
        }
    }

    fn resource_type(&self) -> Option<&str> {
        match self {
            ObservationEvent::RequestInitiated(e) => e.resource_type.as_deref(),
            ObservationEvent::HeadersAboutToSend(e) => e.resource_type.as_deref(),
            ObservationEvent::Completed(e) => e.resource_type.as_deref(),
            ObservationEvent::Errored(e) => e.resource_type.as_deref(),
        }
    }

    /// Whether the event belongs to a tab and to an API-style request
    pub fn is_tracked(&self) -> bool {
        self.tab_id() >= 0
            && self
                .resource_type()
                .map_or(true, |kind| TRACKED_RESOURCE_TYPES.contains(&kind))
    }
}

/// Accepts either a single event or a batch in one request body
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EventBatch {
    Many(Vec<ObservationEvent>),
    One(ObservationEvent),
}

impl EventBatch {
    pub fn into_events(self) -> Vec<ObservationEvent> {
        match self {
            EventBatch::Many(events) => events,
            EventBatch::One(event) => vec![event],
        }
    }
}

/// Tab lifecycle notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum TabEvent {
    /// The user switched to this tab
    Activated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        title: Option<String>,
    },
    /// The tab's page changed; `status` is `"complete"` once loading finished
    Updated {
        tab_id: TabId,
        url: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        status: Option<String>,
    },
    /// The tab was closed
    Removed { tab_id: TabId },
}

impl TabEvent {
    pub fn tab_id(&self) -> TabId {
        match self {
            TabEvent::Activated { tab_id, .. }
            | TabEvent::Updated { tab_id, .. }
            | TabEvent::Removed { tab_id } => *tab_id,
        }
    }
}

/// Events broadcast to live subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum SessionEvent {
    SessionStarted {
        tab_id: TabId,
        session_id: String,
        domain: String,
    },
    CallRecorded { tab_id: TabId, call: CallRecord },
    CallUpdated { tab_id: TabId, call: CallRecord },
    SessionEnded { tab_id: TabId, session_id: String },
    Cleared,
}

/// Optional `Vec<u8>` as base64
mod base64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => STANDARD
                .decode(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
