//! User-triggered replay, modify and build actions
//!
//! Each successful action adds one fully captured record to the tab's
//! session. A failed action adds nothing.

use crate::error::ActionError;
use crate::reconciler::{Placement, Reconciler};
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tabtrace_common::{now_ms, CallRecord, Headers, RequestPreset, TabId};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Replay,
    Modify,
    Build,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Replay => "replay",
            ActionKind::Modify => "modify",
            ActionKind::Build => "build",
        }
    }

    fn mint_id(self) -> String {
        format!("{}-{}", self.as_str(), Uuid::new_v4())
    }

    /// Replays keep their place in the timeline; edited and built requests show first
    fn placement(self) -> Placement {
        match self {
            ActionKind::Replay => Placement::Back,
            ActionKind::Modify | ActionKind::Build => Placement::Front,
        }
    }
}

/// A validated request ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}

/// Sends manual requests
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutgoingRequest) -> Result<TransportResponse, ActionError>;
}

/// Production transport over a shared `reqwest::Client`
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ActionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ActionError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &OutgoingRequest) -> Result<TransportResponse, ActionError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ActionError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| ActionError::Network(e.to_string()))?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// Request form as typed by the user; headers are JSON object text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestForm {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: String,
    #[serde(default)]
    pub body: String,
}

impl From<&RequestPreset> for RequestForm {
    fn from(preset: &RequestPreset) -> Self {
        Self {
            method: preset.method.clone(),
            url: preset.url.clone(),
            headers: preset.headers.clone(),
            body: preset.body.clone(),
        }
    }
}

fn parse_method(method: &str) -> Result<Method, ActionError> {
    let upper = method.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return Ok(Method::GET);
    }
    Method::from_bytes(upper.as_bytes()).map_err(|_| ActionError::InvalidMethod(method.to_string()))
}

fn parse_url(url: &str) -> Result<Url, ActionError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ActionError::MissingUrl);
    }
    let parsed = Url::parse(url).map_err(|e| ActionError::InvalidUrl(format!("{}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ActionError::InvalidUrl(format!("{}: only http and https are supported", url)));
    }
    Ok(parsed)
}

fn parse_headers(text: &str) -> Result<Headers, ActionError> {
    if text.trim().is_empty() {
        return Ok(Headers::new());
    }
    serde_json::from_str(text).map_err(|e| ActionError::InvalidHeaders(e.to_string()))
}

impl RequestForm {
    pub fn validate(&self) -> Result<OutgoingRequest, ActionError> {
        let method = parse_method(&self.method)?;
        let url = parse_url(&self.url)?;
        let headers = parse_headers(&self.headers)?;
        let body = if self.body.is_empty() || method == Method::GET || method == Method::HEAD {
            None
        } else {
            Some(self.body.clone())
        };
        Ok(OutgoingRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

pub struct ActionService {
    reconciler: Arc<Reconciler>,
    transport: Arc<dyn Transport>,
}

impl ActionService {
    pub fn new(reconciler: Arc<Reconciler>, transport: Arc<dyn Transport>) -> Self {
        Self {
            reconciler,
            transport,
        }
    }

    /// Re-send a recorded call with its captured headers (minus `Host`) and body
    pub async fn replay(&self, tab_id: TabId, call_id: &str) -> Result<CallRecord, ActionError> {
        let session = self
            .reconciler
            .session(tab_id)
            .await
            .ok_or(ActionError::NoSession(tab_id))?;
        let call = session
            .find_call(call_id)
            .ok_or_else(|| ActionError::CallNotFound(call_id.to_string()))?;

        let headers = call
            .request_headers
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("host"))
            .collect();
        let request = OutgoingRequest {
            method: parse_method(&call.method)?,
            url: parse_url(&call.url)?,
            headers,
            body: call.request_body.clone().filter(|body| !body.is_empty()),
        };

        self.execute(tab_id, ActionKind::Replay, request).await
    }

    /// Send an edited version of a request, shown first in the session
    pub async fn modify(&self, tab_id: TabId, form: &RequestForm) -> Result<CallRecord, ActionError> {
        let request = form.validate()?;
        self.require_session(tab_id).await?;
        self.execute(tab_id, ActionKind::Modify, request).await
    }

    pub async fn build(&self, tab_id: TabId, form: &RequestForm) -> Result<CallRecord, ActionError> {
        let request = form.validate()?;
        self.require_session(tab_id).await?;
        self.execute(tab_id, ActionKind::Build, request).await
    }

    /// Build from a saved preset
    pub async fn build_from_preset(
        &self,
        tab_id: TabId,
        preset_id: &str,
    ) -> Result<CallRecord, ActionError> {
        let preset = self
            .reconciler
            .gateway()
            .get_presets()
            .await
            .into_iter()
            .find(|preset| preset.id == preset_id)
            .ok_or_else(|| ActionError::PresetNotFound(preset_id.to_string()))?;
        self.build(tab_id, &RequestForm::from(&preset)).await
    }

    async fn require_session(&self, tab_id: TabId) -> Result<(), ActionError> {
        match self.reconciler.session(tab_id).await {
            Some(_) => Ok(()),
            None => Err(ActionError::NoSession(tab_id)),
        }
    }

    async fn execute(
        &self,
        tab_id: TabId,
        kind: ActionKind,
        request: OutgoingRequest,
    ) -> Result<CallRecord, ActionError> {
        let timestamp = now_ms();
        let started = Instant::now();

        let response = self.transport.send(&request).await.map_err(|e| {
            tracing::warn!("{} of {} {} failed: {}", kind.as_str(), request.method, request.url, e);
            e
        })?;
        let duration = started.elapsed().as_secs_f64() * 1000.0;

        let record = CallRecord {
            id: kind.mint_id(),
            url: request.url.to_string(),
            method: request.method.to_string(),
            request_headers: Some(request.headers),
            request_body: Some(request.body.unwrap_or_default()),
            response_headers: Some(response.headers),
            response_body: Some(response.body),
            status_code: response.status,
            timestamp,
            started_at: None,
            duration: Some(duration),
        };

        self.reconciler
            .insert_manual_call(tab_id, record.clone(), kind.placement())
            .await?;
        tracing::info!(
            "{} {} {} -> {} ({:.0} ms)",
            kind.as_str(),
            record.method,
            record.url,
            record.status_code,
            duration
        );
        Ok(record)
    }
}
