//! HTTP client for the capture host

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tabtrace_common::{Ack, CallRecord, Message, UrlHistoryEntry};

#[derive(Clone)]
pub struct HostClient {
    base_url: String,
    client: Client,
}

/// `GET /api/health` body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub service: String,
    pub version: String,
    pub active_sessions: usize,
    pub capture_mode: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistorySize {
    size: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplayRequest<'a> {
    tab_id: i64,
    call_id: &'a str,
}

impl HostClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<Health> {
        let response = self
            .client
            .get(self.url("/api/health"))
            .send()
            .await
            .with_context(|| format!("Host not reachable at {}", self.base_url))?;
        parse(response).await
    }

    /// Send one UI message; the caller picks the reply shape it expects
    pub async fn message<T: DeserializeOwned>(&self, message: &Message) -> Result<T> {
        let response = self
            .client
            .post(self.url("/api/message"))
            .json(message)
            .send()
            .await
            .with_context(|| format!("Failed to send {}", message.name()))?;
        parse(response).await
    }

    /// Send a mutating UI message and fail unless it was acknowledged
    pub async fn command(&self, message: &Message) -> Result<()> {
        let ack: Ack = self.message(message).await?;
        if !ack.success {
            anyhow::bail!(
                "{} failed: {}",
                message.name(),
                ack.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }

    pub async fn analytics(&self, tab: Option<i64>, window: &str) -> Result<serde_json::Value> {
        let mut query = vec![("window", window.to_string())];
        if let Some(tab) = tab {
            query.push(("tabId", tab.to_string()));
        }
        let response = self
            .client
            .get(self.url("/api/analytics"))
            .query(&query)
            .send()
            .await
            .context("Failed to fetch analytics")?;
        parse(response).await
    }

    pub async fn replay(&self, tab_id: i64, call_id: &str) -> Result<CallRecord> {
        let response = self
            .client
            .post(self.url("/api/actions/replay"))
            .json(&ReplayRequest { tab_id, call_id })
            .send()
            .await
            .context("Failed to send replay")?;
        parse(response).await
    }

    pub async fn history(&self) -> Result<Vec<UrlHistoryEntry>> {
        let response = self
            .client
            .get(self.url("/api/history"))
            .send()
            .await
            .context("Failed to fetch history")?;
        parse(response).await
    }

    pub async fn set_history_size(&self, size: usize) -> Result<usize> {
        let response = self
            .client
            .put(self.url("/api/settings/history-size"))
            .json(&HistorySize { size })
            .send()
            .await
            .context("Failed to update history size")?;
        let body: HistorySize = parse(response).await?;
        Ok(body.size)
    }
}

/// Decode a success body, or turn the host's error reply into an error
async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("Host returned {}: {}", status, error_message(&text));
    }
    response.json().await.context("Failed to decode host response")
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<Ack>(body) {
        Ok(Ack {
            error: Some(error), ..
        }) => error,
        _ => body.to_string(),
    }
}
