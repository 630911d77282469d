//! Windowed analytics over call records
//!
//! [`compute`] is pure. [`AnalyticsService`] loads records from storage,
//! writes each fresh result through to the cache, and falls back to a recent
//! cached result when loading fails.

use crate::error::StorageError;
use crate::persistence::{AnalyticsCache, StorageGateway};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tabtrace_common::constants::ANALYTICS_FRESHNESS_MS;
use tabtrace_common::{dedupe_calls, now_ms, CallRecord, TabId};

const HOUR_MS: i64 = 60 * 60 * 1000;

/// How far back records count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    #[default]
    All,
    #[serde(alias = "last-hour")]
    Hour,
    #[serde(alias = "last-day")]
    Day,
    #[serde(alias = "last-week")]
    Week,
}

impl TimeWindow {
    /// Window length in milliseconds, `None` for no limit
    pub fn duration_ms(self) -> Option<i64> {
        match self {
            TimeWindow::All => None,
            TimeWindow::Hour => Some(HOUR_MS),
            TimeWindow::Day => Some(24 * HOUR_MS),
            TimeWindow::Week => Some(7 * 24 * HOUR_MS),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::All => "all",
            TimeWindow::Hour => "hour",
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
        }
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(TimeWindow::All),
            "hour" | "last-hour" | "1h" => Ok(TimeWindow::Hour),
            "day" | "last-day" | "24h" => Ok(TimeWindow::Day),
            "week" | "last-week" | "7d" => Ok(TimeWindow::Week),
            other => Err(format!("unknown time window '{}'", other)),
        }
    }
}

/// Rollup for one `"<METHOD> <path>"` endpoint
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub url: String,
    pub calls: usize,
    pub total_time: f64,
    pub errors: usize,
    pub bandwidth: usize,
    pub avg_time: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTimePoint {
    pub timestamp: i64,
    pub duration: f64,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub total_calls: usize,
    pub avg_response_time: f64,
    /// Percentage of calls with status >= 400
    pub error_rate: f64,
    /// Request plus response body bytes
    pub total_bandwidth: usize,
    pub endpoints: Vec<EndpointStats>,
    pub status_codes: BTreeMap<u16, usize>,
    pub response_times: Vec<ResponseTimePoint>,
}

/// Method and pathname, host and query dropped
fn endpoint_key(call: &CallRecord) -> String {
    let path = match Url::parse(&call.url) {
        Ok(url) => url.path().to_string(),
        Err(_) => call
            .url
            .split(&['?', '#'][..])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    format!("{} {}", call.method, path)
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

/// Aggregate `records` falling inside `window` as seen at `now_ms`
pub fn compute(records: &[CallRecord], window: TimeWindow, now_ms: i64) -> AnalyticsSnapshot {
    let filtered: Vec<&CallRecord> = match window.duration_ms() {
        None => records.iter().collect(),
        Some(limit) => records
            .iter()
            .filter(|call| now_ms - call.timestamp <= limit)
            .collect(),
    };

    let total_calls = filtered.len();

    let durations: Vec<f64> = filtered.iter().filter_map(|call| call.duration).collect();
    let avg_response_time = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    };

    let error_count = filtered.iter().filter(|call| call.is_error()).count();
    let total_bandwidth = filtered.iter().map(|call| call.bandwidth()).sum();

    // Insertion-ordered grouping so the stable sort keeps first-seen order on ties
    let mut endpoints: Vec<EndpointStats> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for call in &filtered {
        let key = endpoint_key(call);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            endpoints.push(EndpointStats {
                url: key,
                ..Default::default()
            });
            endpoints.len() - 1
        });
        let stats = &mut endpoints[slot];
        stats.calls += 1;
        stats.total_time += call.duration.unwrap_or(0.0);
        stats.bandwidth += call.bandwidth();
        if call.is_error() {
            stats.errors += 1;
        }
    }
    for stats in &mut endpoints {
        stats.avg_time = stats.total_time / stats.calls as f64;
        stats.error_rate = percent(stats.errors, stats.calls);
    }
    endpoints.sort_by(|a, b| b.calls.cmp(&a.calls));

    let mut status_codes = BTreeMap::new();
    for call in &filtered {
        *status_codes.entry(call.status_code).or_insert(0) += 1;
    }

    let mut response_times: Vec<ResponseTimePoint> = filtered
        .iter()
        .filter_map(|call| {
            call.duration.map(|duration| ResponseTimePoint {
                timestamp: call.timestamp,
                duration,
                success: call.is_success(),
            })
        })
        .collect();
    response_times.sort_by_key(|point| point.timestamp);

    AnalyticsSnapshot {
        total_calls,
        avg_response_time,
        error_rate: percent(error_count, total_calls),
        total_bandwidth,
        endpoints,
        status_codes,
        response_times,
    }
}

/// Which records a snapshot covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsScope {
    Tab(TabId),
    /// Every active session, deduplicated by call id
    All,
}

/// Result of an analytics request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum AnalyticsView {
    Fresh { data: AnalyticsSnapshot },
    /// Loading failed; this is the last result, still within freshness
    Cached { age_ms: i64, data: AnalyticsSnapshot },
    /// Loading failed and no usable cache exists
    Unavailable,
}

pub struct AnalyticsService {
    gateway: StorageGateway,
    freshness_ms: i64,
}

impl AnalyticsService {
    pub fn new(gateway: StorageGateway) -> Self {
        Self::with_freshness(gateway, ANALYTICS_FRESHNESS_MS)
    }

    pub fn with_freshness(gateway: StorageGateway, freshness_ms: i64) -> Self {
        Self {
            gateway,
            freshness_ms,
        }
    }

    async fn load_records(&self, scope: AnalyticsScope) -> Result<Vec<CallRecord>, StorageError> {
        match scope {
            AnalyticsScope::Tab(tab_id) => Ok(self
                .gateway
                .load_active_session(tab_id)
                .await?
                .map(|session| session.api_calls)
                .unwrap_or_default()),
            AnalyticsScope::All => Ok(dedupe_calls(
                self.gateway
                    .load_all_active_sessions()
                    .await?
                    .into_iter()
                    .flat_map(|entry| entry.session.api_calls),
            )),
        }
    }

    pub async fn snapshot(&self, scope: AnalyticsScope, window: TimeWindow) -> AnalyticsView {
        self.snapshot_at(scope, window, now_ms()).await
    }

    pub async fn snapshot_at(
        &self,
        scope: AnalyticsScope,
        window: TimeWindow,
        now_ms: i64,
    ) -> AnalyticsView {
        match self.load_records(scope).await {
            Ok(records) => {
                let data = compute(&records, window, now_ms);
                let cache = AnalyticsCache {
                    timestamp: now_ms,
                    scope,
                    window,
                    data: data.clone(),
                };
                if let Err(e) = self.gateway.set_analytics_cache(&cache).await {
                    tracing::warn!("Failed to cache analytics: {}", e);
                }
                AnalyticsView::Fresh { data }
            }
            Err(e) => {
                tracing::warn!("Failed to load records for analytics: {}", e);
                match self.gateway.get_analytics_cache().await {
                    Some(cache) if !cache.covers(scope, window) => {
                        tracing::debug!(
                            "Analytics cache holds {:?} over {}, not {:?} over {}",
                            cache.scope,
                            cache.window.as_str(),
                            scope,
                            window.as_str()
                        );
                        AnalyticsView::Unavailable
                    }
                    Some(cache) if now_ms - cache.timestamp < self.freshness_ms => {
                        AnalyticsView::Cached {
                            age_ms: now_ms - cache.timestamp,
                            data: cache.data,
                        }
                    }
                    Some(cache) => {
                        tracing::warn!(
                            "Analytics cache is {} ms old, not using it",
                            now_ms - cache.timestamp
                        );
                        AnalyticsView::Unavailable
                    }
                    None => AnalyticsView::Unavailable,
                }
            }
        }
    }
}
