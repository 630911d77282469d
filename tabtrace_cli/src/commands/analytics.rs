//! Endpoint analytics

use super::{format_bytes, format_duration, truncate};
use crate::client::HostClient;
use anyhow::{Context, Result};
use console::style;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Endpoint {
    url: String,
    calls: usize,
    errors: usize,
    avg_time: f64,
    error_rate: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    total_calls: usize,
    avg_response_time: f64,
    error_rate: f64,
    total_bandwidth: u64,
    endpoints: Vec<Endpoint>,
    status_codes: BTreeMap<u16, usize>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase", rename_all_fields = "camelCase")]
enum View {
    Fresh { data: Snapshot },
    Cached { age_ms: i64, data: Snapshot },
}

const TOP_ENDPOINTS: usize = 10;

pub async fn run(client: &HostClient, tab: Option<i64>, window: &str) -> Result<()> {
    let value = client.analytics(tab, window).await?;
    let view: View = serde_json::from_value(value).context("Unexpected analytics response")?;

    let data = match view {
        View::Fresh { data } => data,
        View::Cached { age_ms, data } => {
            println!(
                "{}",
                style(format!(
                    "Storage unavailable, showing results from {}s ago",
                    age_ms / 1000
                ))
                .yellow()
            );
            data
        }
    };

    if data.total_calls == 0 {
        println!("No calls in this window.");
        return Ok(());
    }

    let scope = match tab {
        Some(tab) => format!("tab {}", tab),
        None => "all sessions".to_string(),
    };
    println!("{} ({}, {})", style("Analytics").white().bold(), scope, window);
    println!();
    println!("  Calls:          {}", data.total_calls);
    println!("  Avg response:   {}", format_duration(Some(data.avg_response_time)));
    println!("  Error rate:     {:.1}%", data.error_rate);
    println!("  Bandwidth:      {}", format_bytes(data.total_bandwidth));
    println!("  Status codes:   {}", status_summary(&data.status_codes));
    println!();

    println!(
        "{:<56} {:>7} {:>7} {:>10} {:>7}",
        "ENDPOINT", "CALLS", "ERRORS", "AVG", "ERR%"
    );
    println!("{}", "-".repeat(91));
    for endpoint in data.endpoints.iter().take(TOP_ENDPOINTS) {
        println!(
            "{:<56} {:>7} {:>7} {:>10} {:>6.1}%",
            truncate(&endpoint.url, 54),
            endpoint.calls,
            endpoint.errors,
            format_duration(Some(endpoint.avg_time)),
            endpoint.error_rate
        );
    }
    if data.endpoints.len() > TOP_ENDPOINTS {
        println!(
            "{}",
            style(format!("  ... {} more", data.endpoints.len() - TOP_ENDPOINTS)).dim()
        );
    }

    Ok(())
}

/// `200 x12, 404 x1`
fn status_summary(codes: &BTreeMap<u16, usize>) -> String {
    if codes.is_empty() {
        return "-".to_string();
    }
    codes
        .iter()
        .map(|(code, count)| format!("{} x{}", code, count))
        .collect::<Vec<_>>()
        .join(", ")
}
