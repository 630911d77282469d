//! Session and call listing, replay

use super::{format_duration, format_time, truncate};
use crate::client::HostClient;
use anyhow::Result;
use console::{style, StyledObject};
use tabtrace_common::{pretty_body, CallRecord, Message, Session, TabSession};

/// List sessions currently open in a tab
pub async fn active(client: &HostClient) -> Result<()> {
    let sessions: Vec<TabSession> = client.message(&Message::GetAllActiveSessions).await?;

    if sessions.is_empty() {
        println!("No active sessions.");
        println!();
        println!("Open a web page with the extension enabled to start one.");
        return Ok(());
    }

    println!(
        "{:<6} {:<30} {:<24} {:>6} {:<20}",
        "TAB", "DOMAIN", "SESSION", "CALLS", "STARTED"
    );
    println!("{}", "-".repeat(90));

    for TabSession { tab_id, session } in sessions {
        println!(
            "{:<6} {:<30} {:<24} {:>6} {:<20}",
            tab_id,
            truncate(&session.domain, 28),
            truncate(&session.id, 22),
            session.api_calls.len(),
            format_time(session.start_time)
        );
    }

    Ok(())
}

/// List the historical session log
pub async fn logged(client: &HostClient) -> Result<()> {
    let sessions: Vec<Session> = client.message(&Message::GetAllSessions).await?;

    if sessions.is_empty() {
        println!("No logged sessions.");
        return Ok(());
    }

    println!(
        "{:<30} {:<24} {:>6} {:<20} {:>10}",
        "DOMAIN", "SESSION", "CALLS", "STARTED", "LASTED"
    );
    println!("{}", "-".repeat(94));

    for session in sessions.iter().rev() {
        let lasted = session
            .duration_ms()
            .map(|ms| format_duration(Some(ms as f64)))
            .unwrap_or_else(|| "open".to_string());
        println!(
            "{:<30} {:<24} {:>6} {:<20} {:>10}",
            truncate(&session.domain, 28),
            truncate(&session.id, 22),
            session.api_calls.len(),
            format_time(session.start_time),
            lasted
        );
    }

    Ok(())
}

/// List the calls of one tab's active session
pub async fn calls(client: &HostClient, tab_id: i64, errors_only: bool) -> Result<()> {
    let calls: Vec<CallRecord> = client
        .message(&Message::GetApiCalls {
            tab_id: Some(tab_id),
        })
        .await?;
    let calls = select_calls(calls, errors_only);

    if calls.is_empty() {
        println!("No calls recorded for tab {}.", tab_id);
        return Ok(());
    }

    println!(
        "{:<8} {:>6} {:<56} {:>10} {:<24}",
        "METHOD", "STATUS", "URL", "TIME", "ID"
    );
    println!("{}", "-".repeat(108));

    for call in &calls {
        print_call(call);
    }

    Ok(())
}

/// Re-issue a recorded call and show the new record
pub async fn replay(client: &HostClient, tab_id: i64, call_id: &str) -> Result<()> {
    let record = client.replay(tab_id, call_id).await?;

    println!(
        "{} Replayed {} as {}",
        style("✓").green(),
        style(call_id).cyan(),
        style(&record.id).cyan()
    );
    print_call(&record);

    if let Some(body) = record.response_body.as_deref().filter(|body| !body.is_empty()) {
        println!();
        println!("{}", pretty_body(body));
    }

    Ok(())
}

fn print_call(call: &CallRecord) {
    println!(
        "{:<8} {:>6} {:<56} {:>10} {:<24}",
        call.method,
        status_style(call.status_code),
        truncate(&call.url, 54),
        format_duration(call.duration),
        call.id
    );
}

/// Oldest first, optionally only failures
fn select_calls(mut calls: Vec<CallRecord>, errors_only: bool) -> Vec<CallRecord> {
    if errors_only {
        calls.retain(|call| call.is_error());
    }
    calls.sort_by_key(|call| call.timestamp);
    calls
}

fn status_style(status: u16) -> StyledObject<String> {
    let text = if status == 0 {
        "-".to_string()
    } else {
        status.to_string()
    };
    match status {
        0 => style(text).dim(),
        200..=299 => style(text).green(),
        300..=399 => style(text).cyan(),
        400..=499 => style(text).yellow(),
        _ => style(text).red(),
    }
}
