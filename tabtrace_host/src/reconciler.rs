//! Event reconciler
//!
//! Turns independently timed lifecycle events into one call record per
//! request. Every handler follows the same sequence: take the tab's lock,
//! resolve the session (memory, then the persisted slot, then the tab's
//! current page), mutate it in memory, then await the persist. A failed
//! persist is logged and the event still counts as handled.

use crate::capture::CaptureModePolicy;
use crate::error::{ActionError, StorageError};
use crate::persistence::StorageGateway;
use crate::store::SessionStore;
use crate::tabs::TabRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use tabtrace_common::{
    dedupe_calls, headers_to_map, now_ms, CallRecord, CaptureMode, ObservationEvent,
    RequestCompleted, RequestErrored, RequestHeadersSent, RequestStarted, Session, SessionEvent,
    TabEvent, TabId, TabSession, UrlHistoryEntry,
};
use tokio::sync::{broadcast, Mutex};

/// Why an event left every record untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Background request or a resource type other than fetch/XHR
    Untracked,
    /// Header events carry nothing worth keeping under reduced capture
    ReducedCapture,
    /// No session in memory or storage, and none could be created
    NoSession,
    /// Terminal or header event for a request that was never recorded
    UnknownCall,
    /// The record already saw its terminal event
    AlreadyClosed,
    /// A second initiated event for a recorded request
    Duplicate,
}

/// What handling one event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Recorded,
    Updated,
    SessionStarted,
    SessionEnded,
    /// A page batch was merged into the session
    Merged { recorded: usize, updated: usize },
    /// Handled, nothing to change
    Unchanged,
    Ignored(Skip),
}

impl Outcome {
    /// Whether any record or session changed
    pub fn changed(&self) -> bool {
        !matches!(self, Outcome::Unchanged | Outcome::Ignored(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Recorded => "recorded",
            Outcome::Updated => "updated",
            Outcome::SessionStarted => "session-started",
            Outcome::SessionEnded => "session-ended",
            Outcome::Merged { .. } => "merged",
            Outcome::Unchanged => "unchanged",
            Outcome::Ignored(_) => "ignored",
        }
    }
}

/// Where an inserted manual call goes in the session's list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Front,
    Back,
}

/// Elapsed milliseconds between a record's start and a terminal event.
/// Clock skew between observation paths can make this negative; clamp it.
fn elapsed_since(record: &CallRecord, timestamp_ms: f64) -> f64 {
    (timestamp_ms - record.start_ms()).max(0.0)
}

pub struct Reconciler {
    store: Mutex<SessionStore>,
    gateway: StorageGateway,
    capture: Arc<CaptureModePolicy>,
    tabs: Arc<TabRegistry>,
    tab_locks: DashMap<TabId, Arc<Mutex<()>>>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Reconciler {
    pub fn new(
        gateway: StorageGateway,
        capture: Arc<CaptureModePolicy>,
        tabs: Arc<TabRegistry>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            store: Mutex::new(SessionStore::new()),
            gateway,
            capture,
            tabs,
            tab_locks: DashMap::new(),
            events_tx,
        }
    }

    pub fn gateway(&self) -> &StorageGateway {
        &self.gateway
    }

    pub fn capture(&self) -> &CaptureModePolicy {
        &self.capture
    }

    pub fn tabs(&self) -> &TabRegistry {
        &self.tabs
    }

    /// Live session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    fn broadcast(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.events_tx.send(event);
    }

    fn tab_lock(&self, tab_id: TabId) -> Arc<Mutex<()>> {
        self.tab_locks.entry(tab_id).or_default().clone()
    }

    /// Run `f` against the tab's in-memory session and return its result
    /// with a snapshot of the session for persisting
    async fn with_session<R>(
        &self,
        tab_id: TabId,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<(R, Session)> {
        let mut store = self.store.lock().await;
        let session = store.get_session_mut(tab_id)?;
        let result = f(session);
        Some((result, session.clone()))
    }

    async fn persist(&self, tab_id: TabId, session: &Session) {
        if let Err(e) = self.gateway.save_active_session(tab_id, session).await {
            tracing::warn!("Dropped persist of tab {} session: {}", tab_id, e);
        }
    }

    /// Find the tab's session, rehydrating it from its persisted slot. With
    /// `create`, fall back to a fresh session for the tab's current page.
    /// Returns whether a session is now active. Caller holds the tab lock.
    async fn resolve_session(&self, tab_id: TabId, create: bool) -> bool {
        if self.store.lock().await.get_session(tab_id).is_some() {
            return true;
        }

        if let Some(stored) = self.gateway.get_active_session(tab_id).await {
            tracing::debug!("Rehydrated session {} for tab {}", stored.id, tab_id);
            self.store.lock().await.restore_session(tab_id, stored);
            return true;
        }

        if !create {
            return false;
        }

        let Some(domain) = self.tabs.current_domain(tab_id) else {
            return false;
        };
        self.start_session(tab_id, &domain).await;
        true
    }

    async fn start_session(&self, tab_id: TabId, domain: &str) -> Session {
        let session = self.store.lock().await.start_session(tab_id, domain);
        tracing::debug!("Started session {} for tab {} ({})", session.id, tab_id, domain);
        self.persist(tab_id, &session).await;
        self.broadcast(SessionEvent::SessionStarted {
            tab_id,
            session_id: session.id.clone(),
            domain: domain.to_string(),
        });
        session
    }

    /// Apply one lifecycle event from the network observation hooks
    pub async fn handle_event(&self, event: ObservationEvent) -> Outcome {
        if !event.is_tracked() {
            return Outcome::Ignored(Skip::Untracked);
        }

        let tab_id = event.tab_id();
        let lock = self.tab_lock(tab_id);
        let _guard = lock.lock().await;

        let creates_session = matches!(event, ObservationEvent::RequestInitiated(_));
        if !self.resolve_session(tab_id, creates_session).await {
            tracing::debug!(
                "No session for tab {}, dropping {} for request {}",
                tab_id,
                event.kind(),
                event.request_id()
            );
            return Outcome::Ignored(Skip::NoSession);
        }

        let outcome = match event {
            ObservationEvent::RequestInitiated(start) => self.on_initiated(start).await,
            ObservationEvent::HeadersAboutToSend(sent) => self.on_headers(sent).await,
            ObservationEvent::Completed(done) => self.on_completed(done).await,
            ObservationEvent::Errored(failed) => self.on_errored(failed).await,
        };

        if let Outcome::Ignored(skip) = outcome {
            tracing::debug!("Event for tab {} left records untouched: {:?}", tab_id, skip);
        }
        outcome
    }

    async fn on_initiated(&self, start: RequestStarted) -> Outcome {
        let mode = self.capture.current().await;
        let body = start
            .raw_body
            .and_then(|bytes| String::from_utf8(bytes).ok());
        let mut record = CallRecord::observed(
            &start.request_id,
            start.url,
            start.method.unwrap_or_else(|| "GET".to_string()),
            start.timestamp_ms.round() as i64,
            mode,
            body,
        );
        record.started_at = Some(start.timestamp_ms);

        let tab_id = start.tab_id;
        let snapshot = {
            let mut store = self.store.lock().await;
            let duplicate = match store.get_session(tab_id) {
                None => return Outcome::Ignored(Skip::NoSession),
                Some(session) => session.find_call(&record.id).is_some(),
            };
            if duplicate {
                return Outcome::Ignored(Skip::Duplicate);
            }
            store.add_api_call(tab_id, record.clone());
            store.get_session(tab_id).cloned()
        };

        match snapshot {
            Some(session) => {
                self.persist(tab_id, &session).await;
                self.broadcast(SessionEvent::CallRecorded {
                    tab_id,
                    call: record,
                });
                Outcome::Recorded
            }
            None => Outcome::Ignored(Skip::NoSession),
        }
    }

    async fn on_headers(&self, sent: RequestHeadersSent) -> Outcome {
        if !self.capture.current().await.is_full() {
            return Outcome::Ignored(Skip::ReducedCapture);
        }

        let id = CallRecord::observed_id(&sent.request_id);
        let headers = headers_to_map(&sent.headers);
        let applied = self
            .with_session(sent.tab_id, |session| match session.find_call_mut(&id) {
                None => Err(Skip::UnknownCall),
                Some(call) if call.is_closed() => Err(Skip::AlreadyClosed),
                Some(call) => {
                    call.request_headers = Some(headers);
                    Ok(call.clone())
                }
            })
            .await;

        self.finish_update(sent.tab_id, applied).await
    }

    async fn on_completed(&self, done: RequestCompleted) -> Outcome {
        let mode = self.capture.current().await;
        let id = CallRecord::observed_id(&done.request_id);
        let response_headers = mode.is_full().then(|| {
            done.headers
                .as_deref()
                .map(headers_to_map)
                .unwrap_or_default()
        });

        let applied = self
            .with_session(done.tab_id, |session| match session.find_call_mut(&id) {
                None => Err(Skip::UnknownCall),
                Some(call) => {
                    let duration = elapsed_since(call, done.timestamp_ms);
                    if call.close(done.status_code, duration, response_headers) {
                        Ok(call.clone())
                    } else {
                        Err(Skip::AlreadyClosed)
                    }
                }
            })
            .await;

        self.finish_update(done.tab_id, applied).await
    }

    async fn on_errored(&self, failed: RequestErrored) -> Outcome {
        let id = CallRecord::observed_id(&failed.request_id);
        if let Some(error) = &failed.error {
            tracing::debug!("Request {} errored: {}", failed.request_id, error);
        }

        let applied = self
            .with_session(failed.tab_id, |session| match session.find_call_mut(&id) {
                None => Err(Skip::UnknownCall),
                Some(call) => {
                    let duration = elapsed_since(call, failed.timestamp_ms);
                    if call.close(0, duration, None) {
                        Ok(call.clone())
                    } else {
                        Err(Skip::AlreadyClosed)
                    }
                }
            })
            .await;

        self.finish_update(failed.tab_id, applied).await
    }

    async fn finish_update(
        &self,
        tab_id: TabId,
        applied: Option<(Result<CallRecord, Skip>, Session)>,
    ) -> Outcome {
        match applied {
            Some((Ok(call), session)) => {
                self.persist(tab_id, &session).await;
                self.broadcast(SessionEvent::CallUpdated { tab_id, call });
                Outcome::Updated
            }
            Some((Err(skip), _)) => Outcome::Ignored(skip),
            None => Outcome::Ignored(Skip::NoSession),
        }
    }

    /// Apply a tab lifecycle notification
    pub async fn handle_tab_event(&self, event: TabEvent) -> Outcome {
        let tab_id = event.tab_id();
        let lock = self.tab_lock(tab_id);
        let guard = lock.lock().await;
        let removed = matches!(event, TabEvent::Removed { .. });

        let outcome = match event {
            TabEvent::Activated { tab_id, url, title } => {
                if let Some(url) = &url {
                    self.tabs.update(tab_id, url, title.as_deref());
                }
                let existed = self.store.lock().await.get_session(tab_id).is_some()
                    || self.gateway.get_active_session(tab_id).await.is_some();
                if !self.resolve_session(tab_id, true).await {
                    Outcome::Ignored(Skip::NoSession)
                } else if existed {
                    Outcome::Unchanged
                } else {
                    Outcome::SessionStarted
                }
            }
            TabEvent::Updated {
                tab_id,
                url,
                title,
                status,
            } => {
                let info = self.tabs.update(tab_id, &url, title.as_deref());
                let loaded = status.as_deref() == Some("complete");
                match self.tabs.current_domain(tab_id) {
                    Some(domain) if loaded => {
                        self.start_session(tab_id, &domain).await;
                        let entry = UrlHistoryEntry {
                            tab_id,
                            title: info.title.unwrap_or_else(|| info.url.clone()),
                            url: info.url,
                            timestamp: now_ms(),
                        };
                        if let Err(e) = self.gateway.push_url_history(entry).await {
                            tracing::warn!("Failed to record URL history: {}", e);
                        }
                        Outcome::SessionStarted
                    }
                    _ => Outcome::Unchanged,
                }
            }
            TabEvent::Removed { tab_id } => self.on_tab_removed(tab_id).await,
        };

        drop(guard);
        if removed {
            // Keep the entry while anyone besides this handler still holds the lock
            self.tab_locks
                .remove_if(&tab_id, |_, lock| Arc::strong_count(lock) <= 2);
        }
        outcome
    }

    async fn on_tab_removed(&self, tab_id: TabId) -> Outcome {
        self.tabs.remove(tab_id);

        let ended = self.store.lock().await.end_session(tab_id);
        let ended = match ended {
            Some(session) => Some(session),
            None => self.gateway.get_active_session(tab_id).await.map(|mut session| {
                session.end();
                session
            }),
        };

        let Some(session) = ended else {
            return Outcome::Ignored(Skip::NoSession);
        };

        if let Err(e) = self.gateway.save_session(&session).await {
            tracing::warn!("Failed to log ended session {}: {}", session.id, e);
        }
        if let Err(e) = self.gateway.clear_active_session(tab_id).await {
            tracing::warn!("Failed to clear slot for tab {}: {}", tab_id, e);
        }

        tracing::debug!(
            "Ended session {} for tab {} with {} calls",
            session.id,
            tab_id,
            session.api_calls.len()
        );
        self.broadcast(SessionEvent::SessionEnded {
            tab_id,
            session_id: session.id,
        });
        Outcome::SessionEnded
    }

    /// Merge a batch from the in-page observer, keyed by the ids it minted
    pub async fn merge_page_calls(&self, tab_id: TabId, calls: Vec<CallRecord>) -> Outcome {
        if tab_id < 0 {
            return Outcome::Ignored(Skip::Untracked);
        }

        let lock = self.tab_lock(tab_id);
        let _guard = lock.lock().await;

        if !self.resolve_session(tab_id, true).await {
            tracing::debug!("No session for tab {}, dropping {} page calls", tab_id, calls.len());
            return Outcome::Ignored(Skip::NoSession);
        }

        let mode = self.capture.current().await;
        let applied = self
            .with_session(tab_id, |session| {
                let mut recorded = Vec::new();
                let mut updated = Vec::new();
                for mut incoming in calls {
                    if mode == CaptureMode::Reduced {
                        incoming.strip_detail();
                    }
                    match session.find_call_mut(&incoming.id) {
                        None => {
                            session.api_calls.push(incoming.clone());
                            recorded.push(incoming);
                        }
                        Some(existing) => {
                            let Some(duration) = incoming.duration else {
                                continue;
                            };
                            let applied = existing.close(
                                incoming.status_code,
                                duration.max(0.0),
                                incoming.response_headers,
                            );
                            if applied {
                                if mode.is_full() && incoming.response_body.is_some() {
                                    existing.response_body = incoming.response_body;
                                }
                                updated.push(existing.clone());
                            }
                        }
                    }
                }
                (recorded, updated)
            })
            .await;

        let Some(((recorded, updated), session)) = applied else {
            return Outcome::Ignored(Skip::NoSession);
        };

        if recorded.is_empty() && updated.is_empty() {
            return Outcome::Unchanged;
        }

        self.persist(tab_id, &session).await;
        let counts = (recorded.len(), updated.len());
        for call in recorded {
            self.broadcast(SessionEvent::CallRecorded { tab_id, call });
        }
        for call in updated {
            self.broadcast(SessionEvent::CallUpdated { tab_id, call });
        }
        Outcome::Merged {
            recorded: counts.0,
            updated: counts.1,
        }
    }

    /// Add a record produced by a user action. Unlike passive capture the
    /// persist failure is returned.
    pub async fn insert_manual_call(
        &self,
        tab_id: TabId,
        call: CallRecord,
        placement: Placement,
    ) -> Result<(), ActionError> {
        let lock = self.tab_lock(tab_id);
        let _guard = lock.lock().await;

        if !self.resolve_session(tab_id, false).await {
            return Err(ActionError::NoSession(tab_id));
        }

        let (_, session) = self
            .with_session(tab_id, |session| match placement {
                Placement::Front => session.api_calls.insert(0, call.clone()),
                Placement::Back => session.api_calls.push(call.clone()),
            })
            .await
            .ok_or(ActionError::NoSession(tab_id))?;

        self.gateway.save_active_session(tab_id, &session).await?;
        self.broadcast(SessionEvent::CallRecorded { tab_id, call });
        Ok(())
    }

    /// The tab's active session, rehydrating it if this process has not
    /// touched the tab yet
    pub async fn session(&self, tab_id: TabId) -> Option<Session> {
        let lock = self.tab_lock(tab_id);
        let _guard = lock.lock().await;

        if !self.resolve_session(tab_id, false).await {
            return None;
        }
        self.store.lock().await.get_session(tab_id).cloned()
    }

    /// Active sessions across memory and persisted slots; memory wins
    pub async fn active_sessions(&self) -> Vec<TabSession> {
        let mut sessions = self.gateway.get_all_active_sessions().await;
        let in_memory = self.store.lock().await.active_sessions();

        for live in in_memory {
            match sessions.iter_mut().find(|s| s.tab_id == live.tab_id) {
                Some(slot) => *slot = live,
                None => sessions.push(live),
            }
        }
        sessions.sort_by_key(|entry| entry.tab_id);
        sessions
    }

    /// Calls of every active session, deduplicated by id
    pub async fn all_calls(&self) -> Vec<CallRecord> {
        dedupe_calls(
            self.active_sessions()
                .await
                .into_iter()
                .flat_map(|entry| entry.session.api_calls),
        )
    }

    /// Drop every in-memory session, then wipe persisted sessions, slots,
    /// URL history and the analytics cache
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.lock().await.clear();
        self.gateway.clear_all().await?;
        self.broadcast(SessionEvent::Cleared);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use std::time::Duration;
    use tabtrace_common::{HeaderEntry, Headers};

    struct Harness {
        gateway: StorageGateway,
        reconciler: Arc<Reconciler>,
    }

    async fn harness(full: bool) -> Harness {
        let gateway = StorageGateway::new(Arc::new(MemoryStore::new()));
        gateway.set_full_info_mode(full).await.unwrap();
        let capture = Arc::new(CaptureModePolicy::new(gateway.clone(), Duration::ZERO));
        let tabs = Arc::new(TabRegistry::new());
        tabs.update(1, "https://app.example.com/dashboard", Some("Dashboard"));
        let reconciler = Arc::new(Reconciler::new(gateway.clone(), capture, tabs));
        Harness {
            gateway,
            reconciler,
        }
    }

    fn initiated(id: &str, ts: f64) -> ObservationEvent {
        ObservationEvent::RequestInitiated(RequestStarted {
            request_id: id.to_string(),
            tab_id: 1,
            url: format!("https://api.example.com/items/{}", id),
            method: Some("POST".to_string()),
            raw_body: Some(br#"{"a":1}"#.to_vec()),
            resource_type: Some("xmlhttprequest".to_string()),
            timestamp_ms: ts,
        })
    }

    fn headers_sent(id: &str) -> ObservationEvent {
        ObservationEvent::HeadersAboutToSend(RequestHeadersSent {
            request_id: id.to_string(),
            tab_id: 1,
            url: String::new(),
            headers: vec![HeaderEntry {
                name: "authorization".to_string(),
                value: Some("Bearer t".to_string()),
            }],
            resource_type: None,
            timestamp_ms: 0.0,
        })
    }

    fn completed(id: &str, status: u16, ts: f64) -> ObservationEvent {
        ObservationEvent::Completed(RequestCompleted {
            request_id: id.to_string(),
            tab_id: 1,
            url: String::new(),
            status_code: status,
            headers: None,
            resource_type: Some("xmlhttprequest".to_string()),
            timestamp_ms: ts,
        })
    }

    fn errored(id: &str, ts: f64) -> ObservationEvent {
        ObservationEvent::Errored(RequestErrored {
            request_id: id.to_string(),
            tab_id: 1,
            url: String::new(),
            error: Some("net::ERR_FAILED".to_string()),
            resource_type: None,
            timestamp_ms: ts,
        })
    }

    async fn only_call(reconciler: &Reconciler) -> CallRecord {
        let session = reconciler.session(1).await.unwrap();
        assert_eq!(session.api_calls.len(), 1);
        session.api_calls[0].clone()
    }

    #[tokio::test]
    async fn test_initiated_then_completed() {
        let h = harness(false).await;
        let r = &h.reconciler;

        assert_eq!(r.handle_event(initiated("1", 1_000.0)).await, Outcome::Recorded);
        assert_eq!(r.handle_event(completed("1", 201, 1_250.5)).await, Outcome::Updated);

        let call = only_call(r).await;
        assert_eq!(call.id, "req-1");
        assert_eq!(call.timestamp, 1_000);
        assert_eq!(call.status_code, 201);
        assert_eq!(call.duration, Some(250.5));
        assert_eq!(r.session(1).await.unwrap().domain, "app.example.com");
    }

    #[tokio::test]
    async fn test_initiated_then_errored() {
        let h = harness(false).await;
        let r = &h.reconciler;

        r.handle_event(initiated("1", 1_000.0)).await;
        assert_eq!(r.handle_event(errored("1", 1_040.0)).await, Outcome::Updated);

        let call = only_call(r).await;
        assert_eq!(call.status_code, 0);
        assert_eq!(call.duration, Some(40.0));
    }

    #[tokio::test]
    async fn test_duration_keeps_fractional_start() {
        let h = harness(false).await;
        let r = &h.reconciler;

        r.handle_event(initiated("1", 1_000.4)).await;
        r.handle_event(completed("1", 200, 1_250.5)).await;

        let call = only_call(r).await;
        assert_eq!(call.timestamp, 1_000);
        assert_eq!(call.started_at, Some(1_000.4));
        assert_eq!(call.duration, Some(1_250.5 - 1_000.4));

        // The precise start survives a round trip through storage
        let persisted = h.gateway.get_active_session(1).await.unwrap();
        assert_eq!(persisted.api_calls[0].started_at, Some(1_000.4));
    }

    #[tokio::test]
    async fn test_terminal_without_initiated_creates_nothing() {
        let h = harness(false).await;
        let r = &h.reconciler;

        // No session yet, and terminal events never create one
        assert_eq!(
            r.handle_event(completed("9", 200, 10.0)).await,
            Outcome::Ignored(Skip::NoSession)
        );
        assert!(r.session(1).await.is_none());

        r.handle_event(initiated("1", 0.0)).await;
        assert_eq!(
            r.handle_event(errored("9", 10.0)).await,
            Outcome::Ignored(Skip::UnknownCall)
        );
        assert_eq!(only_call(r).await.id, "req-1");
    }

    #[tokio::test]
    async fn test_duplicate_terminal_events_ignored() {
        let h = harness(false).await;
        let r = &h.reconciler;

        r.handle_event(initiated("1", 0.0)).await;
        r.handle_event(completed("1", 200, 30.0)).await;
        assert_eq!(
            r.handle_event(errored("1", 90.0)).await,
            Outcome::Ignored(Skip::AlreadyClosed)
        );
        assert_eq!(
            r.handle_event(completed("1", 500, 99.0)).await,
            Outcome::Ignored(Skip::AlreadyClosed)
        );

        let call = only_call(r).await;
        assert_eq!(call.status_code, 200);
        assert_eq!(call.duration, Some(30.0));
    }

    #[tokio::test]
    async fn test_duplicate_initiated_ignored() {
        let h = harness(false).await;
        let r = &h.reconciler;

        r.handle_event(initiated("1", 0.0)).await;
        assert_eq!(
            r.handle_event(initiated("1", 5.0)).await,
            Outcome::Ignored(Skip::Duplicate)
        );
        assert_eq!(only_call(r).await.timestamp, 0);
    }

    #[tokio::test]
    async fn test_reduced_capture_omits_detail() {
        let h = harness(false).await;
        let r = &h.reconciler;

        r.handle_event(initiated("1", 0.0)).await;
        assert_eq!(
            r.handle_event(headers_sent("1")).await,
            Outcome::Ignored(Skip::ReducedCapture)
        );
        r.handle_event(completed("1", 200, 5.0)).await;

        let call = only_call(r).await;
        assert!(call.request_headers.is_none());
        assert!(call.response_headers.is_none());
        assert!(call.request_body.is_none());
        assert!(call.response_body.is_none());
    }

    #[tokio::test]
    async fn test_full_capture_records_detail() {
        let h = harness(true).await;
        let r = &h.reconciler;

        r.handle_event(initiated("1", 0.0)).await;
        let pending = only_call(r).await;
        assert_eq!(pending.request_headers, Some(Headers::new()));
        assert_eq!(pending.response_headers, Some(Headers::new()));
        assert_eq!(pending.request_body.as_deref(), Some(r#"{"a":1}"#));

        assert_eq!(r.handle_event(headers_sent("1")).await, Outcome::Updated);
        r.handle_event(completed("1", 200, 5.0)).await;

        let call = only_call(r).await;
        assert_eq!(call.request_headers.unwrap()["authorization"], "Bearer t");
        // Completed without observed headers still yields an empty map
        assert_eq!(call.response_headers, Some(Headers::new()));
    }

    #[tokio::test]
    async fn test_undecodable_body_left_absent() {
        let h = harness(true).await;
        let r = &h.reconciler;

        let mut event = initiated("1", 0.0);
        if let ObservationEvent::RequestInitiated(start) = &mut event {
            start.raw_body = Some(vec![0xff, 0xfe, 0x00]);
        }
        r.handle_event(event).await;
        assert!(only_call(r).await.request_body.is_none());
    }

    #[tokio::test]
    async fn test_untracked_events_skipped() {
        let h = harness(false).await;
        let mut event = initiated("1", 0.0);
        if let ObservationEvent::RequestInitiated(start) = &mut event {
            start.resource_type = Some("image".to_string());
        }
        assert_eq!(
            h.reconciler.handle_event(event).await,
            Outcome::Ignored(Skip::Untracked)
        );
        assert!(h.reconciler.session(1).await.is_none());
    }

    #[tokio::test]
    async fn test_initiated_without_known_tab_is_dropped() {
        let h = harness(false).await;
        let mut event = initiated("1", 0.0);
        if let ObservationEvent::RequestInitiated(start) = &mut event {
            start.tab_id = 42;
        }
        assert_eq!(
            h.reconciler.handle_event(event).await,
            Outcome::Ignored(Skip::NoSession)
        );
    }

    #[tokio::test]
    async fn test_session_rehydrates_after_restart() {
        let h = harness(false).await;
        h.reconciler.handle_event(initiated("1", 0.0)).await;

        // A new process sees only persisted state
        let capture = Arc::new(CaptureModePolicy::new(h.gateway.clone(), Duration::ZERO));
        let restarted = Reconciler::new(h.gateway.clone(), capture, Arc::new(TabRegistry::new()));

        assert_eq!(
            restarted.handle_event(completed("1", 204, 12.0)).await,
            Outcome::Updated
        );
        let call = only_call(&restarted).await;
        assert_eq!(call.status_code, 204);

        let persisted = h.gateway.get_active_session(1).await.unwrap();
        assert_eq!(persisted.api_calls[0].duration, Some(12.0));
    }

    #[tokio::test]
    async fn test_concurrent_events_for_one_tab_all_land() {
        let h = harness(false).await;
        let mut handles = Vec::new();
        for n in 0..20 {
            let r = h.reconciler.clone();
            handles.push(tokio::spawn(async move {
                r.handle_event(initiated(&n.to_string(), n as f64)).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Outcome::Recorded);
        }

        assert_eq!(h.reconciler.session(1).await.unwrap().api_calls.len(), 20);
        let persisted = h.gateway.get_active_session(1).await.unwrap();
        assert_eq!(persisted.api_calls.len(), 20);
    }

    #[tokio::test]
    async fn test_page_load_replaces_session_and_records_history() {
        let h = harness(false).await;
        let r = &h.reconciler;
        r.handle_event(initiated("1", 0.0)).await;
        let first = r.session(1).await.unwrap();

        let outcome = r
            .handle_tab_event(TabEvent::Updated {
                tab_id: 1,
                url: "https://shop.example.com/cart".to_string(),
                title: Some("Cart".to_string()),
                status: Some("complete".to_string()),
            })
            .await;
        assert_eq!(outcome, Outcome::SessionStarted);

        let second = r.session(1).await.unwrap();
        assert_ne!(first.id, second.id);
        assert!(second.api_calls.is_empty());
        assert_eq!(second.domain, "shop.example.com");

        let history = h.gateway.get_url_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].title, "Cart");

        // Loading states and non-web pages leave the session alone
        let loading = r
            .handle_tab_event(TabEvent::Updated {
                tab_id: 1,
                url: "chrome://settings".to_string(),
                title: None,
                status: Some("complete".to_string()),
            })
            .await;
        assert_eq!(loading, Outcome::Unchanged);
        assert_eq!(r.session(1).await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_activation_creates_session_once() {
        let h = harness(false).await;
        let r = &h.reconciler;
        let activate = TabEvent::Activated {
            tab_id: 1,
            url: None,
            title: None,
        };
        assert_eq!(r.handle_tab_event(activate.clone()).await, Outcome::SessionStarted);
        assert_eq!(r.handle_tab_event(activate).await, Outcome::Unchanged);
    }

    #[tokio::test]
    async fn test_tab_removal_ends_and_logs_session() {
        let h = harness(false).await;
        let r = &h.reconciler;
        let mut events = r.subscribe();
        r.handle_event(initiated("1", 0.0)).await;
        let session_id = r.session(1).await.unwrap().id;

        assert_eq!(
            r.handle_tab_event(TabEvent::Removed { tab_id: 1 }).await,
            Outcome::SessionEnded
        );
        assert!(r.session(1).await.is_none());
        assert!(h.gateway.get_active_session(1).await.is_none());

        let logged = h.gateway.get_session_by_id(&session_id).await.unwrap();
        assert!(logged.end_time.is_some());
        assert_eq!(logged.api_calls.len(), 1);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(serde_json::to_value(&event).unwrap()["type"].clone());
        }
        assert_eq!(kinds, vec!["session-started", "call-recorded", "session-ended"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_tab_removals_all_logged() {
        let h = harness(false).await;
        for tab_id in 2..42 {
            h.reconciler
                .tabs()
                .update(tab_id, "https://app.example.com/", None);
            h.reconciler
                .handle_tab_event(TabEvent::Activated {
                    tab_id,
                    url: None,
                    title: None,
                })
                .await;
        }

        let mut handles = Vec::new();
        for tab_id in 2..42 {
            let r = h.reconciler.clone();
            handles.push(tokio::spawn(async move {
                r.handle_tab_event(TabEvent::Removed { tab_id }).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Outcome::SessionEnded);
        }

        assert_eq!(h.gateway.get_all_sessions().await.len(), 40);
    }

    #[tokio::test]
    async fn test_removal_keeps_lock_while_held_elsewhere() {
        let h = harness(false).await;
        let r = &h.reconciler;
        r.handle_event(initiated("1", 0.0)).await;

        let waiting = r.tab_lock(1);
        r.handle_tab_event(TabEvent::Removed { tab_id: 1 }).await;
        assert!(r.tab_locks.contains_key(&1));
        assert!(Arc::ptr_eq(&waiting, &r.tab_lock(1)));

        drop(waiting);
        r.handle_tab_event(TabEvent::Removed { tab_id: 1 }).await;
        assert!(!r.tab_locks.contains_key(&1));
    }

    fn page_call(id: &str, status: u16, duration: Option<f64>) -> CallRecord {
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        CallRecord {
            id: id.to_string(),
            url: "https://api.example.com/feed".to_string(),
            method: "GET".to_string(),
            request_headers: Some(headers.clone()),
            request_body: None,
            response_headers: duration.map(|_| headers),
            response_body: duration.map(|_| "[]".to_string()),
            status_code: status,
            timestamp: 100,
            started_at: None,
            duration,
        }
    }

    #[tokio::test]
    async fn test_page_batches_merge_by_id() {
        let h = harness(true).await;
        let r = &h.reconciler;

        let outcome = r
            .merge_page_calls(1, vec![page_call("fetch-1", 0, None), page_call("xhr-2", 200, Some(8.0))])
            .await;
        assert_eq!(outcome, Outcome::Merged { recorded: 2, updated: 0 });

        let outcome = r
            .merge_page_calls(
                1,
                vec![page_call("fetch-1", 404, Some(20.0)), page_call("xhr-2", 500, Some(1.0))],
            )
            .await;
        assert_eq!(outcome, Outcome::Merged { recorded: 0, updated: 1 });

        let session = r.session(1).await.unwrap();
        let first = session.find_call("fetch-1").unwrap();
        assert_eq!(first.status_code, 404);
        assert_eq!(first.duration, Some(20.0));
        assert_eq!(first.response_body.as_deref(), Some("[]"));
        assert_eq!(session.find_call("xhr-2").unwrap().status_code, 200);

        assert_eq!(
            r.merge_page_calls(1, vec![page_call("xhr-2", 200, Some(1.0))]).await,
            Outcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_page_batches_respect_reduced_capture() {
        let h = harness(false).await;
        h.reconciler
            .merge_page_calls(1, vec![page_call("fetch-1", 200, Some(3.0))])
            .await;

        let call = only_call(&h.reconciler).await;
        assert!(call.request_headers.is_none());
        assert!(call.response_headers.is_none());
        assert!(call.response_body.is_none());
        assert_eq!(call.status_code, 200);
    }

    #[tokio::test]
    async fn test_manual_call_placement() {
        let h = harness(false).await;
        let r = &h.reconciler;
        r.handle_event(initiated("1", 0.0)).await;

        r.insert_manual_call(1, page_call("build-a", 200, Some(1.0)), Placement::Front)
            .await
            .unwrap();
        r.insert_manual_call(1, page_call("replay-b", 200, Some(1.0)), Placement::Back)
            .await
            .unwrap();

        let ids: Vec<String> = r
            .session(1)
            .await
            .unwrap()
            .api_calls
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["build-a", "req-1", "replay-b"]);

        assert!(matches!(
            r.insert_manual_call(7, page_call("build-c", 200, None), Placement::Front).await,
            Err(ActionError::NoSession(7))
        ));
    }

    #[tokio::test]
    async fn test_all_calls_dedupes_across_tabs() {
        let h = harness(false).await;
        let r = &h.reconciler;
        r.tabs().update(2, "https://other.example.com/", None);

        r.merge_page_calls(1, vec![page_call("fetch-1", 200, Some(1.0))]).await;
        r.merge_page_calls(2, vec![page_call("fetch-1", 200, Some(1.0)), page_call("fetch-2", 200, Some(1.0))])
            .await;

        let ids: Vec<String> = r.all_calls().await.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["fetch-1", "fetch-2"]);
        assert_eq!(r.active_sessions().await.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_wipes_memory_and_storage() {
        let h = harness(false).await;
        let r = &h.reconciler;
        r.handle_event(initiated("1", 0.0)).await;
        h.gateway.save_session(&r.session(1).await.unwrap()).await.unwrap();

        r.clear().await.unwrap();

        assert!(r.session(1).await.is_none());
        assert!(r.active_sessions().await.is_empty());
        assert!(h.gateway.get_all_sessions().await.is_empty());
    }
}
