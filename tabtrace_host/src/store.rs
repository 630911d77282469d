//! In-memory map from tracked tab to its active session

use std::collections::HashMap;
use tabtrace_common::{CallRecord, Session, TabId, TabSession};

/// Active sessions, one per tracked tab
///
/// Plain synchronous state. Callers serialize access; nothing here awaits.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<TabId, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_session(&self, tab_id: TabId) -> Option<&Session> {
        self.sessions.get(&tab_id)
    }

    pub fn get_session_mut(&mut self, tab_id: TabId) -> Option<&mut Session> {
        self.sessions.get_mut(&tab_id)
    }

    /// Start a fresh session for the tab, discarding whatever it had before
    pub fn start_session(&mut self, tab_id: TabId, domain: &str) -> Session {
        let session = Session::new(domain);
        self.sessions.insert(tab_id, session.clone());
        session
    }

    /// Stamp the end time and drop the session from the active map
    pub fn end_session(&mut self, tab_id: TabId) -> Option<Session> {
        let mut session = self.sessions.remove(&tab_id)?;
        session.end();
        Some(session)
    }

    /// Install a session obtained elsewhere (e.g. rehydrated from storage)
    pub fn restore_session(&mut self, tab_id: TabId, session: Session) {
        self.sessions.insert(tab_id, session);
    }

    /// Append a call to the tab's session. Returns `false` when the tab has
    /// none, which is expected while events race session creation.
    pub fn add_api_call(&mut self, tab_id: TabId, call: CallRecord) -> bool {
        match self.sessions.get_mut(&tab_id) {
            Some(session) => {
                session.api_calls.push(call);
                true
            }
            None => false,
        }
    }

    /// All active sessions ordered by tab id
    pub fn active_sessions(&self) -> Vec<TabSession> {
        let mut sessions: Vec<TabSession> = self
            .sessions
            .iter()
            .map(|(tab_id, session)| TabSession {
                tab_id: *tab_id,
                session: session.clone(),
            })
            .collect();
        sessions.sort_by_key(|entry| entry.tab_id);
        sessions
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}
