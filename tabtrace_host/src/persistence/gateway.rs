//! Typed persistence operations over a [`KvStore`]

use super::kv::KvStore;
use crate::analytics::{AnalyticsScope, AnalyticsSnapshot, TimeWindow};
use crate::error::{SettingsError, StorageError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tabtrace_common::constants::{
    ACTIVE_SESSION_PREFIX, ANALYTICS_CACHE_KEY, DEFAULT_MAX_HISTORY_SIZE, FULL_INFO_MODE_KEY,
    MAX_HISTORY_SIZE_KEY, MAX_HISTORY_SIZE_LIMIT, MAX_STORED_SESSIONS, PRESETS_KEY,
    SCHEMA_VERSION, SESSIONS_KEY, URL_HISTORY_KEY,
};
use tabtrace_common::{RequestPreset, Session, TabId, TabSession, UrlHistoryEntry};
use tokio::sync::Mutex;

/// A computed analytics snapshot, when it was computed and what it covers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsCache {
    pub timestamp: i64,
    pub scope: AnalyticsScope,
    pub window: TimeWindow,
    pub data: AnalyticsSnapshot,
}

impl AnalyticsCache {
    pub fn covers(&self, scope: AnalyticsScope, window: TimeWindow) -> bool {
        self.scope == scope && self.window == window
    }
}

/// Wrapper written around every persisted payload
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a, T> {
    schema_version: u32,
    data: &'a T,
}

/// Unwrap a versioned envelope, or accept a bare payload written before
/// versioning existed
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("schemaVersion") && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn active_session_key(tab_id: TabId) -> String {
    format!("{}{}", ACTIVE_SESSION_PREFIX, tab_id)
}

/// Sessions, per-tab active slots, settings and caches
///
/// Writes are awaited and their failures returned. The `get_*` readers used
/// on event paths log a failure and report the value as absent; `load_*`
/// readers return it.
#[derive(Clone)]
pub struct StorageGateway {
    store: Arc<dyn KvStore>,
    max_stored_sessions: usize,
    /// Held across read-modify-write of keys every tab shares
    shared_keys: Arc<Mutex<()>>,
}

impl StorageGateway {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_session_limit(store, MAX_STORED_SESSIONS)
    }

    pub fn with_session_limit(store: Arc<dyn KvStore>, max_stored_sessions: usize) -> Self {
        Self {
            store,
            max_stored_sessions: max_stored_sessions.max(1),
            shared_keys: Arc::new(Mutex::new(())),
        }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.store.get(key).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(unwrap_envelope(value))?)),
        }
    }

    async fn write<T: Serialize>(&self, key: &str, data: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(Envelope {
            schema_version: SCHEMA_VERSION,
            data,
        })?;
        self.store.set(key, value).await.map_err(|e| {
            tracing::error!("Failed to write {}: {}", key, e);
            e
        })
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.store.remove(key).await.map_err(|e| {
            tracing::error!("Failed to remove {}: {}", key, e);
            e
        })
    }

    // Historical session log

    pub async fn load_all_sessions(&self) -> Result<Vec<Session>, StorageError> {
        Ok(self.read(SESSIONS_KEY).await?.unwrap_or_default())
    }

    pub async fn get_all_sessions(&self) -> Vec<Session> {
        self.load_all_sessions().await.unwrap_or_else(|e| {
            tracing::warn!("Failed to read session log: {}", e);
            Vec::new()
        })
    }

    fn append_bounded(&self, sessions: &mut Vec<Session>, session: &Session) {
        sessions.push(session.clone());
        if sessions.len() > self.max_stored_sessions {
            let excess = sessions.len() - self.max_stored_sessions;
            sessions.drain(..excess);
        }
    }

    /// Append to the log, dropping the oldest entries past the bound
    pub async fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        let _guard = self.shared_keys.lock().await;
        let mut sessions = self.load_all_sessions().await?;
        self.append_bounded(&mut sessions, session);
        self.write(SESSIONS_KEY, &sessions).await
    }

    /// Replace the logged session with the same id, or append it. Returns
    /// `true` if an existing entry was replaced.
    pub async fn upsert_session(&self, session: &Session) -> Result<bool, StorageError> {
        let _guard = self.shared_keys.lock().await;
        let mut sessions = self.load_all_sessions().await?;
        let replaced = match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(slot) => {
                *slot = session.clone();
                true
            }
            None => {
                self.append_bounded(&mut sessions, session);
                false
            }
        };
        self.write(SESSIONS_KEY, &sessions).await?;
        Ok(replaced)
    }

    pub async fn get_session_by_id(&self, session_id: &str) -> Option<Session> {
        self.get_all_sessions()
            .await
            .into_iter()
            .find(|s| s.id == session_id)
    }

    async fn clear_sessions(&self) -> Result<(), StorageError> {
        self.write(SESSIONS_KEY, &Vec::<Session>::new()).await
    }

    // Per-tab active session slot

    pub async fn load_active_session(&self, tab_id: TabId) -> Result<Option<Session>, StorageError> {
        self.read(&active_session_key(tab_id)).await
    }

    pub async fn get_active_session(&self, tab_id: TabId) -> Option<Session> {
        self.load_active_session(tab_id).await.unwrap_or_else(|e| {
            tracing::warn!("Failed to read active session for tab {}: {}", tab_id, e);
            None
        })
    }

    pub async fn save_active_session(
        &self,
        tab_id: TabId,
        session: &Session,
    ) -> Result<(), StorageError> {
        self.write(&active_session_key(tab_id), session).await
    }

    pub async fn clear_active_session(&self, tab_id: TabId) -> Result<(), StorageError> {
        self.remove(&active_session_key(tab_id)).await
    }

    /// Every persisted active slot, ordered by tab id
    pub async fn load_all_active_sessions(&self) -> Result<Vec<TabSession>, StorageError> {
        let mut sessions = Vec::new();
        for key in self.store.keys().await? {
            let Some(tab_id) = key
                .strip_prefix(ACTIVE_SESSION_PREFIX)
                .and_then(|id| id.parse::<TabId>().ok())
            else {
                continue;
            };
            match self.read::<Session>(&key).await {
                Ok(Some(session)) => sessions.push(TabSession { tab_id, session }),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping unreadable slot {}: {}", key, e),
            }
        }
        sessions.sort_by_key(|entry| entry.tab_id);
        Ok(sessions)
    }

    pub async fn get_all_active_sessions(&self) -> Vec<TabSession> {
        self.load_all_active_sessions().await.unwrap_or_else(|e| {
            tracing::warn!("Failed to list active sessions: {}", e);
            Vec::new()
        })
    }

    pub async fn clear_all_active_sessions(&self) -> Result<(), StorageError> {
        for key in self.store.keys().await? {
            if key.starts_with(ACTIVE_SESSION_PREFIX) {
                self.remove(&key).await?;
            }
        }
        Ok(())
    }

    // Capture-mode flag

    pub async fn load_full_info_mode(&self) -> Result<bool, StorageError> {
        Ok(self.read(FULL_INFO_MODE_KEY).await?.unwrap_or(false))
    }

    pub async fn set_full_info_mode(&self, enabled: bool) -> Result<(), StorageError> {
        self.write(FULL_INFO_MODE_KEY, &enabled).await
    }

    // Analytics cache

    pub async fn get_analytics_cache(&self) -> Option<AnalyticsCache> {
        self.read(ANALYTICS_CACHE_KEY).await.unwrap_or_else(|e| {
            tracing::warn!("Failed to read analytics cache: {}", e);
            None
        })
    }

    pub async fn set_analytics_cache(&self, cache: &AnalyticsCache) -> Result<(), StorageError> {
        self.write(ANALYTICS_CACHE_KEY, cache).await
    }

    pub async fn clear_analytics_cache(&self) -> Result<(), StorageError> {
        self.remove(ANALYTICS_CACHE_KEY).await
    }

    // URL history

    pub async fn get_url_history(&self) -> Vec<UrlHistoryEntry> {
        self.read(URL_HISTORY_KEY)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to read URL history: {}", e);
                None
            })
            .unwrap_or_default()
    }

    /// Append an entry, keeping only the newest `max_history_size` entries
    pub async fn push_url_history(&self, entry: UrlHistoryEntry) -> Result<(), StorageError> {
        let _guard = self.shared_keys.lock().await;
        let limit = self.get_max_history_size().await;
        let mut history = self.get_url_history().await;
        history.push(entry);
        if history.len() > limit {
            let excess = history.len() - limit;
            history.drain(..excess);
        }
        self.write(URL_HISTORY_KEY, &history).await
    }

    pub async fn clear_url_history(&self) -> Result<(), StorageError> {
        self.write(URL_HISTORY_KEY, &Vec::<UrlHistoryEntry>::new()).await
    }

    pub async fn get_max_history_size(&self) -> usize {
        match self.read::<usize>(MAX_HISTORY_SIZE_KEY).await {
            Ok(Some(size)) if (1..=MAX_HISTORY_SIZE_LIMIT).contains(&size) => size,
            Ok(_) => DEFAULT_MAX_HISTORY_SIZE,
            Err(e) => {
                tracing::warn!("Failed to read history size: {}", e);
                DEFAULT_MAX_HISTORY_SIZE
            }
        }
    }

    /// Persist a new bound and trim the stored history to it
    pub async fn set_max_history_size(&self, size: usize) -> Result<(), SettingsError> {
        if !(1..=MAX_HISTORY_SIZE_LIMIT).contains(&size) {
            return Err(SettingsError::HistorySizeOutOfRange {
                value: size,
                max: MAX_HISTORY_SIZE_LIMIT,
            });
        }
        let _guard = self.shared_keys.lock().await;
        self.write(MAX_HISTORY_SIZE_KEY, &size).await?;

        let mut history = self.get_url_history().await;
        if history.len() > size {
            let excess = history.len() - size;
            history.drain(..excess);
            self.write(URL_HISTORY_KEY, &history).await?;
        }
        Ok(())
    }

    // Request presets

    pub async fn get_presets(&self) -> Vec<RequestPreset> {
        self.read(PRESETS_KEY)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to read presets: {}", e);
                None
            })
            .unwrap_or_default()
    }

    pub async fn save_preset(&self, preset: &RequestPreset) -> Result<(), StorageError> {
        let _guard = self.shared_keys.lock().await;
        let mut presets = self.get_presets().await;
        match presets.iter_mut().find(|p| p.id == preset.id) {
            Some(slot) => *slot = preset.clone(),
            None => presets.push(preset.clone()),
        }
        self.write(PRESETS_KEY, &presets).await
    }

    /// Returns `false` if no preset had that id
    pub async fn delete_preset(&self, preset_id: &str) -> Result<bool, StorageError> {
        let _guard = self.shared_keys.lock().await;
        let mut presets = self.get_presets().await;
        let before = presets.len();
        presets.retain(|p| p.id != preset_id);
        if presets.len() == before {
            return Ok(false);
        }
        self.write(PRESETS_KEY, &presets).await?;
        Ok(true)
    }

    /// Wipe the session log, every active slot, URL history and the analytics
    /// cache, one awaited step after another
    pub async fn clear_all(&self) -> Result<(), StorageError> {
        self.clear_sessions().await?;
        self.clear_all_active_sessions().await?;
        self.clear_url_history().await?;
        self.clear_analytics_cache().await?;
        tracing::info!("Cleared all persisted sessions and caches");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use serde_json::json;

    fn gateway() -> (Arc<MemoryStore>, StorageGateway) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), StorageGateway::new(store))
    }

    fn history_entry(n: i64) -> UrlHistoryEntry {
        UrlHistoryEntry {
            tab_id: 1,
            url: format!("https://example.com/{}", n),
            title: format!("Page {}", n),
            timestamp: n,
        }
    }

    #[tokio::test]
    async fn test_writes_are_versioned() {
        let (store, gateway) = gateway();
        gateway.set_full_info_mode(true).await.unwrap();

        let raw = store.get(FULL_INFO_MODE_KEY).await.unwrap().unwrap();
        assert_eq!(raw, json!({"schemaVersion": 1, "data": true}));
        assert!(gateway.load_full_info_mode().await.unwrap());
    }

    #[tokio::test]
    async fn test_reads_accept_legacy_bare_payload() {
        let (store, gateway) = gateway();
        store
            .set(
                SESSIONS_KEY,
                json!([{"id": "session-old", "domain": "example.com", "startTime": 1, "apiCalls": []}]),
            )
            .await
            .unwrap();

        let sessions = gateway.get_all_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "session-old");
    }

    #[tokio::test]
    async fn test_session_log_is_bounded() {
        let store = Arc::new(MemoryStore::new());
        let gateway = StorageGateway::with_session_limit(store, 2);

        let sessions: Vec<Session> = (0..3).map(|_| Session::new("example.com")).collect();
        for session in &sessions {
            gateway.save_session(session).await.unwrap();
        }

        let logged: Vec<String> = gateway.get_all_sessions().await.into_iter().map(|s| s.id).collect();
        assert_eq!(logged, vec![sessions[1].id.clone(), sessions[2].id.clone()]);
    }

    #[tokio::test]
    async fn test_upsert_and_lookup_by_id() {
        let (_, gateway) = gateway();
        let mut session = Session::new("example.com");
        assert!(!gateway.upsert_session(&session).await.unwrap());

        session.domain = "changed.example.com".to_string();
        assert!(gateway.upsert_session(&session).await.unwrap());
        assert_eq!(gateway.get_all_sessions().await.len(), 1);

        let found = gateway.get_session_by_id(&session.id).await.unwrap();
        assert_eq!(found.domain, "changed.example.com");
        assert!(gateway.get_session_by_id("session-missing").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_appends_to_shared_keys() {
        let (_, gateway) = gateway();
        let mut handles = Vec::new();
        for n in 0..30 {
            let gateway = gateway.clone();
            handles.push(tokio::spawn(async move {
                gateway.save_session(&Session::new("example.com")).await.unwrap();
                let preset = RequestPreset::new(
                    format!("Preset {}", n),
                    "GET".to_string(),
                    "https://api.example.com/items".to_string(),
                    "{}".to_string(),
                    String::new(),
                );
                gateway.save_preset(&preset).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(gateway.get_all_sessions().await.len(), 30);
        assert_eq!(gateway.get_presets().await.len(), 30);
    }

    #[tokio::test]
    async fn test_active_slots_per_tab() {
        let (_, gateway) = gateway();
        let a = Session::new("a.example.com");
        let b = Session::new("b.example.com");
        gateway.save_active_session(7, &a).await.unwrap();
        gateway.save_active_session(2, &b).await.unwrap();

        assert_eq!(gateway.get_active_session(7).await, Some(a.clone()));
        let tabs: Vec<TabId> = gateway
            .get_all_active_sessions()
            .await
            .iter()
            .map(|s| s.tab_id)
            .collect();
        assert_eq!(tabs, vec![2, 7]);

        gateway.clear_active_session(7).await.unwrap();
        assert!(gateway.get_active_session(7).await.is_none());

        gateway.clear_all_active_sessions().await.unwrap();
        assert!(gateway.get_all_active_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_url_history_keeps_newest_entries() {
        let (_, gateway) = gateway();
        gateway.set_max_history_size(3).await.unwrap();
        for n in 0..5 {
            gateway.push_url_history(history_entry(n)).await.unwrap();
        }

        let stamps: Vec<i64> = gateway.get_url_history().await.iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![2, 3, 4]);

        gateway.set_max_history_size(1).await.unwrap();
        assert_eq!(gateway.get_url_history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_history_size_validation() {
        let (_, gateway) = gateway();
        assert_eq!(gateway.get_max_history_size().await, DEFAULT_MAX_HISTORY_SIZE);

        assert!(matches!(
            gateway.set_max_history_size(0).await,
            Err(SettingsError::HistorySizeOutOfRange { value: 0, .. })
        ));
        assert!(gateway.set_max_history_size(51).await.is_err());
        assert!(gateway.set_max_history_size(50).await.is_ok());
        assert_eq!(gateway.get_max_history_size().await, 50);
    }

    #[tokio::test]
    async fn test_presets_save_replace_delete() {
        let (_, gateway) = gateway();
        let mut preset = RequestPreset::new(
            "Users".to_string(),
            "GET".to_string(),
            "https://api.example.com/users".to_string(),
            "{}".to_string(),
            String::new(),
        );
        gateway.save_preset(&preset).await.unwrap();
        preset.name = "All users".to_string();
        gateway.save_preset(&preset).await.unwrap();

        let presets = gateway.get_presets().await;
        assert_eq!(presets.len(), 1);
        assert_eq!(presets[0].name, "All users");

        assert!(gateway.delete_preset(&preset.id).await.unwrap());
        assert!(!gateway.delete_preset(&preset.id).await.unwrap());
        assert!(gateway.get_presets().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_wipes_every_listed_key() {
        let (store, gateway) = gateway();
        let session = Session::new("example.com");
        gateway.save_session(&session).await.unwrap();
        gateway.save_active_session(1, &session).await.unwrap();
        gateway.save_active_session(2, &session).await.unwrap();
        gateway.push_url_history(history_entry(1)).await.unwrap();
        gateway
            .set_analytics_cache(&AnalyticsCache {
                timestamp: 1,
                scope: AnalyticsScope::All,
                window: TimeWindow::All,
                data: AnalyticsSnapshot::default(),
            })
            .await
            .unwrap();
        gateway.set_full_info_mode(true).await.unwrap();

        gateway.clear_all().await.unwrap();

        assert!(gateway.get_all_sessions().await.is_empty());
        assert!(gateway.get_all_active_sessions().await.is_empty());
        assert!(gateway.get_url_history().await.is_empty());
        assert!(gateway.get_analytics_cache().await.is_none());
        // Settings survive a clear
        assert!(gateway.load_full_info_mode().await.unwrap());
        assert!(store.get(ANALYTICS_CACHE_KEY).await.unwrap().is_none());
    }
}
