//! UI message dispatch

use crate::reconciler::Reconciler;
use tabtrace_common::{Ack, Message, Reply};

/// Answer one UI message. Never fails; failures come back as an [`Ack`].
pub async fn dispatch(reconciler: &Reconciler, message: Message) -> Reply {
    tracing::debug!("Handling {}", message.name());

    match message {
        Message::GetApiCalls { tab_id } => {
            let calls = match tab_id {
                Some(tab_id) => reconciler
                    .session(tab_id)
                    .await
                    .map(|session| session.api_calls)
                    .unwrap_or_default(),
                None => Vec::new(),
            };
            Reply::ApiCalls(calls)
        }
        Message::GetAllApiCalls => Reply::ApiCalls(reconciler.all_calls().await),
        Message::GetSessionInfo { tab_id } => {
            let session = match tab_id {
                Some(tab_id) => reconciler.session(tab_id).await,
                None => None,
            };
            Reply::Session(session)
        }
        Message::GetAllSessions => Reply::Sessions(reconciler.gateway().get_all_sessions().await),
        Message::GetAllActiveSessions => Reply::ActiveSessions(reconciler.active_sessions().await),
        Message::SaveSession { session } => {
            match reconciler.gateway().upsert_session(&session).await {
                Ok(_) => Reply::Ack(Ack::ok()),
                Err(e) => {
                    tracing::error!("Failed to save session {}: {}", session.id, e);
                    Reply::Ack(Ack::failed(e))
                }
            }
        }
        Message::ClearSessions => match reconciler.clear().await {
            Ok(()) => Reply::Ack(Ack::ok()),
            Err(e) => {
                tracing::error!("Failed to clear sessions: {}", e);
                Reply::Ack(Ack::failed(e))
            }
        },
        Message::SetFullInfoMode { enabled } => match reconciler.capture().set(enabled).await {
            Ok(_) => Reply::Ack(Ack::ok()),
            Err(e) => {
                tracing::error!("Failed to set capture mode: {}", e);
                Reply::Ack(Ack::failed(e))
            }
        },
        Message::GetFullInfoMode => Reply::FullInfoMode {
            enabled: reconciler.capture().current().await.is_full(),
        },
        Message::GetTabInfo { tab_id } => Reply::TabInfo(reconciler.tabs().get(tab_id)),
        Message::ContentApiCalls { tab_id, api_calls } => {
            let outcome = reconciler.merge_page_calls(tab_id, api_calls).await;
            tracing::debug!("Page batch for tab {}: {:?}", tab_id, outcome);
            Reply::Ack(Ack::ok())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureModePolicy;
    use crate::persistence::{MemoryStore, StorageGateway};
    use crate::tabs::TabRegistry;
    use std::sync::Arc;
    use std::time::Duration;
    use tabtrace_common::{CallRecord, CaptureMode, Session, UrlHistoryEntry};

    fn reconciler() -> Reconciler {
        let gateway = StorageGateway::new(Arc::new(MemoryStore::new()));
        let capture = Arc::new(CaptureModePolicy::new(gateway.clone(), Duration::from_secs(2)));
        let tabs = Arc::new(TabRegistry::new());
        tabs.update(3, "https://app.example.com/", Some("App"));
        Reconciler::new(gateway, capture, tabs)
    }

    fn page_call(id: &str) -> CallRecord {
        CallRecord::observed(
            id,
            "https://api.example.com/a".to_string(),
            "GET".to_string(),
            1,
            CaptureMode::Reduced,
            None,
        )
    }

    #[tokio::test]
    async fn test_capture_mode_messages() {
        let r = reconciler();
        assert_eq!(
            dispatch(&r, Message::GetFullInfoMode).await,
            Reply::FullInfoMode { enabled: false }
        );
        assert_eq!(
            dispatch(&r, Message::SetFullInfoMode { enabled: true }).await,
            Reply::Ack(Ack::ok())
        );
        assert_eq!(
            dispatch(&r, Message::GetFullInfoMode).await,
            Reply::FullInfoMode { enabled: true }
        );
    }

    #[tokio::test]
    async fn test_calls_and_session_info() {
        let r = reconciler();
        dispatch(
            &r,
            Message::ContentApiCalls {
                tab_id: 3,
                api_calls: vec![page_call("1"), page_call("2")],
            },
        )
        .await;

        match dispatch(&r, Message::GetApiCalls { tab_id: Some(3) }).await {
            Reply::ApiCalls(calls) => assert_eq!(calls.len(), 2),
            other => panic!("Unexpected reply: {:?}", other),
        }
        assert_eq!(
            dispatch(&r, Message::GetApiCalls { tab_id: None }).await,
            Reply::ApiCalls(Vec::new())
        );
        assert_eq!(
            dispatch(&r, Message::GetSessionInfo { tab_id: Some(99) }).await,
            Reply::Session(None)
        );
        match dispatch(&r, Message::GetAllActiveSessions).await {
            Reply::ActiveSessions(sessions) => assert_eq!(sessions[0].tab_id, 3),
            other => panic!("Unexpected reply: {:?}", other),
        }
        match dispatch(&r, Message::GetTabInfo { tab_id: 3 }).await {
            Reply::TabInfo(Some(info)) => assert_eq!(info.title.as_deref(), Some("App")),
            other => panic!("Unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clear_sessions_wipes_everything() {
        let r = reconciler();
        dispatch(
            &r,
            Message::ContentApiCalls {
                tab_id: 3,
                api_calls: vec![page_call("1")],
            },
        )
        .await;
        dispatch(
            &r,
            Message::SaveSession {
                session: Session::new("example.com"),
            },
        )
        .await;
        r.gateway()
            .push_url_history(UrlHistoryEntry {
                tab_id: 3,
                url: "https://app.example.com/".to_string(),
                title: "App".to_string(),
                timestamp: 1,
            })
            .await
            .unwrap();

        assert_eq!(dispatch(&r, Message::ClearSessions).await, Reply::Ack(Ack::ok()));

        assert_eq!(dispatch(&r, Message::GetAllSessions).await, Reply::Sessions(Vec::new()));
        assert_eq!(
            dispatch(&r, Message::GetAllActiveSessions).await,
            Reply::ActiveSessions(Vec::new())
        );
        assert_eq!(dispatch(&r, Message::GetAllApiCalls).await, Reply::ApiCalls(Vec::new()));
        assert!(r.gateway().get_url_history().await.is_empty());
        assert!(r.gateway().get_analytics_cache().await.is_none());
    }

    #[tokio::test]
    async fn test_save_session_replaces_same_id() {
        let r = reconciler();
        let mut session = Session::new("example.com");
        dispatch(&r, Message::SaveSession { session: session.clone() }).await;
        session.domain = "renamed.example.com".to_string();
        dispatch(&r, Message::SaveSession { session: session.clone() }).await;

        assert_eq!(
            dispatch(&r, Message::GetAllSessions).await,
            Reply::Sessions(vec![session])
        );
    }
}
