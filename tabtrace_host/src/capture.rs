//! Reduced vs. full capture policy

use crate::error::StorageError;
use crate::persistence::StorageGateway;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tabtrace_common::CaptureMode;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Process-wide capture mode, sourced from the persisted flag
///
/// The flag can change between events, so it is cached only for `ttl` and
/// re-read after that. A background task may refresh it on an interval too.
pub struct CaptureModePolicy {
    gateway: StorageGateway,
    ttl: Duration,
    cached: RwLock<Option<(CaptureMode, Instant)>>,
}

impl CaptureModePolicy {
    pub fn new(gateway: StorageGateway, ttl: Duration) -> Self {
        Self {
            gateway,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Mode to apply to the event being handled now
    pub async fn current(&self) -> CaptureMode {
        if let Some((mode, read_at)) = *self.cached.read().await {
            if read_at.elapsed() < self.ttl {
                return mode;
            }
        }
        self.refresh().await
    }

    /// Re-read the persisted flag. On a read failure the last known mode is
    /// kept, or reduced capture if none was ever read.
    pub async fn refresh(&self) -> CaptureMode {
        match self.gateway.load_full_info_mode().await {
            Ok(enabled) => {
                let mode = CaptureMode::from_enabled(enabled);
                *self.cached.write().await = Some((mode, Instant::now()));
                mode
            }
            Err(e) => {
                tracing::warn!("Failed to read capture mode: {}", e);
                self.cached
                    .read()
                    .await
                    .map(|(mode, _)| mode)
                    .unwrap_or_default()
            }
        }
    }

    /// Persist the new mode, then make it visible to subsequent events
    pub async fn set(&self, enabled: bool) -> Result<CaptureMode, StorageError> {
        self.gateway.set_full_info_mode(enabled).await?;
        let mode = CaptureMode::from_enabled(enabled);
        *self.cached.write().await = Some((mode, Instant::now()));
        tracing::info!("Capture mode set to {}", mode.as_str());
        Ok(mode)
    }

    /// Poll the persisted flag every `interval` for the life of the process
    pub fn spawn_refresh(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let mode = self.refresh().await;
                tracing::trace!("Capture mode refreshed: {}", mode.as_str());
            }
        })
    }
}
