//! FaceGate Terminal - Dataset Sync
//!
//! Fetches the enrolled dataset from the paired server over the encrypted
//! channel and swaps it into the [`EmbeddingStore`]. One refresh runs at a
//! time; a failed refresh leaves the previous dataset live.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::channel::SecureChannel;
use crate::clock::Clock;
use crate::config::DEFAULT_DATASET_PATH;
use crate::embeddings::{EmbeddingStore, SyncResult};
use crate::error::{TerminalError, TerminalResult};
use crate::transport::{OutboundRequest, Transport};

/// Business payload of a dataset request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetRequest {
    /// Last successful sync, so the server may skip unchanged datasets
    pub since: Option<DateTime<Utc>>,
}

/// Sync status
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub syncing: bool,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
    /// Dataset generation installed by the last success
    pub generation: u64,
}

pub struct DatasetSync {
    channel: Arc<SecureChannel>,
    store: Arc<EmbeddingStore>,
    path: String,
    /// Serializes fetch-and-swap
    running: tokio::sync::Mutex<()>,
    status: RwLock<SyncStatus>,
}

impl DatasetSync {
    pub fn new(channel: Arc<SecureChannel>, store: Arc<EmbeddingStore>) -> Self {
        Self::with_path(channel, store, DEFAULT_DATASET_PATH)
    }

    pub fn with_path(
        channel: Arc<SecureChannel>,
        store: Arc<EmbeddingStore>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            store,
            path: path.into(),
            running: tokio::sync::Mutex::new(()),
            status: RwLock::new(SyncStatus::default()),
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status.read().clone()
    }

    /// Fetch and apply the current dataset.
    pub async fn refresh<T: Transport>(&self, transport: &T) -> TerminalResult<SyncResult> {
        let _running = self.running.lock().await;
        self.status.write().syncing = true;

        let result = self.fetch_and_apply(transport).await;

        let mut status = self.status.write();
        status.syncing = false;
        match &result {
            Ok(sync) => {
                status.last_error = None;
                status.last_success = Some(sync.last_sync);
                status.generation = sync.generation;
            }
            Err(e) if e.is_retryable() => {
                log::info!("dataset refresh failed, will retry: {}", e);
                status.last_error = Some(e.to_string());
            }
            Err(e) => {
                log::warn!("dataset refresh failed: {}", e);
                status.last_error = Some(e.to_string());
            }
        }

        result
    }

    async fn fetch_and_apply<T: Transport>(&self, transport: &T) -> TerminalResult<SyncResult> {
        let token = self
            .channel
            .keystore()
            .access_token()?
            .ok_or(TerminalError::NotPaired)?;

        let request = DatasetRequest {
            since: self.store.snapshot().last_sync(),
        };
        let body = serde_json::to_vec(&self.channel.seal_request(&request)?)?;

        let response = transport
            .post(OutboundRequest::new(self.path.clone(), body).with_bearer(token))
            .await?
            .error_for_status()?;

        let plaintext = zeroize::Zeroizing::new(self.channel.open_response_bytes(&response.body)?);
        self.store
            .apply_sync_bytes(plaintext.as_bytes(), self.channel.clock().now())
    }
}
