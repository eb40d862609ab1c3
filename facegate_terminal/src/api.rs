//! FaceGate Terminal - Unified Public API
//!
//! Single entry point wiring the keystore, secure channel, pairing,
//! embedding store, match engine and dataset sync together.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use facegate_keyvault::{KeyStore, Registration};

use crate::channel::SecureChannel;
use crate::clock::{Clock, SystemClock};
use crate::config::TerminalConfig;
use crate::embeddings::{DatasetMeta, EmbeddingStore, SyncPayload, SyncResult};
use crate::error::TerminalResult;
use crate::matcher::{MatchEngine, Recognition, RecognitionStats, ThresholdEstimate, Verdict};
use crate::pairing::{PairingFlow, PairingOutcome, PairingRequest};
use crate::sync::{DatasetSync, SyncStatus};
use crate::transport::Transport;

/// Snapshot of terminal state for status screens
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalStatus {
    pub paired: bool,
    pub client_id: Option<String>,
    pub device_id: Option<String>,
    pub server_url: Option<String>,
    pub paired_at: Option<DateTime<Utc>>,
    pub recognition: RecognitionStats,
    pub sync: SyncStatus,
}

/// FaceGate terminal API
///
/// # Example
///
/// ```rust,ignore
/// use facegate_terminal::{TerminalApi, TerminalConfig};
///
/// let api = TerminalApi::open(TerminalConfig::default())?;
///
/// // One-time pairing over the host's HTTP client
/// let outcome = api.pair(&http, "QR-CREDENTIAL").await;
///
/// // Pull the enrolled dataset, then recognize
/// api.refresh_dataset(&http).await?;
/// if let Some(hit) = api.recognize(&embedding) {
///     println!("{} ({:.2})", hit.id, hit.confidence);
/// }
/// ```
pub struct TerminalApi {
    config: TerminalConfig,
    keystore: Arc<KeyStore>,
    channel: Arc<SecureChannel>,
    pairing: PairingFlow,
    store: Arc<EmbeddingStore>,
    engine: MatchEngine,
    sync: DatasetSync,
}

impl TerminalApi {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Open the terminal state described by `config`. A persisted dataset
    /// is loaded if present.
    pub fn open(config: TerminalConfig) -> TerminalResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: TerminalConfig, clock: Arc<dyn Clock>) -> TerminalResult<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.data_dir)?;
        let keystore = Arc::new(KeyStore::open(config.keyvault_dir())?);
        let store = Arc::new(EmbeddingStore::open(&config.data_dir, &config.dataset_file));

        match store.load() {
            Some(meta) => log::info!(
                "dataset ready: {} people, dimension {}",
                meta.people_count,
                meta.dimension
            ),
            None => log::info!("no dataset yet, waiting for first sync"),
        }

        Ok(Self::assemble(config, keystore, store, clock))
    }

    /// Build from already-opened parts
    pub fn from_parts(
        config: TerminalConfig,
        keystore: Arc<KeyStore>,
        store: Arc<EmbeddingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::assemble(config, keystore, store, clock)
    }

    fn assemble(
        config: TerminalConfig,
        keystore: Arc<KeyStore>,
        store: Arc<EmbeddingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let channel = Arc::new(SecureChannel::with_clock(
            Arc::clone(&keystore),
            clock,
            config.replay_window_secs,
        ));
        let pairing = PairingFlow::with_path(Arc::clone(&keystore), config.pairing_path.clone());
        let engine = MatchEngine::new(Arc::clone(&store), config.matching.clone());
        let sync = DatasetSync::with_path(
            Arc::clone(&channel),
            Arc::clone(&store),
            config.dataset_path.clone(),
        );

        Self {
            config,
            keystore,
            channel,
            pairing,
            store,
            engine,
            sync,
        }
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    pub fn keystore(&self) -> &Arc<KeyStore> {
        &self.keystore
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PAIRING
    // ═══════════════════════════════════════════════════════════════════════

    pub fn is_paired(&self) -> bool {
        self.keystore.is_paired()
    }

    pub async fn pair<T: Transport>(&self, transport: &T, credential: &str) -> PairingOutcome {
        self.pairing.pair(transport, credential).await
    }

    /// First half of pairing for callers that run their own HTTP exchange
    pub fn pairing_request(&self, credential: &str) -> TerminalResult<PairingRequest> {
        self.pairing.build_request(credential)
    }

    /// Second half of pairing: the server's raw answer
    pub fn complete_pairing(&self, status: u16, body: &[u8]) -> PairingOutcome {
        self.pairing.complete(status, body)
    }

    /// Forget the server; the device key pair survives
    pub fn unpair(&self) -> TerminalResult<()> {
        self.keystore.clear_pairing()?;
        Ok(())
    }

    pub fn registration(&self) -> TerminalResult<Option<Registration>> {
        Ok(self.keystore.registration()?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ENCRYPTED CHANNEL
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt a JSON payload for the paired server
    pub fn encrypt<T: Serialize + ?Sized>(&self, payload: &T) -> TerminalResult<String> {
        self.channel.encrypt_json(payload)
    }

    /// Decrypt an envelope from the paired server
    pub fn decrypt(&self, envelope: &str) -> TerminalResult<String> {
        self.channel.decrypt(envelope)
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, envelope: &str) -> TerminalResult<T> {
        self.channel.decrypt_json(envelope)
    }

    pub fn channel(&self) -> &Arc<SecureChannel> {
        &self.channel
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DATASET
    // ═══════════════════════════════════════════════════════════════════════

    pub fn apply_sync(&self, payload: SyncPayload, timestamp: DateTime<Utc>) -> TerminalResult<SyncResult> {
        self.store.apply_sync(payload, timestamp)
    }

    pub fn apply_sync_bytes(&self, body: &[u8], timestamp: DateTime<Utc>) -> TerminalResult<SyncResult> {
        self.store.apply_sync_bytes(body, timestamp)
    }

    /// Apply a dataset that arrived as an `{"ENC": ...}` body
    pub fn apply_encrypted_sync(&self, body: &[u8], timestamp: DateTime<Utc>) -> TerminalResult<SyncResult> {
        let plaintext = zeroize::Zeroizing::new(self.channel.open_response_bytes(body)?);
        self.store.apply_sync_bytes(plaintext.as_bytes(), timestamp)
    }

    pub async fn refresh_dataset<T: Transport>(&self, transport: &T) -> TerminalResult<SyncResult> {
        self.sync.refresh(transport).await
    }

    pub fn dataset_meta(&self) -> DatasetMeta {
        self.store.snapshot().meta()
    }

    pub fn roster(&self) -> Vec<(String, Option<String>)> {
        self.store.roster()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECOGNITION
    // ═══════════════════════════════════════════════════════════════════════

    pub fn recognize(&self, embedding: &[f32]) -> Option<Recognition> {
        self.engine.recognize(embedding)
    }

    pub fn recognize_detailed(&self, embedding: &[f32]) -> Verdict {
        self.engine.recognize_detailed(embedding)
    }

    pub fn calibrate(&self, target_false_match_rate: f64, sample_limit: usize) -> ThresholdEstimate {
        self.engine.calibrate(target_false_match_rate, sample_limit)
    }

    pub fn stats(&self) -> RecognitionStats {
        self.engine.stats()
    }

    pub fn status(&self) -> TerminalStatus {
        let registration = self.keystore.registration().ok().flatten();
        TerminalStatus {
            paired: self.is_paired(),
            client_id: self.keystore.client_id().ok().flatten(),
            device_id: registration.as_ref().map(|r| r.device_id.clone()),
            server_url: registration.as_ref().and_then(|r| r.server_url.clone()),
            paired_at: registration.map(|r| r.paired_at),
            recognition: self.stats(),
            sync: self.sync.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope;
    use crate::error::TerminalError;
    use crate::transport::mock::MockTransport;
    use crate::transport::InboundResponse;
    use facegate_keyvault::DeviceKeyPair;
    use serde_json::json;
    use tempfile::tempdir;

    fn pairing_body(server: &DeviceKeyPair) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "deviceId": "gate-3",
            "accessToken": "tok",
            "serverUrl": "https://gate.example",
            "serverPublicKey": server.public_hex(),
        }))
        .unwrap()
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = tempdir().unwrap();
        let api = TerminalApi::open(TerminalConfig::with_data_dir(dir.path())).unwrap();

        assert!(!api.is_paired());
        assert!(api.recognize(&[1.0, 0.0]).is_none());
        assert!(matches!(api.encrypt(&json!({})), Err(TerminalError::NotPaired)));

        let status = api.status();
        assert!(!status.paired);
        assert!(status.client_id.is_none());
        assert_eq!(status.recognition.known_people, 0);
    }

    #[test]
    fn test_pair_encrypt_decrypt_unpair() {
        let dir = tempdir().unwrap();
        let api = TerminalApi::open(TerminalConfig::with_data_dir(dir.path())).unwrap();
        let server = DeviceKeyPair::generate();

        let request = api.pairing_request("QR-1").unwrap();
        assert!(dir.path().join("keys").join("device_private.pem").exists());

        assert!(api.complete_pairing(200, &pairing_body(&server)).is_paired());
        assert!(api.is_paired());

        let status = api.status();
        assert_eq!(status.device_id.as_deref(), Some("gate-3"));
        assert_eq!(status.client_id.as_deref(), Some(&facegate_keyvault::client_id_of(&request.public_key)[..]));

        // Device -> server
        let enc = api.encrypt(&json!({"event": "door"})).unwrap();
        let sealed = envelope::EncryptedEnvelope::decode(&enc).unwrap();
        let plain = envelope::open(server.secret(), &sealed, Utc::now().timestamp(), 300).unwrap();
        assert_eq!(plain, br#"{"event":"door"}"#);

        // Server -> device
        let device = api.keystore().device_keypair().unwrap().unwrap();
        let reply = envelope::seal(device.public_key(), "server", b"{\"ok\":true}", Utc::now().timestamp())
            .unwrap()
            .encode();
        let value: serde_json::Value = api.decrypt_json(&reply).unwrap();
        assert_eq!(value["ok"], true);

        api.unpair().unwrap();
        assert!(!api.is_paired());
        assert!(api.keystore().device_keypair().unwrap().is_some());
    }

    #[test]
    fn test_dataset_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let api = TerminalApi::open(TerminalConfig::with_data_dir(dir.path())).unwrap();
            let body = json!({
                "embeddingDimension": 2,
                "dataset": [
                    {"id": "A", "name": "Alice", "embedding": [1.0, 0.0]},
                    {"id": "B", "embedding": [0.0, 1.0]}
                ]
            });
            api.apply_sync_bytes(body.to_string().as_bytes(), Utc::now()).unwrap();
        }

        let api = TerminalApi::open(TerminalConfig::with_data_dir(dir.path())).unwrap();
        assert_eq!(api.dataset_meta().people_count, 2);
        let hit = api.recognize(&[0.99, 0.14]).unwrap();
        assert_eq!(hit.id, "A");
    }

    #[tokio::test]
    async fn test_full_flow_over_transport() {
        let dir = tempdir().unwrap();
        let api = TerminalApi::open(TerminalConfig::with_data_dir(dir.path())).unwrap();
        let server = DeviceKeyPair::generate();
        let transport = MockTransport::new();

        transport.push(Ok(InboundResponse::new(200, pairing_body(&server))));
        assert!(api.pair(&transport, "QR-2").await.is_paired());

        let device = api.keystore().device_keypair().unwrap().unwrap();
        let dataset = json!({
            "embeddingDimension": 2,
            "dataset": [{"id": "A", "embedding": [1.0, 0.0]}]
        });
        let enc = envelope::seal(
            device.public_key(),
            "server",
            dataset.to_string().as_bytes(),
            Utc::now().timestamp(),
        )
        .unwrap()
        .encode();
        transport.push(Ok(InboundResponse::new(
            200,
            serde_json::to_vec(&json!({ "ENC": enc })).unwrap(),
        )));

        let result = api.refresh_dataset(&transport).await.unwrap();
        assert_eq!(result.people_count, 1);
        assert_eq!(api.sync_status().generation, result.generation);
        assert_eq!(api.recognize(&[1.0, 0.0]).unwrap().id, "A");
    }
}
