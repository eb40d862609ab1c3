//! FaceGate Terminal - Secure Channel
//!
//! Stateless, message-oriented encryption between this terminal and its
//! paired server. Each call walks
//! `KEY_AGREEMENT -> DERIVE_KEYS -> ENCRYPT_OR_DECRYPT -> AUTHENTICATE`
//! on its own; nothing is shared between calls except the persisted
//! long-lived keys, which are only read.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use facegate_keyvault::KeyStore;

use crate::clock::{Clock, SystemClock};
use crate::envelope::{self, EncryptedEnvelope, DEFAULT_REPLAY_WINDOW_SECS};
use crate::error::{TerminalError, TerminalResult};

/// The single JSON wrapper that carries an envelope over HTTP.
///
/// Exactly one layer: the decrypted content is the business payload and
/// never contains another envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBody {
    #[serde(rename = "ENC")]
    pub enc: String,
}

pub struct SecureChannel {
    keystore: Arc<KeyStore>,
    clock: Arc<dyn Clock>,
    replay_window_secs: u64,
}

impl SecureChannel {
    pub fn new(keystore: Arc<KeyStore>) -> Self {
        Self::with_clock(keystore, Arc::new(SystemClock), DEFAULT_REPLAY_WINDOW_SECS)
    }

    pub fn with_clock(
        keystore: Arc<KeyStore>,
        clock: Arc<dyn Clock>,
        replay_window_secs: u64,
    ) -> Self {
        Self {
            keystore,
            clock,
            replay_window_secs,
        }
    }

    pub fn keystore(&self) -> &Arc<KeyStore> {
        &self.keystore
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn replay_window_secs(&self) -> u64 {
        self.replay_window_secs
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DEVICE -> SERVER
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt raw bytes for the paired server.
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> TerminalResult<String> {
        if !self.keystore.is_paired() {
            return Err(TerminalError::NotPaired);
        }

        let device = self
            .keystore
            .device_keypair()?
            .ok_or(TerminalError::NotPaired)?;
        let server = self
            .keystore
            .server_public_key()?
            .ok_or(TerminalError::NotPaired)?;

        let envelope = envelope::seal(
            &server,
            &device.client_id(),
            plaintext,
            self.clock.now_unix(),
        )?;
        Ok(envelope.encode())
    }

    /// Serialize `payload` as JSON and encrypt it for the paired server.
    pub fn encrypt_json<T: Serialize + ?Sized>(&self, payload: &T) -> TerminalResult<String> {
        let json = zeroize::Zeroizing::new(serde_json::to_vec(payload)?);
        self.encrypt_bytes(&json)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SERVER -> DEVICE
    // ═══════════════════════════════════════════════════════════════════════

    /// Verify and decrypt an envelope addressed to this device.
    pub fn decrypt(&self, encoded: &str) -> TerminalResult<String> {
        let envelope = EncryptedEnvelope::decode(encoded)?;

        let device = self
            .keystore
            .device_keypair()?
            .ok_or(TerminalError::NotPaired)?;

        let plaintext = envelope::open(
            device.secret(),
            &envelope,
            self.clock.now_unix(),
            self.replay_window_secs,
        )
        .map_err(|e| {
            if e.is_security_critical() {
                log::warn!("discarding envelope from {}: {}", envelope.client_id, e);
            }
            e
        })?;

        String::from_utf8(plaintext)
            .map_err(|_| TerminalError::Protocol("plaintext is not UTF-8".into()))
    }

    /// Decrypt and parse a JSON payload.
    pub fn decrypt_json<T: DeserializeOwned>(&self, encoded: &str) -> TerminalResult<T> {
        let plaintext = zeroize::Zeroizing::new(self.decrypt(encoded)?);
        Ok(serde_json::from_str(&plaintext)?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // HTTP BODY CONTRACT
    // ═══════════════════════════════════════════════════════════════════════

    /// Wrap a request payload as `{"ENC": "..."}`.
    pub fn seal_request<T: Serialize + ?Sized>(&self, payload: &T) -> TerminalResult<EncryptedBody> {
        Ok(EncryptedBody {
            enc: self.encrypt_json(payload)?,
        })
    }

    /// Unwrap one `{"ENC": "..."}` layer from a response.
    pub fn open_response(&self, body: &EncryptedBody) -> TerminalResult<String> {
        self.decrypt(&body.enc)
    }

    /// Parse a raw response body as [`EncryptedBody`] and unwrap it.
    pub fn open_response_bytes(&self, body: &[u8]) -> TerminalResult<String> {
        let body: EncryptedBody = serde_json::from_slice(body)
            .map_err(|e| TerminalError::Protocol(format!("response is not an ENC body: {e}")))?;
        self.open_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use facegate_keyvault::{DeviceKeyPair, MemoryStorage};
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        channel: SecureChannel,
        clock: Arc<FixedClock>,
        server: DeviceKeyPair,
        device_client_id: String,
    }

    fn paired() -> Fixture {
        let keystore = Arc::new(KeyStore::with_storage(Box::new(MemoryStorage::new())));
        let device = keystore.get_or_create_device_keypair().unwrap();
        let server = DeviceKeyPair::generate();
        keystore
            .set_server_public_key(&server.public_bytes())
            .unwrap();

        let clock = Arc::new(FixedClock::new(NOW));
        let channel = SecureChannel::with_clock(keystore, clock.clone(), 300);
        Fixture {
            channel,
            clock,
            server,
            device_client_id: device.client_id(),
        }
    }

    /// What the backend would send back to the device
    fn server_seal(fx: &Fixture, plaintext: &str, at: i64) -> String {
        let device = fx.channel.keystore().device_keypair().unwrap().unwrap();
        envelope::seal(device.public_key(), &fx.device_client_id, plaintext.as_bytes(), at)
            .unwrap()
            .encode()
    }

    #[test]
    fn test_not_paired() {
        let keystore = Arc::new(KeyStore::with_storage(Box::new(MemoryStorage::new())));
        let channel = SecureChannel::new(keystore);
        assert!(matches!(
            channel.encrypt_json(&json!({"a": 1})),
            Err(TerminalError::NotPaired)
        ));
    }

    #[test]
    fn test_server_can_open_device_message() {
        let fx = paired();
        let encoded = fx.channel.encrypt_json(&json!({"event": "heartbeat"})).unwrap();

        let env = EncryptedEnvelope::decode(&encoded).unwrap();
        assert_eq!(env.client_id, fx.device_client_id);
        assert_eq!(env.timestamp, NOW.to_string());

        let plaintext = envelope::open(fx.server.secret(), &env, NOW, 300).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(value, json!({"event": "heartbeat"}));
    }

    #[test]
    fn test_device_opens_server_message() {
        let fx = paired();
        let encoded = server_seal(&fx, r#"{"status":"ok"}"#, NOW);

        assert_eq!(fx.channel.decrypt(&encoded).unwrap(), r#"{"status":"ok"}"#);

        let value: serde_json::Value = fx.channel.decrypt_json(&encoded).unwrap();
        assert_eq!(value["status"], "ok");
    }

    #[test]
    fn test_roundtrip_when_paired_with_self() {
        let keystore = Arc::new(KeyStore::with_storage(Box::new(MemoryStorage::new())));
        let device = keystore.get_or_create_device_keypair().unwrap();
        keystore.set_server_public_key(&device.public_bytes()).unwrap();
        let channel = SecureChannel::new(keystore);

        for payload in [json!(null), json!("ação"), json!({"ids": [1, 2, 3], "nested": {"k": "v"}})] {
            let encoded = channel.encrypt_json(&payload).unwrap();
            let back: serde_json::Value = channel.decrypt_json(&encoded).unwrap();
            assert_eq!(back, payload);
        }
    }

    #[test]
    fn test_replay_window() {
        let fx = paired();
        let fresh = server_seal(&fx, "{}", NOW - 299);
        assert!(fx.channel.decrypt(&fresh).is_ok());

        let stale = server_seal(&fx, "{}", NOW - 301);
        assert!(matches!(
            fx.channel.decrypt(&stale),
            Err(TerminalError::ExpiredPayload { .. })
        ));

        // The same envelope ages out as time passes
        let env = server_seal(&fx, "{}", NOW);
        fx.clock.advance(301);
        assert!(fx.channel.decrypt(&env).is_err());
    }

    #[test]
    fn test_encrypted_body_contract() {
        let fx = paired();
        let body = fx.channel.seal_request(&json!({"since": null})).unwrap();
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("ENC").and_then(|v| v.as_str()).is_some());

        let response = EncryptedBody {
            enc: server_seal(&fx, r#"{"dataset":[]}"#, NOW),
        };
        let raw = serde_json::to_vec(&response).unwrap();
        assert_eq!(
            fx.channel.open_response_bytes(&raw).unwrap(),
            r#"{"dataset":[]}"#
        );

        assert!(matches!(
            fx.channel.open_response_bytes(b"{\"plain\":true}"),
            Err(TerminalError::Protocol(_))
        ));
    }

    #[test]
    fn test_tampered_envelope_never_decrypts() {
        let fx = paired();
        let encoded = server_seal(&fx, r#"{"open":"door 1"}"#, NOW);
        let mut env = EncryptedEnvelope::decode(&encoded).unwrap();
        env.ciphertext = {
            use base64::{engine::general_purpose::STANDARD, Engine as _};
            let mut ct = STANDARD.decode(&env.ciphertext).unwrap();
            ct[3] ^= 0x80;
            STANDARD.encode(ct)
        };

        assert!(matches!(
            fx.channel.decrypt(&env.encode()),
            Err(TerminalError::Integrity)
        ));
    }
}
