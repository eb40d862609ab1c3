//! FaceGate Terminal - Pairing
//!
//! One-time bootstrap: an out-of-band credential plus the device public key
//! are exchanged for the server public key and a bearer token.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use facegate_keyvault::{decode_public_key, encode_public_key, KeyStore, Registration};

use crate::error::{TerminalError, TerminalResult};
use crate::transport::{OutboundRequest, Transport};

pub const DEFAULT_PAIRING_PATH: &str = "/api/terminal/pair";

/// Body posted to the pairing endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRequest {
    /// Scanned pairing credential
    pub token: String,
    /// Device public key, uncompressed point hex
    pub public_key: String,
}

/// Body returned by the pairing endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingResponse {
    pub device_id: Option<String>,
    pub access_token: Option<String>,
    pub server_url: Option<String>,
    pub server_public_key: Option<String>,
    /// Server-side rejection message, if any
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PairingOutcome {
    #[serde(rename_all = "camelCase")]
    Paired {
        device_id: String,
        access_token: String,
        server_url: String,
    },
    Failed {
        reason: String,
    },
}

impl PairingOutcome {
    pub fn is_paired(&self) -> bool {
        matches!(self, PairingOutcome::Paired { .. })
    }

    fn failed(reason: impl Into<String>) -> Self {
        PairingOutcome::Failed {
            reason: reason.into(),
        }
    }
}

pub struct PairingFlow {
    keystore: Arc<KeyStore>,
    path: String,
}

impl PairingFlow {
    pub fn new(keystore: Arc<KeyStore>) -> Self {
        Self::with_path(keystore, DEFAULT_PAIRING_PATH)
    }

    pub fn with_path(keystore: Arc<KeyStore>, path: impl Into<String>) -> Self {
        Self {
            keystore,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Build the pairing request. The device key pair is generated first
    /// if it does not exist yet.
    pub fn build_request(&self, credential: &str) -> TerminalResult<PairingRequest> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(TerminalError::PairingRejected("empty pairing credential".into()));
        }

        let device = self.keystore.get_or_create_device_keypair()?;
        Ok(PairingRequest {
            token: credential.to_string(),
            public_key: device.public_hex().to_string(),
        })
    }

    /// Interpret the server's answer and persist the pairing on success.
    ///
    /// Every failure is reported as [`PairingOutcome::Failed`] and leaves the
    /// store unpaired.
    pub fn complete(&self, status: u16, body: &[u8]) -> PairingOutcome {
        match self.try_complete(status, body) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("pairing failed: {}", e);
                // Never leave a half-written pairing behind
                if let Err(clear) = self.keystore.clear_pairing() {
                    log::error!("could not roll back pairing state: {}", clear);
                }
                PairingOutcome::failed(e.to_string())
            }
        }
    }

    fn try_complete(&self, status: u16, body: &[u8]) -> TerminalResult<PairingOutcome> {
        let response: PairingResponse = if body.is_empty() {
            PairingResponse::default()
        } else {
            serde_json::from_slice(body).map_err(|e| {
                TerminalError::PairingRejected(format!("unreadable pairing response: {e}"))
            })?
        };

        if !(200..300).contains(&status) {
            let detail = response
                .error
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(TerminalError::PairingRejected(detail));
        }

        // Success status without a server key is still a failure
        let server_key = response
            .server_public_key
            .ok_or_else(|| TerminalError::PairingRejected("response carries no server public key".into()))?;
        let server_key = decode_public_key(&server_key)
            .map_err(|e| TerminalError::PairingRejected(format!("invalid server public key: {e}")))?;

        let access_token = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TerminalError::PairingRejected("response carries no access token".into()))?;
        let device_id = response.device_id.unwrap_or_default();
        let server_url = response.server_url.unwrap_or_default();

        // Server key last: it is what flips `is_paired`
        self.keystore.set_access_token(&access_token)?;
        self.keystore.set_registration(&Registration {
            device_id: device_id.clone(),
            server_url: Some(server_url.clone()).filter(|u| !u.is_empty()),
            paired_at: Utc::now(),
        })?;
        self.keystore
            .set_server_public_key_hex(&encode_public_key(&server_key))?;

        log::info!("paired as device {:?} with {}", device_id, server_url);
        Ok(PairingOutcome::Paired {
            device_id,
            access_token,
            server_url,
        })
    }

    /// Full exchange over a caller-supplied transport
    pub async fn pair<T: Transport>(&self, transport: &T, credential: &str) -> PairingOutcome {
        let request = match self.build_request(credential) {
            Ok(r) => r,
            Err(e) => return PairingOutcome::failed(e.to_string()),
        };
        let body = match serde_json::to_vec(&request) {
            Ok(b) => b,
            Err(e) => return PairingOutcome::failed(e.to_string()),
        };

        match transport.post(OutboundRequest::new(self.path.clone(), body)).await {
            Ok(response) => self.complete(response.status, &response.body),
            Err(e) => {
                log::warn!("pairing request did not reach the server: {}", e);
                PairingOutcome::failed(e.to_string())
            }
        }
    }
}
