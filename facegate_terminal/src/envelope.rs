//! FaceGate Terminal - Encrypted Envelope
//!
//! Wire format (one opaque base64 string):
//! ```text
//! base64( client_id : eph_pub_hex : nonce_b64 : ct_b64 : tag_b64 : unix_ts : mac_b64 )
//! ```
//! The MAC is HMAC-SHA256 over the first six fields joined with `:`,
//! exactly as they appear on the wire. It is checked before any
//! decryption is attempted.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use p256::{PublicKey, SecretKey};

use facegate_keyvault::{decode_public_key, encode_public_key};

use crate::crypto::{
    agree_ephemeral, agree_static, compute_hmac, decrypt_aes_gcm, encrypt_aes_gcm, verify_hmac,
};
use crate::error::{TerminalError, TerminalResult};

/// Number of colon-separated fields in a decoded envelope
pub const FIELD_COUNT: usize = 7;

/// Maximum accepted envelope age
pub const DEFAULT_REPLAY_WINDOW_SECS: u64 = 300;

const SEPARATOR: char = ':';

/// One encrypted message, fields kept as their wire text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub client_id: String,
    pub ephemeral_public_key: String,
    pub nonce: String,
    pub ciphertext: String,
    pub tag: String,
    pub timestamp: String,
    pub mac: String,
}

impl EncryptedEnvelope {
    /// The authenticated header: first six fields joined by `:`
    pub fn auth_string(&self) -> String {
        join_header(
            &self.client_id,
            &self.ephemeral_public_key,
            &self.nonce,
            &self.ciphertext,
            &self.tag,
            &self.timestamp,
        )
    }

    /// Final transmitted form
    pub fn encode(&self) -> String {
        let full = format!("{}{SEPARATOR}{}", self.auth_string(), self.mac);
        STANDARD.encode(full.as_bytes())
    }

    /// Parse the transmitted form. Only checks structure.
    pub fn decode(encoded: &str) -> TerminalResult<Self> {
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| TerminalError::Protocol(format!("outer base64: {e}")))?;
        let text = String::from_utf8(raw)
            .map_err(|_| TerminalError::Protocol("envelope is not UTF-8".into()))?;

        let fields: Vec<&str> = text.split(SEPARATOR).collect();
        if fields.len() != FIELD_COUNT {
            return Err(TerminalError::Protocol(format!(
                "expected {FIELD_COUNT} fields, got {}",
                fields.len()
            )));
        }

        Ok(Self {
            client_id: fields[0].to_string(),
            ephemeral_public_key: fields[1].to_string(),
            nonce: fields[2].to_string(),
            ciphertext: fields[3].to_string(),
            tag: fields[4].to_string(),
            timestamp: fields[5].to_string(),
            mac: fields[6].to_string(),
        })
    }

    /// Sender timestamp in Unix seconds
    pub fn timestamp_secs(&self) -> TerminalResult<i64> {
        self.timestamp
            .parse::<i64>()
            .map_err(|_| TerminalError::Protocol(format!("bad timestamp {:?}", self.timestamp)))
    }
}

fn join_header(
    client_id: &str,
    ephemeral: &str,
    nonce: &str,
    ciphertext: &str,
    tag: &str,
    timestamp: &str,
) -> String {
    [client_id, ephemeral, nonce, ciphertext, tag, timestamp].join(":")
}

/// Encrypt `plaintext` for `recipient`.
///
/// A fresh ephemeral key pair is generated for this call only.
pub fn seal(
    recipient: &PublicKey,
    client_id: &str,
    plaintext: &[u8],
    now_unix: i64,
) -> TerminalResult<EncryptedEnvelope> {
    let (ephemeral_public, keys) = agree_ephemeral(recipient);
    let sealed = encrypt_aes_gcm(keys.aes_key(), plaintext)?;

    let ephemeral_public_key = encode_public_key(&ephemeral_public);
    let nonce = STANDARD.encode(sealed.nonce);
    let ciphertext = STANDARD.encode(&sealed.ciphertext);
    let tag = STANDARD.encode(sealed.tag);
    let timestamp = now_unix.to_string();

    let header = join_header(
        client_id,
        &ephemeral_public_key,
        &nonce,
        &ciphertext,
        &tag,
        &timestamp,
    );
    let mac = compute_hmac(keys.hmac_key(), header.as_bytes())?;

    Ok(EncryptedEnvelope {
        client_id: client_id.to_string(),
        ephemeral_public_key,
        nonce,
        ciphertext,
        tag,
        timestamp,
        mac: STANDARD.encode(mac),
    })
}

/// Verify and decrypt an envelope addressed to `recipient_secret`.
///
/// Order: staleness, key agreement, MAC, then AES-GCM. A MAC mismatch
/// returns before any decryption is attempted.
pub fn open(
    recipient_secret: &SecretKey,
    envelope: &EncryptedEnvelope,
    now_unix: i64,
    window_secs: u64,
) -> TerminalResult<Vec<u8>> {
    let sent_at = envelope.timestamp_secs()?;
    let age_secs = now_unix.saturating_sub(sent_at);
    if age_secs > i64::try_from(window_secs).unwrap_or(i64::MAX) {
        return Err(TerminalError::ExpiredPayload {
            age_secs,
            window_secs,
        });
    }

    // An unparseable sender key cannot be authenticated
    let sender = decode_public_key(&envelope.ephemeral_public_key).map_err(|e| {
        log::debug!("rejecting envelope from {}: {}", envelope.client_id, e);
        TerminalError::Integrity
    })?;
    let keys = agree_static(recipient_secret, &sender);

    let received_mac = STANDARD
        .decode(&envelope.mac)
        .map_err(|_| TerminalError::Integrity)?;
    if !verify_hmac(
        keys.hmac_key(),
        envelope.auth_string().as_bytes(),
        &received_mac,
    ) {
        return Err(TerminalError::Integrity);
    }

    let nonce = decode_field("nonce", &envelope.nonce)?;
    let ciphertext = decode_field("ciphertext", &envelope.ciphertext)?;
    let tag = decode_field("tag", &envelope.tag)?;

    decrypt_aes_gcm(keys.aes_key(), &nonce, &ciphertext, &tag)
}

fn decode_field(name: &str, value: &str) -> TerminalResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| TerminalError::Protocol(format!("{name} base64: {e}")))
}
