//! FaceGate Terminal - AEAD Encryption
//!
//! AES-256-GCM with a detached 16-byte tag (the wire format carries the
//! tag as its own field) and HMAC-SHA256 over the envelope header.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::keys::{generate_nonce, NONCE_LEN, TAG_LEN};
use crate::error::{TerminalError, TerminalResult};

type HmacSha256 = Hmac<Sha256>;

/// Ciphertext with its nonce and detached tag
pub struct SealedPayload {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

// ═══════════════════════════════════════════════════════════════════════════
// AES-256-GCM
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt data with AES-256-GCM under a fresh random nonce
pub fn encrypt_aes_gcm(key: &[u8], plaintext: &[u8]) -> TerminalResult<SealedPayload> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| TerminalError::Encryption(e.to_string()))?;

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut combined = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| TerminalError::Encryption(e.to_string()))?;

    // aes-gcm appends the tag to the ciphertext
    let split = combined.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&combined[split..]);
    combined.truncate(split);

    Ok(SealedPayload {
        nonce: nonce_bytes,
        ciphertext: combined,
        tag,
    })
}

/// Decrypt data with AES-256-GCM; the tag is checked by GCM itself
pub fn decrypt_aes_gcm(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> TerminalResult<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(TerminalError::Protocol(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce.len()
        )));
    }
    if tag.len() != TAG_LEN {
        return Err(TerminalError::Protocol(format!(
            "tag must be {TAG_LEN} bytes, got {}",
            tag.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| TerminalError::Decryption(e.to_string()))?;

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    cipher
        .decrypt(Nonce::from_slice(nonce), combined.as_slice())
        .map_err(|_| TerminalError::Decryption("Authentication failed".into()))
}

// ═══════════════════════════════════════════════════════════════════════════
// HMAC for envelope authentication
// ═══════════════════════════════════════════════════════════════════════════

/// Compute HMAC-SHA256
pub fn compute_hmac(key: &[u8], data: &[u8]) -> TerminalResult<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| TerminalError::Encryption(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Verify HMAC-SHA256 in constant time
pub fn verify_hmac(key: &[u8], data: &[u8], expected: &[u8]) -> bool {
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        return false;
    };
    mac.update(data);
    mac.verify_slice(expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];

    #[test]
    fn test_aes_gcm_roundtrip() {
        let plaintext = b"{\"event\":\"check-in\"}";

        let sealed = encrypt_aes_gcm(&KEY, plaintext).unwrap();
        assert_eq!(sealed.ciphertext.len(), plaintext.len());

        let decrypted =
            decrypt_aes_gcm(&KEY, &sealed.nonce, &sealed.ciphertext, &sealed.tag).unwrap();
        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_tampered_tag_fails() {
        let sealed = encrypt_aes_gcm(&KEY, b"payload").unwrap();
        let mut tag = sealed.tag;
        tag[0] ^= 0x01;

        let result = decrypt_aes_gcm(&KEY, &sealed.nonce, &sealed.ciphertext, &tag);
        assert!(matches!(result, Err(TerminalError::Decryption(_))));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt_aes_gcm(&KEY, b"Secret data").unwrap();
        let result = decrypt_aes_gcm(&[0x24; 32], &sealed.nonce, &sealed.ciphertext, &sealed.tag);
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_lengths_are_protocol_errors() {
        let sealed = encrypt_aes_gcm(&KEY, b"x").unwrap();
        assert!(matches!(
            decrypt_aes_gcm(&KEY, &sealed.nonce[..8], &sealed.ciphertext, &sealed.tag),
            Err(TerminalError::Protocol(_))
        ));
        assert!(matches!(
            decrypt_aes_gcm(&KEY, &sealed.nonce, &sealed.ciphertext, &sealed.tag[..12]),
            Err(TerminalError::Protocol(_))
        ));
    }

    #[test]
    fn test_hmac() {
        let key = b"0123456789abcdef0123456789abcdefHMAC_KEY";
        let data = b"client:eph:nonce:ct:tag:1700000000";

        let mac = compute_hmac(key, data).unwrap();
        assert!(verify_hmac(key, data, &mac));

        assert!(!verify_hmac(key, b"client:eph:nonce:ct:tag:1700000001", &mac));
        assert!(!verify_hmac(key, data, &mac[..31]));
    }
}
