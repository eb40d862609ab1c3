//! FaceGate Terminal - Message Key Derivation
//!
//! Every envelope gets its own ECDH shared secret. Both symmetric keys come
//! from a single SHA-256 of that secret:
//!
//! ```text
//! digest   = SHA-256(shared_secret)
//! aes_key  = digest
//! hmac_key = digest || "HMAC_KEY"
//! ```

use p256::ecdh::{diffie_hellman, EphemeralSecret};
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// GCM tag length (128 bits)
pub const TAG_LEN: usize = 16;

/// Suffix appended to the digest to form the HMAC key
pub const HMAC_KEY_SUFFIX: &[u8] = b"HMAC_KEY";

/// Symmetric keys for one envelope
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    aes_key: [u8; KEY_LEN],
    hmac_key: Vec<u8>,
}

impl MessageKeys {
    /// Derive both keys from a raw ECDH shared secret
    pub fn derive(shared_secret: &[u8]) -> Self {
        let digest = Zeroizing::new(<[u8; KEY_LEN]>::from(Sha256::digest(shared_secret)));

        let mut hmac_key = Vec::with_capacity(KEY_LEN + HMAC_KEY_SUFFIX.len());
        hmac_key.extend_from_slice(&*digest);
        hmac_key.extend_from_slice(HMAC_KEY_SUFFIX);

        Self {
            aes_key: *digest,
            hmac_key,
        }
    }

    /// AES-256-GCM key
    pub fn aes_key(&self) -> &[u8; KEY_LEN] {
        &self.aes_key
    }

    /// HMAC-SHA256 key (40 bytes)
    pub fn hmac_key(&self) -> &[u8] {
        &self.hmac_key
    }
}

/// Sender side: fresh ephemeral key pair, agreement with the recipient.
///
/// Returns the ephemeral public key to put on the wire and the derived keys.
/// The ephemeral secret is dropped before returning.
pub fn agree_ephemeral(recipient: &PublicKey) -> (PublicKey, MessageKeys) {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_public = ephemeral.public_key();
    let shared = ephemeral.diffie_hellman(recipient);
    let keys = MessageKeys::derive(shared.raw_secret_bytes().as_slice());
    (ephemeral_public, keys)
}

/// Recipient side: agreement between our static key and the sender's
/// ephemeral public key.
pub fn agree_static(secret: &SecretKey, sender_ephemeral: &PublicKey) -> MessageKeys {
    let shared = diffie_hellman(secret.to_nonzero_scalar(), sender_ephemeral.as_affine());
    MessageKeys::derive(shared.raw_secret_bytes().as_slice())
}

/// Generate a random nonce for AES-GCM
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    use rand::RngCore;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = MessageKeys::derive(b"shared secret bytes");
        let digest: [u8; 32] = Sha256::digest(b"shared secret bytes").into();

        assert_eq!(keys.aes_key(), &digest);
        assert_eq!(keys.hmac_key().len(), 40);
        assert_eq!(&keys.hmac_key()[..32], &digest);
        assert_eq!(&keys.hmac_key()[32..], b"HMAC_KEY");
    }

    #[test]
    fn test_both_sides_agree() {
        let recipient = SecretKey::random(&mut OsRng);
        let (ephemeral_public, sender_keys) = agree_ephemeral(&recipient.public_key());
        let recipient_keys = agree_static(&recipient, &ephemeral_public);

        assert_eq!(sender_keys.aes_key(), recipient_keys.aes_key());
        assert_eq!(sender_keys.hmac_key(), recipient_keys.hmac_key());
    }

    #[test]
    fn test_ephemeral_never_reused() {
        let recipient = SecretKey::random(&mut OsRng).public_key();
        let (e1, k1) = agree_ephemeral(&recipient);
        let (e2, k2) = agree_ephemeral(&recipient);

        assert_ne!(e1, e2);
        assert_ne!(k1.aes_key(), k2.aes_key());
    }

    #[test]
    fn test_nonces_differ() {
        assert_ne!(generate_nonce(), generate_nonce());
    }
}
