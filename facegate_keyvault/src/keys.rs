//! P-256 device identity and public key encoding
//!
//! Public keys travel as lowercase hex of the uncompressed SEC1 point
//! `0x04 || X(32) || Y(32)`. Private keys are persisted as PKCS#8 PEM.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{KeyVaultError, Result};

/// Coordinate length for P-256
pub const COORDINATE_LEN: usize = 32;

/// Uncompressed SEC1 point length
pub const UNCOMPRESSED_POINT_LEN: usize = 1 + 2 * COORDINATE_LEN;

/// SEC1 tag for an uncompressed point
const UNCOMPRESSED_TAG: u8 = 0x04;

/// Length of the public client identifier in hex characters
pub const CLIENT_ID_LEN: usize = 8;

/// The device's long-lived P-256 key pair.
pub struct DeviceKeyPair {
    secret: SecretKey,
    public: PublicKey,
    public_hex: String,
}

impl std::fmt::Debug for DeviceKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyPair")
            .field("public", &self.public_hex)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl DeviceKeyPair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::random(&mut OsRng))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        let public_hex = encode_public_key(&public);
        Self {
            secret,
            public,
            public_hex,
        }
    }

    /// Load from a PKCS#8 PEM document.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let secret = SecretKey::from_pkcs8_pem(pem)
            .map_err(|e| KeyVaultError::CorruptKey(format!("device private key: {e}")))?;
        Ok(Self::from_secret(secret))
    }

    /// Encode the private key as PKCS#8 PEM.
    pub fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>> {
        self.secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyVaultError::Crypto(format!("PKCS#8 encoding failed: {e}")))
    }

    /// Private key for ECDH. Handle with care.
    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Uncompressed point bytes (65).
    pub fn public_bytes(&self) -> Vec<u8> {
        self.public.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Lowercase hex of the uncompressed point.
    pub fn public_hex(&self) -> &str {
        &self.public_hex
    }

    /// Short identifier disclosed to the server in every envelope.
    pub fn client_id(&self) -> String {
        client_id_of(&self.public_hex)
    }
}

/// Hex-encode a public key in uncompressed form.
pub fn encode_public_key(public: &PublicKey) -> String {
    hex::encode(public.to_encoded_point(false).as_bytes())
}

/// Decode a hex public key.
///
/// Accepts the canonical `04||X||Y` form and a bare `X||Y` without the tag.
/// The point must lie on the curve.
pub fn decode_public_key(encoded: &str) -> Result<PublicKey> {
    let bytes = hex::decode(encoded.trim())
        .map_err(|e| KeyVaultError::InvalidKey(format!("public key is not hex: {e}")))?;
    public_key_from_bytes(&bytes)
}

/// Parse raw public key bytes (65-byte tagged or 64-byte bare).
pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey> {
    let point = match bytes.len() {
        UNCOMPRESSED_POINT_LEN if bytes[0] == UNCOMPRESSED_TAG => bytes.to_vec(),
        n if n == 2 * COORDINATE_LEN => {
            uncompressed_point(&bytes[..COORDINATE_LEN], &bytes[COORDINATE_LEN..])?.to_vec()
        }
        n => {
            return Err(KeyVaultError::InvalidKey(format!(
                "expected {UNCOMPRESSED_POINT_LEN}-byte uncompressed point, got {n} bytes"
            )))
        }
    };

    PublicKey::from_sec1_bytes(&point)
        .map_err(|_| KeyVaultError::InvalidKey("point is not on P-256".into()))
}

/// Build an uncompressed point from big-endian affine coordinates.
///
/// Coordinates produced by signed big-integer encoders may carry one
/// leading zero sign byte (33 bytes) or be shorter than 32 bytes when the
/// high bytes are zero.
pub fn uncompressed_point(x: &[u8], y: &[u8]) -> Result<[u8; UNCOMPRESSED_POINT_LEN]> {
    let mut point = [0u8; UNCOMPRESSED_POINT_LEN];
    point[0] = UNCOMPRESSED_TAG;
    point[1..=COORDINATE_LEN].copy_from_slice(&normalize_coordinate(x)?);
    point[1 + COORDINATE_LEN..].copy_from_slice(&normalize_coordinate(y)?);
    Ok(point)
}

fn normalize_coordinate(raw: &[u8]) -> Result<[u8; COORDINATE_LEN]> {
    let trimmed = match raw {
        [0, rest @ ..] if raw.len() == COORDINATE_LEN + 1 => rest,
        _ => raw,
    };

    if trimmed.len() > COORDINATE_LEN {
        return Err(KeyVaultError::InvalidKey(format!(
            "coordinate too long: {} bytes",
            raw.len()
        )));
    }

    let mut out = [0u8; COORDINATE_LEN];
    out[COORDINATE_LEN - trimmed.len()..].copy_from_slice(trimmed);
    Ok(out)
}

/// First 8 hex chars of SHA-256 over the public key hex string.
pub fn client_id_of(public_hex: &str) -> String {
    let digest = Sha256::digest(public_hex.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(CLIENT_ID_LEN);
    id
}
