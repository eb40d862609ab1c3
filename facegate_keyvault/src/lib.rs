//! # FaceGate Keyvault
//!
//! Long-lived secrets of an identity-check terminal:
//! - the device P-256 key pair (generated once, PKCS#8 PEM on disk)
//! - the paired server's P-256 public key (uncompressed point, hex)
//! - the bearer access token issued at pairing
//!
//! Storage is pluggable through [`SecretStorage`]; the default backend
//! writes one owner-only file per item, atomically.

pub mod error;
pub mod keys;
pub mod keystore;
pub mod storage;

// Re-exports
pub use error::{KeyVaultError, Result};
pub use keys::{
    client_id_of, decode_public_key, encode_public_key, public_key_from_bytes,
    uncompressed_point, DeviceKeyPair, CLIENT_ID_LEN, UNCOMPRESSED_POINT_LEN,
};
pub use keystore::{default_keyvault_dir, KeyStore, Registration};
pub use storage::{FileStorage, MemoryStorage, SecretStorage};

pub use p256::{PublicKey, SecretKey};
pub use secrecy::{ExposeSecret, SecretString};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
