//! FaceGate Terminal - Cryptographic Core
//!
//! Per-message ECDH on P-256, SHA-256 key derivation, AES-256-GCM and
//! HMAC-SHA256.

pub mod keys;
pub mod aead;

pub use keys::*;
pub use aead::*;
