//! Error types for the FaceGate keyvault

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyVaultError {
    #[error("Persistence error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Stored key material is corrupt: {0}")]
    CorruptKey(String),

    #[error("Invalid registration JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

pub type Result<T> = std::result::Result<T, KeyVaultError>;

impl KeyVaultError {
    /// Persisted state exists but cannot be trusted. The caller has to
    /// decide whether to wipe and re-pair; the keyvault never does it alone.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptKey(_) | Self::InvalidJson(_))
    }
}
