//! FaceGate Terminal - Error Types

use thiserror::Error;

use facegate_keyvault::KeyVaultError;

/// Result type for terminal operations
pub type TerminalResult<T> = Result<T, TerminalError>;

/// Terminal error types
#[derive(Error, Debug)]
pub enum TerminalError {
    // ═══════════════════════════════════════════════════════════════
    // CHANNEL ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Terminal is not paired with a server")]
    NotPaired,

    #[error("Malformed envelope: {0}")]
    Protocol(String),

    #[error("Envelope expired: {age_secs}s old (window: {window_secs}s)")]
    ExpiredPayload { age_secs: i64, window_secs: u64 },

    #[error("Envelope integrity check failed - message discarded")]
    Integrity,

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    // ═══════════════════════════════════════════════════════════════
    // STORAGE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    // ═══════════════════════════════════════════════════════════════
    // PAIRING / TRANSPORT ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Pairing rejected: {0}")]
    PairingRejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    // ═══════════════════════════════════════════════════════════════
    // SERIALIZATION / CONFIG ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TerminalError {
    /// Verification failures. The message must be dropped, never used.
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            TerminalError::Integrity
                | TerminalError::Decryption(_)
                | TerminalError::ExpiredPayload { .. }
        )
    }

    /// Failures worth retrying later without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TerminalError::Transport(_) | TerminalError::Persistence(_)
        )
    }
}

impl From<std::io::Error> for TerminalError {
    fn from(e: std::io::Error) -> Self {
        TerminalError::Persistence(e.to_string())
    }
}

impl From<KeyVaultError> for TerminalError {
    fn from(e: KeyVaultError) -> Self {
        if e.is_corruption() {
            log::error!("keyvault state is corrupt, re-pairing required: {}", e);
        }
        TerminalError::Persistence(e.to_string())
    }
}
