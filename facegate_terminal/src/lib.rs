//! # FaceGate Terminal
//!
//! Unattended identity-check terminal core: pairs with a backend over an
//! authenticated-encrypted channel, then recognizes enrolled people from a
//! locally cached embedding dataset.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    FACEGATE TERMINAL                     │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  PAIRING    │  │ SECURE       │  │  DATASET SYNC   │  │
//! │  │  FLOW       │  │ CHANNEL      │  │  (one at a time)│  │
//! │  └──────┬──────┘  └──────┬───────┘  └────────┬────────┘  │
//! │         │                │                   │           │
//! │  ┌──────┴────────────────┴───┐      ┌────────┴────────┐  │
//! │  │     FACEGATE_KEYVAULT     │      │ EMBEDDING STORE │  │
//! │  │ device key / server key / │      │ Arc snapshot    │  │
//! │  │ access token              │      │ swap            │  │
//! │  └───────────────────────────┘      └────────┬────────┘  │
//! │                                     ┌────────┴────────┐  │
//! │                                     │  MATCH ENGINE   │  │
//! │                                     │ calibrated L2   │  │
//! │                                     └─────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Fresh ephemeral P-256 key per message (forward secrecy)
//! - `SHA-256(ECDH)` keys AES-256-GCM and HMAC-SHA256
//! - HMAC verified in constant time before any decryption
//! - 300 second replay window on envelope timestamps
//! - No sockets: the host application supplies the [`Transport`]

pub mod api;
pub mod channel;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod embeddings;
pub mod envelope;
pub mod error;
pub mod matcher;
pub mod pairing;
pub mod secure_fs;
pub mod sync;
pub mod transport;

#[cfg(feature = "android")]
pub mod android;

pub use api::{TerminalApi, TerminalStatus};
pub use channel::{EncryptedBody, SecureChannel};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{MatchConfig, TerminalConfig};
pub use embeddings::{
    DatasetMeta, DatasetSnapshot, EmbeddingRecord, EmbeddingStore, MatchCandidate, SyncEntry,
    SyncPayload, SyncResult,
};
pub use envelope::EncryptedEnvelope;
pub use error::{TerminalError, TerminalResult};
pub use matcher::{
    MatchEngine, Recognition, RecognitionStats, ThresholdEstimate, ThresholdSource, Verdict,
};
pub use pairing::{PairingFlow, PairingOutcome, PairingRequest, PairingResponse};
pub use sync::{DatasetRequest, DatasetSync, SyncStatus};
pub use transport::{InboundResponse, OutboundRequest, Transport};

/// FaceGate Terminal version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
