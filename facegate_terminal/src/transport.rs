//! FaceGate Terminal - Transport Seam
//!
//! The core never opens sockets. An external HTTP client implements
//! [`Transport`] and moves opaque bytes; this crate owns only the body
//! formats.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{TerminalError, TerminalResult};

/// One request handed to the HTTP client
#[derive(Debug)]
pub struct OutboundRequest {
    /// Path relative to the paired server URL
    pub path: String,
    /// Bearer credential, when the endpoint requires one
    pub bearer: Option<SecretString>,
    /// JSON body
    pub body: Vec<u8>,
}

impl OutboundRequest {
    pub fn new(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bearer: None,
            body,
        }
    }

    pub fn with_bearer(mut self, token: SecretString) -> Self {
        self.bearer = Some(token);
        self
    }

    /// `Authorization` header value
    pub fn authorization(&self) -> Option<String> {
        self.bearer
            .as_ref()
            .map(|t| format!("Bearer {}", t.expose_secret()))
    }
}

/// What the HTTP client got back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl InboundResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fail with a transport error on a non-2xx status
    pub fn error_for_status(self) -> TerminalResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TerminalError::Transport(format!(
                "server answered HTTP {}",
                self.status
            )))
        }
    }
}

/// HTTP client supplied by the host application.
///
/// Implementations own timeouts and surface them as
/// [`TerminalError::Transport`] rather than hanging.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: OutboundRequest) -> TerminalResult<InboundResponse>;
}
