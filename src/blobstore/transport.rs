use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobOp {
    Put,
    Get,
    Head,
    Delete,
}

impl BlobOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BlobOp::Put => "put",
            BlobOp::Get => "get",
            BlobOp::Head => "exists",
            BlobOp::Delete => "delete",
        }
    }
}

/// One storage endpoint. Endpoints sharing a `backend` class share a rate limiter.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    pub backend: String,
    pub token: Option<String>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>, backend: impl Into<String>) -> Self {
        Self { name: name.into(), url: url.into(), backend: backend.into(), token: None }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("backend", &self.backend)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BlobRequest {
    pub op: BlobOp,
    pub endpoint: Endpoint,
    pub id: String,
    pub body: Option<Arc<Vec<u8>>>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobResponse {
    pub status: u16,
    pub body: Arc<Vec<u8>>,
}

impl BlobResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self { Self { status, body: Arc::new(body) } }
    pub fn empty(status: u16) -> Self { Self::new(status, Vec::new()) }
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Sends one request to one endpoint. Implementations do not retry; failover and
/// backoff belong to `ResilientBlobStore`.
pub trait BlobTransport: Send + Sync {
    fn send(&self, req: BlobRequest) -> BoxFuture<'static, Result<BlobResponse, TransportError>>;
}
