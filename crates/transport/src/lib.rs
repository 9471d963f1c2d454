//! Outbound transport abstraction for the completions API
//!
//! Defines the `Transport` trait that decouples the dispatch algorithm from
//! the HTTP client. `HttpTransport` posts `{model, messages, max_tokens}` to
//! the configured endpoint with a Bearer credential; tests substitute scripted
//! transports implementing the same trait.

pub mod http;
pub mod message;
pub mod quota;

pub use http::{HeaderInjection, HttpTransport};
pub use message::{ContentPart, ImageUrl, Message, MessageContent, Role};
pub use quota::QuotaHeaders;

use std::future::Future;
use std::pin::Pin;

/// Default `max_tokens` bound sent with every completion request.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// One completion attempt: which credential, which model, what payload.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    /// Raw credential secret, only ever placed in the Authorization header
    pub credential: &'a str,
    pub model: &'a str,
    pub messages: &'a [Message],
    pub max_tokens: u32,
}

/// Raw upstream response, before any classification.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Advisory quota metadata parsed from rate-limit headers
    pub quota: QuotaHeaders,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures that happen before an HTTP status is available.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether retrying with another attempt cannot help.
    ///
    /// Only a request that cannot even be built is fatal; timeouts, connection
    /// failures and truncated bodies are transient.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::InvalidRequest(_))
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Abstraction over the outbound completions call.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "http")
    fn id(&self) -> &str;

    /// Issue one completion request and return the raw response.
    ///
    /// Non-2xx statuses are returned as `Ok`; only failures without a status
    /// (timeouts, connection errors, unbuildable requests) are `Err`.
    fn send<'a>(
        &'a self,
        request: CompletionRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + 'a>>;
}
