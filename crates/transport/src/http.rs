//! HTTP transport: posts completion requests with reqwest.
//!
//! Builds the Authorization header from the selected credential, injects any
//! configured extra headers (e.g. `HTTP-Referer`, `X-Title`) and applies a
//! fixed per-call timeout. The response status is returned verbatim; retry
//! and failover decisions belong to the dispatcher.

use crate::{CompletionRequest, QuotaHeaders, Result, Transport, TransportError, TransportResponse};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// reqwest-backed transport for an OpenAI-compatible completions endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    extra_headers: HeaderMap,
}

impl HttpTransport {
    /// Create a transport posting to `endpoint`.
    ///
    /// Invalid injection rules are skipped with a warning, and rules naming
    /// `authorization` are refused: the credential header is owned by the
    /// transport.
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        timeout: Duration,
        injections: &[HeaderInjection],
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
            extra_headers: build_extra_headers(injections),
        }
    }

    fn request_headers(&self, credential: &str) -> Result<HeaderMap> {
        let mut headers = self.extra_headers.clone();
        let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
            .map_err(|e| TransportError::InvalidRequest(format!("invalid credential value: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

fn build_extra_headers(injections: &[HeaderInjection]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for injection in injections {
        let name = match HeaderName::from_str(&injection.name) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        if name == AUTHORIZATION {
            warn!(header = %injection.name, "refusing to override authorization header");
            continue;
        }
        let value = match HeaderValue::from_str(&injection.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }
    headers
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Connect(e.to_string())
    }
}

impl Transport for HttpTransport {
    fn id(&self) -> &str {
        "http"
    }

    fn send<'a>(
        &'a self,
        request: CompletionRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + 'a>> {
        Box::pin(async move {
            let headers = self.request_headers(request.credential)?;
            let body = serde_json::json!({
                "model": request.model,
                "messages": request.messages,
                "max_tokens": request.max_tokens,
            });

            debug!(model = request.model, endpoint = %self.endpoint, "sending completion request");

            let response = self
                .client
                .post(&self.endpoint)
                .headers(headers)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await
                .map_err(classify_reqwest_error)?;

            let status = response.status().as_u16();
            let quota = QuotaHeaders::from_headers(response.headers());
            let body = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(e.to_string())
                } else {
                    TransportError::Body(e.to_string())
                }
            })?;

            Ok(TransportResponse {
                status,
                quota,
                body,
            })
        })
    }
}
