//! Retry × model-fallback × credential-rotation state machine
//!
//! One `dispatch` call walks the candidate models in order. Each model gets
//! `max_retries_per_model` attempts; every attempt takes the pool's current
//! credential, makes one transport call, classifies the outcome and records it
//! back into the pool. Attempts within a call are strictly sequential and the
//! pool lock is never held across the transport call or the retry delay.

use std::sync::Arc;
use std::time::{Duration, Instant};

use credential_pool::{CredentialPool, SelectedCredential};
use serde::{Serialize, Serializer};
use tracing::{error, info, warn};
use transport::{CompletionRequest, DEFAULT_MAX_TOKENS, Message, QuotaHeaders, Transport};

use crate::classify::{FailureClass, RateLimitClassifier, SubstringClassifier};
use crate::error::{Error, Result};
use crate::extract::{ImageSource, extract_content, extract_images};
use crate::models::{ModelCandidate, ModelCandidates};

pub const NO_CREDENTIALS: &str = "no available credentials";
pub const ALL_RATE_LIMITED: &str = "all credentials rate limited";
pub const EXHAUSTED: &str = "all models and credentials exhausted";

/// Longest slice of an upstream error body kept in error messages.
const ERROR_BODY_LIMIT: usize = 200;

/// Per-dispatcher retry settings.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Attempts per model before falling back to the next one
    pub max_retries_per_model: u32,
    /// Fixed pause between attempts on the same model
    pub retry_delay: Duration,
    /// `max_tokens` sent with every request
    pub max_tokens: u32,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_retries_per_model: 3,
            retry_delay: Duration::from_secs(1),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Success {
        content: Option<String>,
        images: Vec<ImageSource>,
        model: String,
        credential_suffix: String,
        elapsed: Duration,
    },
    RateLimitedGlobal,
    RateLimitedModel,
    TransientError {
        message: String,
    },
    FatalError {
        message: String,
    },
}

impl DispatchOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Success { .. } => "success",
            DispatchOutcome::RateLimitedGlobal => "rate_limited_global",
            DispatchOutcome::RateLimitedModel => "rate_limited_model",
            DispatchOutcome::TransientError { .. } => "transient_error",
            DispatchOutcome::FatalError { .. } => "fatal_error",
        }
    }
}

/// Caller-facing result. `success` is authoritative: a 2xx without
/// extractable content is still a success with `content: None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub content: Option<String>,
    pub images: Vec<ImageSource>,
    pub model_used: Option<String>,
    pub credential_suffix: Option<String>,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// Transport calls made during this dispatch
    pub attempts: u32,
    pub error: Option<String>,
}

impl DispatchResult {
    fn failure(message: impl Into<String>, elapsed: Duration, attempts: u32) -> Self {
        Self {
            success: false,
            content: None,
            images: Vec::new(),
            model_used: None,
            credential_suffix: None,
            elapsed,
            attempts,
            error: Some(message.into()),
        }
    }
}

fn serialize_secs<S: Serializer>(elapsed: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

/// Dispatches completion requests over a shared credential pool.
pub struct Dispatcher {
    pool: Arc<CredentialPool>,
    transport: Arc<dyn Transport>,
    models: ModelCandidates,
    classifier: Arc<dyn RateLimitClassifier>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    /// Build a dispatcher with the default substring classifier.
    ///
    /// Rejects a zero attempt budget: every model must get at least one try.
    pub fn new(
        pool: Arc<CredentialPool>,
        transport: Arc<dyn Transport>,
        models: ModelCandidates,
        policy: DispatchPolicy,
    ) -> Result<Self> {
        if policy.max_retries_per_model == 0 {
            return Err(Error::InvalidPolicy(
                "max_retries_per_model must be greater than 0".into(),
            ));
        }
        info!(
            models = models.len(),
            primary = %models.primary().id,
            transport = transport.id(),
            "dispatcher initialized"
        );
        Ok(Self {
            pool,
            transport,
            models,
            classifier: Arc::new(SubstringClassifier::default()),
            policy,
        })
    }

    /// Replace the rate-limit classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn RateLimitClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn models(&self) -> &ModelCandidates {
        &self.models
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Dispatch with the configured attempt budget.
    pub async fn dispatch(&self, messages: &[Message]) -> DispatchResult {
        self.dispatch_with_retries(messages, self.policy.max_retries_per_model)
            .await
    }

    /// Dispatch with an explicit per-model attempt budget (minimum 1).
    ///
    /// Total transport calls are bounded by `models × max_retries_per_model`.
    pub async fn dispatch_with_retries(
        &self,
        messages: &[Message],
        max_retries_per_model: u32,
    ) -> DispatchResult {
        let started = Instant::now();
        let max_retries = max_retries_per_model.max(1);
        let mut attempts = 0u32;

        for model in self.models.iter() {
            for attempt in 0..max_retries {
                let Some(credential) = self.pool.current().await else {
                    error!(model = %model.id, attempt, "no available credentials");
                    return finish(DispatchResult::failure(NO_CREDENTIALS, started.elapsed(), attempts));
                };

                attempts += 1;
                let (outcome, quota) = self
                    .attempt(&credential, model, messages, started)
                    .await;
                metrics::counter!("dispatch_attempts_total", "outcome" => outcome.label())
                    .increment(1);

                match outcome {
                    DispatchOutcome::Success {
                        content,
                        images,
                        model: model_used,
                        credential_suffix,
                        elapsed,
                    } => {
                        self.pool.record_success(credential.index, &quota).await;
                        info!(
                            model = model.display_name(),
                            credential = credential.number(),
                            attempts,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "completion succeeded"
                        );
                        return finish(DispatchResult {
                            success: true,
                            content,
                            images,
                            model_used: Some(model_used),
                            credential_suffix: Some(credential_suffix),
                            elapsed,
                            attempts,
                            error: None,
                        });
                    }
                    DispatchOutcome::RateLimitedGlobal => {
                        self.pool.record_rate_limited(credential.index, None).await;
                        if self.pool.advance().await.is_none() {
                            error!(model = %model.id, "all credentials rate limited");
                            return finish(DispatchResult::failure(
                                ALL_RATE_LIMITED,
                                started.elapsed(),
                                attempts,
                            ));
                        }
                        continue;
                    }
                    DispatchOutcome::RateLimitedModel => {
                        warn!(model = %model.id, attempt, "model rate limited, falling back to next model");
                        break;
                    }
                    DispatchOutcome::TransientError { message } => {
                        warn!(
                            model = %model.id,
                            credential = credential.number(),
                            attempt,
                            error = %message,
                            "attempt failed"
                        );
                        self.pool.record_error(credential.index, message.clone()).await;

                        if attempt == max_retries - 1 {
                            if self.pool.advance().await.is_none() {
                                error!(model = %model.id, error = %message, "no credential left to rotate to");
                                return finish(DispatchResult::failure(
                                    format!("all credentials exhausted: {message}"),
                                    started.elapsed(),
                                    attempts,
                                ));
                            }
                        } else {
                            tokio::time::sleep(self.policy.retry_delay).await;
                        }
                    }
                    DispatchOutcome::FatalError { message } => {
                        error!(model = %model.id, error = %message, "fatal dispatch error");
                        return finish(DispatchResult::failure(message, started.elapsed(), attempts));
                    }
                }
            }
        }

        error!(attempts, "all models and credentials exhausted");
        finish(DispatchResult::failure(EXHAUSTED, started.elapsed(), attempts))
    }

    /// One transport call, classified. Does not touch the pool.
    async fn attempt(
        &self,
        credential: &SelectedCredential,
        model: &ModelCandidate,
        messages: &[Message],
        started: Instant,
    ) -> (DispatchOutcome, QuotaHeaders) {
        let request = CompletionRequest {
            credential: credential.expose(),
            model: &model.id,
            messages,
            max_tokens: self.policy.max_tokens,
        };

        let response = match self.transport.send(request).await {
            Ok(r) => r,
            Err(e) if e.is_fatal() => {
                return (
                    DispatchOutcome::FatalError {
                        message: e.to_string(),
                    },
                    QuotaHeaders::default(),
                );
            }
            Err(e) => {
                return (
                    DispatchOutcome::TransientError {
                        message: e.to_string(),
                    },
                    QuotaHeaders::default(),
                );
            }
        };

        if !response.is_success() {
            let outcome = match self.classifier.classify(response.status, &response.body) {
                FailureClass::GlobalRateLimit => DispatchOutcome::RateLimitedGlobal,
                FailureClass::ModelRateLimit => DispatchOutcome::RateLimitedModel,
                FailureClass::Transient => DispatchOutcome::TransientError {
                    message: format!(
                        "HTTP {}: {}",
                        response.status,
                        truncate(&response.body, ERROR_BODY_LIMIT)
                    ),
                },
            };
            return (outcome, response.quota);
        }

        let outcome = match serde_json::from_str::<serde_json::Value>(&response.body) {
            Ok(payload) => DispatchOutcome::Success {
                content: extract_content(&payload),
                images: extract_images(&payload),
                model: model.id.clone(),
                credential_suffix: credential.suffix(),
                elapsed: started.elapsed(),
            },
            Err(e) => DispatchOutcome::TransientError {
                message: format!("invalid response body: {e}"),
            },
        };
        (outcome, response.quota)
    }
}

/// Record per-dispatch metrics and hand the result back.
fn finish(result: DispatchResult) -> DispatchResult {
    let label = if result.success { "success" } else { "failure" };
    metrics::counter!("dispatch_requests_total", "result" => label).increment(1);
    metrics::histogram!("dispatch_duration_seconds", "result" => label)
        .record(result.elapsed.as_secs_f64());
    result
}

fn truncate(body: &str, limit: usize) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(limit).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
