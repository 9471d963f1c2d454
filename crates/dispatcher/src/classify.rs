//! Rate-limit classification for upstream error responses
//!
//! A 429 means one of two different things. An account-wide daily cap
//! ("free-models-per-day") is shared by every model, so the credential must be
//! rotated. Anything else is a limit on the requested model, so the next model
//! is tried with the same credential. The two are told apart by substring
//! matching on the error message, isolated here behind a trait.

use tracing::debug;

/// Default substrings marking a 429 as an account-wide limit.
pub const DEFAULT_GLOBAL_LIMIT_PATTERNS: &[&str] = &["free-models-per-day"];

/// Failure class of a non-2xx response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Account/day-wide cap: disable the credential and rotate
    GlobalRateLimit,
    /// Cap on this model only: fall back to the next model
    ModelRateLimit,
    /// Anything else (5xx, other 4xx): count against the credential and retry
    Transient,
}

/// Classifies non-2xx responses. Swappable so matching rules can be tested
/// against recorded fixture bodies and tuned per upstream.
pub trait RateLimitClassifier: Send + Sync {
    fn classify(&self, status: u16, body: &str) -> FailureClass;
}

/// Case-insensitive substring classifier over the 429 error message.
#[derive(Debug, Clone)]
pub struct SubstringClassifier {
    patterns: Vec<String>,
}

impl SubstringClassifier {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    fn is_global(&self, body: &str) -> bool {
        let message = error_message(body).to_lowercase();
        self.patterns.iter().any(|p| message.contains(p.as_str()))
    }
}

impl Default for SubstringClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_GLOBAL_LIMIT_PATTERNS)
    }
}

impl RateLimitClassifier for SubstringClassifier {
    fn classify(&self, status: u16, body: &str) -> FailureClass {
        match status {
            429 if self.is_global(body) => FailureClass::GlobalRateLimit,
            429 => FailureClass::ModelRateLimit,
            _ => FailureClass::Transient,
        }
    }
}

/// `error.message` from a JSON error body, or the raw body when the payload
/// is not shaped that way.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => match json.pointer("/error/message").and_then(|m| m.as_str()) {
            Some(message) => message.to_string(),
            None => body.to_string(),
        },
        Err(e) => {
            debug!(error = %e, "429 body is not JSON, matching raw text");
            body.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAILY_LIMIT: &str = r#"{"error":{"message":"Rate limit exceeded: free-models-per-day. Add 10 credits to unlock 1000 free model requests per day","code":429}}"#;
    const MODEL_LIMIT: &str = r#"{"error":{"message":"google/gemini-2.5-flash-image-preview:free is temporarily rate-limited upstream. Please retry shortly.","code":429}}"#;

    #[test]
    fn daily_limit_is_global() {
        let c = SubstringClassifier::default();
        assert_eq!(c.classify(429, DAILY_LIMIT), FailureClass::GlobalRateLimit);
    }

    #[test]
    fn upstream_model_limit_is_model_specific() {
        let c = SubstringClassifier::default();
        assert_eq!(c.classify(429, MODEL_LIMIT), FailureClass::ModelRateLimit);
    }

    #[test]
    fn empty_429_body_is_model_specific() {
        let c = SubstringClassifier::default();
        assert_eq!(c.classify(429, ""), FailureClass::ModelRateLimit);
    }

    #[test]
    fn non_json_body_matches_raw_text() {
        let c = SubstringClassifier::default();
        assert_eq!(
            c.classify(429, "free-models-per-day exceeded"),
            FailureClass::GlobalRateLimit
        );
    }

    #[test]
    fn pattern_outside_error_message_is_ignored() {
        let c = SubstringClassifier::default();
        let body = r#"{"error":{"message":"slow down"},"hint":"free-models-per-day"}"#;
        assert_eq!(c.classify(429, body), FailureClass::ModelRateLimit);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let c = SubstringClassifier::default();
        let body = r#"{"error":{"message":"FREE-MODELS-PER-DAY reached"}}"#;
        assert_eq!(c.classify(429, body), FailureClass::GlobalRateLimit);
    }

    #[test]
    fn custom_patterns_replace_defaults() {
        let c = SubstringClassifier::new(["Daily quota", "  "]);
        assert_eq!(
            c.classify(429, r#"{"error":{"message":"daily quota exhausted"}}"#),
            FailureClass::GlobalRateLimit
        );
        assert_eq!(c.classify(429, DAILY_LIMIT), FailureClass::ModelRateLimit);
    }

    #[test]
    fn non_429_statuses_are_transient() {
        let c = SubstringClassifier::default();
        for status in [400, 401, 403, 404, 500, 502, 503, 504] {
            assert_eq!(c.classify(status, DAILY_LIMIT), FailureClass::Transient);
        }
    }
}
