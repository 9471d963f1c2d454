//! Secret wrapper for credentials and other sensitive values

use std::fmt;
use zeroize::Zeroize;

/// Number of trailing characters shown when a credential must be identified.
pub const SUFFIX_LEN: usize = 8;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Last `SUFFIX_LEN` characters of the secret, for partial identification.
    ///
    /// Secrets shorter than twice the suffix length are fully masked so the
    /// suffix never reveals most of a short value.
    pub fn suffix(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() < SUFFIX_LEN * 2 {
            return "*".repeat(SUFFIX_LEN);
        }
        chars[chars.len() - SUFFIX_LEN..].iter().collect()
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_redacts_debug() {
        let secret = Secret::new(String::from("sk-or-v1-abcdef"));
        let debug = format!("{:?}", secret);
        assert_eq!(debug, "[REDACTED]");
        assert!(!debug.contains("sk-or-v1"));
    }

    #[test]
    fn test_secret_redacts_display() {
        let secret = Secret::new(String::from("sk-or-v1-abcdef"));
        assert_eq!(secret.to_string(), "[REDACTED]");
    }

    #[test]
    fn test_secret_exposes_value() {
        let secret = Secret::new(String::from("sk-or-v1-abcdef"));
        assert_eq!(secret.expose(), "sk-or-v1-abcdef");
    }

    #[test]
    fn test_suffix_returns_last_eight_chars() {
        let secret = Secret::new(String::from("sk-or-v1-0123456789abcdef"));
        assert_eq!(secret.suffix(), "89abcdef");
    }

    #[test]
    fn test_suffix_masks_short_secrets() {
        let secret = Secret::new(String::from("short-key"));
        assert_eq!(secret.suffix(), "********");
    }
}
