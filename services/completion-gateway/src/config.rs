//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Upstream API keys are loaded from the UPSTREAM_API_KEYS env var or
//! keys_file, never stored in the TOML directly to avoid leaking secrets.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use credential_pool::PoolPolicy;
use dispatcher::classify::DEFAULT_GLOBAL_LIMIT_PATTERNS;
use dispatcher::{DispatchPolicy, ModelCandidate, ModelCandidates, SubstringClassifier};
use serde::Deserialize;
use transport::HeaderInjection;

/// Env var holding comma-separated upstream API keys
pub const KEYS_ENV: &str = "UPSTREAM_API_KEYS";

/// Upper bound for disable windows (one year)
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub models: ModelsConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Separate listener for the admin API; disabled when absent
    #[serde(default)]
    pub admin_addr: Option<SocketAddr>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Completions endpoint settings
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Ordered model candidates
#[derive(Debug, Deserialize)]
pub struct ModelsConfig {
    pub primary: String,
    #[serde(default)]
    pub backups: Vec<String>,
    /// Human-readable names keyed by model id, used in logs
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Retry and credential health tuning
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_retries_per_model: u32,
    pub retry_delay_ms: u64,
    pub error_threshold: u32,
    pub error_cooldown_secs: u64,
    pub rate_limit_window_secs: u64,
    pub gauge_interval_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_retries_per_model: 3,
            retry_delay_ms: 1000,
            error_threshold: 3,
            error_cooldown_secs: 30 * 60,
            rate_limit_window_secs: 24 * 60 * 60,
            gauge_interval_secs: 15,
        }
    }
}

/// 429 classification rules
#[derive(Debug, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_global_limit_patterns")]
    pub global_limit_patterns: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            global_limit_patterns: default_global_limit_patterns(),
        }
    }
}

/// Upstream API keys
#[derive(Debug, Default, Deserialize)]
pub struct CredentialsConfig {
    /// File with one key per line (alternative to UPSTREAM_API_KEYS)
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
    #[serde(skip)]
    pub keys: Vec<Secret<String>>,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_max_tokens() -> u32 {
    transport::DEFAULT_MAX_TOKENS
}

fn default_global_limit_patterns() -> Vec<String> {
    DEFAULT_GLOBAL_LIMIT_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Key resolution order:
    /// 1. UPSTREAM_API_KEYS env var (comma separated)
    /// 2. keys_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| common::Error::io(path, e))?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(raw) = std::env::var(KEYS_ENV) {
            config.credentials.keys = parse_keys(raw.split(','));
        } else if let Some(ref keys_file) = config.credentials.keys_file {
            let raw = std::fs::read_to_string(keys_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read keys_file {}: {e}",
                    keys_file.display()
                ))
            })?;
            config.credentials.keys = parse_keys(raw.lines());
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.upstream.url.starts_with("http://") && !self.upstream.url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream url must start with http:// or https://, got: {}",
                self.upstream.url
            )));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.policy.max_retries_per_model == 0 {
            return Err(common::Error::Config(
                "max_retries_per_model must be greater than 0".into(),
            ));
        }
        if self.policy.error_threshold == 0 {
            return Err(common::Error::Config(
                "error_threshold must be greater than 0".into(),
            ));
        }
        for (name, value) in [
            ("rate_limit_window_secs", self.policy.rate_limit_window_secs),
            ("error_cooldown_secs", self.policy.error_cooldown_secs),
        ] {
            if value > MAX_WINDOW_SECS {
                return Err(common::Error::Config(format!(
                    "{name} must be at most {MAX_WINDOW_SECS}, got: {value}"
                )));
            }
        }
        if self.policy.gauge_interval_secs == 0 {
            return Err(common::Error::Config(
                "gauge_interval_secs must be greater than 0".into(),
            ));
        }
        if self.models.primary.trim().is_empty() {
            return Err(common::Error::Config(
                "models.primary must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("completion-gateway.toml")
    }

    /// Primary then backups, with display labels applied.
    pub fn model_candidates(&self) -> dispatcher::Result<ModelCandidates> {
        let candidate = |id: &String| match self.models.labels.get(id) {
            Some(label) => ModelCandidate::labeled(id.clone(), label.clone()),
            None => ModelCandidate::new(id.clone()),
        };
        ModelCandidates::new(
            candidate(&self.models.primary),
            self.models.backups.iter().map(candidate).collect(),
        )
    }

    pub fn pool_policy(&self) -> PoolPolicy {
        PoolPolicy {
            rate_limit_window: secs(self.policy.rate_limit_window_secs),
            error_threshold: self.policy.error_threshold,
            error_cooldown: secs(self.policy.error_cooldown_secs),
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            max_retries_per_model: self.policy.max_retries_per_model,
            retry_delay: Duration::from_millis(self.policy.retry_delay_ms),
            max_tokens: self.upstream.max_tokens,
        }
    }

    pub fn classifier(&self) -> SubstringClassifier {
        SubstringClassifier::new(&self.classifier.global_limit_patterns)
    }
}

fn secs(value: u64) -> chrono::Duration {
    // validate() caps windows at MAX_WINDOW_SECS
    chrono::Duration::seconds(value.min(MAX_WINDOW_SECS) as i64)
}

/// Trim, drop blanks and `#` comments.
fn parse_keys<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<Secret<String>> {
    raw.map(str::trim)
        .filter(|k| !k.is_empty() && !k.starts_with('#'))
        .map(|k| Secret::new(k.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
[server]
listen_addr = "127.0.0.1:8080"
admin_addr = "127.0.0.1:9090"

[upstream]
url = "https://openrouter.ai/api/v1/chat/completions"

[models]
primary = "google/gemini-2.5-flash-image-preview:free"
backups = ["google/gemini-2.0-flash-exp:free", "meta-llama/llama-3.2-11b-vision-instruct:free"]

[models.labels]
"google/gemini-2.5-flash-image-preview:free" = "Gemini 2.5 Flash Image"

[[headers]]
name = "HTTP-Referer"
value = "https://studio.example"

[[headers]]
name = "X-Title"
value = "Content Studio"
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());
        unsafe { remove_env(KEYS_ENV) };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.server.admin_addr.unwrap().port(), 9090);
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.upstream.timeout_secs, 60);
        assert_eq!(config.upstream.max_tokens, 1000);
        assert_eq!(config.models.backups.len(), 2);
        assert_eq!(config.policy.max_retries_per_model, 3);
        assert_eq!(config.policy.retry_delay_ms, 1000);
        assert_eq!(
            config.classifier.global_limit_patterns,
            vec!["free-models-per-day"]
        );
        assert_eq!(config.headers.len(), 2);
        assert_eq!(config.headers[1].name, "X-Title");
        assert!(config.credentials.keys.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/path/config.toml")).unwrap_err();
        match &err {
            common::Error::Io { path, source } => {
                assert_eq!(path, Path::new("/nonexistent/path/config.toml"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected Io error, got: {other:?}"),
        }
        assert!(
            err.to_string()
                .starts_with("failed to read /nonexistent/path/config.toml"),
            "got: {err}"
        );
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_keys_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { set_env(KEYS_ENV, "sk-or-v1-aaa, sk-or-v1-bbb ,,") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(KEYS_ENV) };

        let keys: Vec<&str> = config
            .credentials
            .keys
            .iter()
            .map(|k| k.expose().as_str())
            .collect();
        assert_eq!(keys, vec!["sk-or-v1-aaa", "sk-or-v1-bbb"]);
    }

    #[test]
    fn test_keys_from_file_skip_blanks_and_comments() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let keys_path = dir.path().join("keys");
        std::fs::write(&keys_path, "# primary account\nsk-or-v1-one\n\n  sk-or-v1-two  \n").unwrap();
        let contents = format!(
            "{}\n[credentials]\nkeys_file = \"{}\"\n",
            valid_toml(),
            keys_path.display()
        );
        let path = write_config(&dir, &contents);

        unsafe { remove_env(KEYS_ENV) };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.credentials.keys.len(), 2);
        assert_eq!(config.credentials.keys[1].expose(), "sk-or-v1-two");
    }

    #[test]
    fn test_keys_env_overrides_nonexistent_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = format!(
            "{}\n[credentials]\nkeys_file = \"/nonexistent/path/keys\"\n",
            valid_toml()
        );
        let path = write_config(&dir, &contents);

        unsafe { set_env(KEYS_ENV, "sk-or-v1-env") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env(KEYS_ENV) };

        assert_eq!(config.credentials.keys.len(), 1);
        assert_eq!(config.credentials.keys[0].expose(), "sk-or-v1-env");
    }

    #[test]
    fn test_keys_file_nonexistent_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = format!(
            "{}\n[credentials]\nkeys_file = \"/nonexistent/path/keys\"\n",
            valid_toml()
        );
        let path = write_config(&dir, &contents);

        unsafe { remove_env(KEYS_ENV) };
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("keys_file"), "got: {err}");
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(path, PathBuf::from("/env/path.toml"));
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("completion-gateway.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(path, PathBuf::from("/cli/wins.toml"));
    }

    fn assert_rejected(contents: &str, expected: &str) {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, contents);
        unsafe { remove_env(KEYS_ENV) };

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains(expected), "expected {expected:?}, got: {err}");
    }

    #[test]
    fn test_invalid_upstream_url_rejected() {
        assert_rejected(
            &valid_toml().replace(
                "https://openrouter.ai/api/v1/chat/completions",
                "openrouter.ai/api",
            ),
            "must start with http",
        );
    }

    #[test]
    fn test_zero_values_rejected() {
        assert_rejected(
            &valid_toml().replace("[models]", "timeout_secs = 0\n\n[models]"),
            "timeout_secs",
        );
        assert_rejected(
            &valid_toml().replace(
                "admin_addr = \"127.0.0.1:9090\"",
                "admin_addr = \"127.0.0.1:9090\"\nmax_connections = 0",
            ),
            "max_connections",
        );
        assert_rejected(
            &format!("{}\n[policy]\nmax_retries_per_model = 0\n", valid_toml()),
            "max_retries_per_model",
        );
        assert_rejected(
            &format!("{}\n[policy]\nerror_threshold = 0\n", valid_toml()),
            "error_threshold",
        );
    }

    #[test]
    fn test_oversized_windows_rejected() {
        assert_rejected(
            &format!(
                "{}\n[policy]\nrate_limit_window_secs = 1000000000000000\n",
                valid_toml()
            ),
            "rate_limit_window_secs",
        );
        assert_rejected(
            &format!(
                "{}\n[policy]\nerror_cooldown_secs = {}\n",
                valid_toml(),
                MAX_WINDOW_SECS + 1
            ),
            "error_cooldown_secs",
        );
    }

    #[test]
    fn test_one_year_window_accepted() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = format!(
            "{}\n[policy]\nrate_limit_window_secs = {MAX_WINDOW_SECS}\nerror_cooldown_secs = {MAX_WINDOW_SECS}\n",
            valid_toml()
        );
        let path = write_config(&dir, &contents);
        unsafe { remove_env(KEYS_ENV) };

        let config = Config::load(&path).unwrap();
        let policy = config.pool_policy();
        assert_eq!(policy.rate_limit_window, chrono::Duration::days(365));
        assert_eq!(policy.error_cooldown, chrono::Duration::days(365));
    }

    #[test]
    fn test_blank_primary_rejected() {
        assert_rejected(
            &valid_toml().replace(
                "primary = \"google/gemini-2.5-flash-image-preview:free\"",
                "primary = \"  \"",
            ),
            "models.primary",
        );
    }

    #[test]
    fn test_model_candidates_apply_labels() {
        let config: Config = toml::from_str(valid_toml()).unwrap();
        let models = config.model_candidates().unwrap();
        let names: Vec<&str> = models.iter().map(|m| m.display_name()).collect();
        assert_eq!(
            names,
            vec![
                "Gemini 2.5 Flash Image",
                "google/gemini-2.0-flash-exp:free",
                "meta-llama/llama-3.2-11b-vision-instruct:free",
            ]
        );
        assert_eq!(
            models.primary().id,
            "google/gemini-2.5-flash-image-preview:free"
        );
    }

    #[test]
    fn test_policy_conversion() {
        let contents = format!(
            "{}\n[policy]\nretry_delay_ms = 250\nerror_threshold = 5\nerror_cooldown_secs = 60\nrate_limit_window_secs = 3600\n",
            valid_toml()
        );
        let config: Config = toml::from_str(&contents).unwrap();

        let pool = config.pool_policy();
        assert_eq!(pool.error_threshold, 5);
        assert_eq!(pool.error_cooldown, chrono::Duration::seconds(60));
        assert_eq!(pool.rate_limit_window, chrono::Duration::hours(1));

        let dispatch = config.dispatch_policy();
        assert_eq!(dispatch.retry_delay, Duration::from_millis(250));
        assert_eq!(dispatch.max_retries_per_model, 3);
        assert_eq!(dispatch.max_tokens, 1000);
    }
}
