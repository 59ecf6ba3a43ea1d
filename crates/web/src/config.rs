//! Web configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `REWOVEN_BASE_URL` - Public URL of the site (https enables `Secure` cookies)
//! - `SUPABASE_URL` - Supabase project URL (e.g., <https://abc.supabase.co>)
//! - `SUPABASE_ANON_KEY` - Project anon key (high entropy, never a placeholder)
//!
//! ## Optional
//! - `REWOVEN_HOST` - Bind address (default: 127.0.0.1)
//! - `REWOVEN_PORT` - Listen port (default: 3000)
//! - `REWOVEN_DATA_DIR` - Durable store directory (default: ./data)
//! - `REWOVEN_IDENTITY_TIMEOUT_MS` - Upper bound on one identity check (default: 5000)
//! - `REWOVEN_RESTORE_BUDGET_MS` - How long a request waits for restoration
//!   before answering "loading" (default: 250)
//! - `REWOVEN_IDENTITY_TTL_SECS` - How long a resolved identity is reused (default: 60)
//! - `REWOVEN_CACHE_IDLE_SECS` - Idle lifetime of a user's entity cache and
//!   snapshots (default: 900)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Web application configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL
    pub base_url: String,
    /// Directory backing the durable store
    pub data_dir: PathBuf,
    /// Supabase project configuration
    pub supabase: SupabaseConfig,
    /// Session guard timing
    pub guard: GuardConfig,
    /// Idle lifetime of per-user caches and their snapshots
    pub cache_idle: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Supabase project configuration.
///
/// Implements `Debug` manually to redact the anon key.
#[derive(Clone)]
pub struct SupabaseConfig {
    /// Project URL, always ending in `/`
    pub url: Url,
    /// Project anon key, sent as `apikey` on every request
    pub anon_key: SecretString,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"[REDACTED]")
            .finish()
    }
}

/// Timing knobs of the session guard.
#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
    /// Upper bound on a single identity check; expiry fails closed.
    pub identity_timeout: Duration,
    /// How long a request waits on restoration before answering "loading".
    pub restore_budget: Duration,
    /// How long a resolved identity is reused for the same token.
    pub identity_ttl: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            identity_timeout: Duration::from_millis(5000),
            restore_budget: Duration::from_millis(250),
            identity_ttl: Duration::from_secs(60),
        }
    }
}

impl WebConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the anon key fails validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let host = parse_env("REWOVEN_HOST", "127.0.0.1")?;
        let port = parse_env("REWOVEN_PORT", "3000")?;
        let base_url = get_required_env("REWOVEN_BASE_URL")?;
        let data_dir = PathBuf::from(get_env_or_default("REWOVEN_DATA_DIR", "./data"));

        let supabase = SupabaseConfig::from_env()?;
        let guard = GuardConfig {
            identity_timeout: Duration::from_millis(parse_env(
                "REWOVEN_IDENTITY_TIMEOUT_MS",
                "5000",
            )?),
            restore_budget: Duration::from_millis(parse_env("REWOVEN_RESTORE_BUDGET_MS", "250")?),
            identity_ttl: Duration::from_secs(parse_env("REWOVEN_IDENTITY_TTL_SECS", "60")?),
        };
        let cache_idle = Duration::from_secs(parse_env("REWOVEN_CACHE_IDLE_SECS", "900")?);

        Ok(Self {
            host,
            port,
            base_url,
            data_dir,
            supabase,
            guard,
            cache_idle,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether cookies must carry the `Secure` attribute.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

impl SupabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let raw = get_required_env("SUPABASE_URL")?;
        Ok(Self {
            url: normalize_base_url(&raw)
                .map_err(|e| ConfigError::InvalidEnvVar("SUPABASE_URL".to_string(), e))?,
            anon_key: get_validated_secret("SUPABASE_ANON_KEY")?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse a project URL, forcing a trailing `/` so relative joins keep the path.
fn normalize_base_url(raw: &str) -> Result<Url, String> {
    let mut url = Url::parse(raw.trim()).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default`.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Copy the key from the project settings."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    fn config(base_url: &str) -> WebConfig {
        WebConfig {
            host: "127.0.0.1".parse().unwrap(),
            port: 3000,
            base_url: base_url.to_string(),
            data_dir: PathBuf::from("./data"),
            supabase: SupabaseConfig {
                url: normalize_base_url("https://abc.supabase.co").unwrap(),
                anon_key: SecretString::from("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.anon"),
            },
            guard: GuardConfig::default(),
            cache_idle: Duration::from_secs(900),
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-anon-key-here", "SUPABASE_ANON_KEY");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "SUPABASE_ANON_KEY");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_jwt_like() {
        let key = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.eyJyb2xlIjoiYW5vbiJ9.q7Z3xVb1";
        assert!(validate_secret_strength(key, "SUPABASE_ANON_KEY").is_ok());
    }

    #[test]
    fn test_normalize_base_url_adds_trailing_slash() {
        let url = normalize_base_url("https://abc.supabase.co/proxy").unwrap();
        assert_eq!(url.as_str(), "https://abc.supabase.co/proxy/");
        assert_eq!(
            url.join("rest/v1/listings").unwrap().path(),
            "/proxy/rest/v1/listings"
        );
    }

    #[test]
    fn test_normalize_base_url_rejects_other_schemes() {
        assert!(normalize_base_url("ftp://abc.supabase.co").is_err());
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn test_guard_defaults() {
        let guard = GuardConfig::default();
        assert!(guard.restore_budget < guard.identity_timeout);
        assert_eq!(guard.identity_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_socket_addr() {
        let addr = config("http://localhost:3000").socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_secure_cookies_follow_scheme() {
        assert!(!config("http://localhost:3000").secure_cookies());
        assert!(config("https://rewoven.example").secure_cookies());
    }

    #[test]
    fn test_supabase_config_debug_redacts_key() {
        let config = config("http://localhost:3000");
        let debug_output = format!("{:?}", config.supabase);
        assert!(debug_output.contains("abc.supabase.co"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("eyJhbGci"));
        assert!(config.supabase.anon_key.expose_secret().starts_with("eyJ"));
    }
}
