// ⚙️ Configuration - Static run parameters
//
// Everything the reconciler needs is read once at startup into an immutable
// `Config` and passed down explicitly. Defaults are the production values, so
// an empty JSON object `{}` is a complete configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTIONS
// ============================================================================

/// Names of the three wallet tables.
///
/// These are interpolated into SQL, so `Config::validate` only accepts plain
/// identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    /// Airdrop table, pre-populated with `Wallet, Balance` rows
    pub source: String,
    /// Wallets whose trustline could not be determined on the first pass
    pub retry: String,
    /// Wallets without the trustline (terminal)
    pub missing: String,
}

impl Default for TableNames {
    fn default() -> Self {
        TableNames {
            source: "tokens".to_string(),
            retry: "retry_queue".to_string(),
            missing: "tokens_missing_tl".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON-RPC endpoints of the same ledger, tried in order
    pub endpoints: Vec<String>,

    /// Per-request HTTP timeout
    pub request_timeout_seconds: u64,

    /// `limit` sent with each `account_lines` page
    pub page_limit: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            endpoints: vec![
                "https://xrplcluster.com/".to_string(),
                "https://s2.ripple.com:51234/".to_string(),
                "https://xrpl.link/".to_string(),
            ],
            request_timeout_seconds: 20,
            page_limit: 400,
        }
    }
}

/// The issuer/currency pair a wallet must trust.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustlineTarget {
    pub issuer: String,
    pub currency: String,
}

impl Default for TrustlineTarget {
    fn default() -> Self {
        TrustlineTarget {
            issuer: "rJ9uU9jKxNcsNQM2CLKUhPxNn8P4xmhDVq".to_string(),
            currency: "4241594E414E4100000000000000000000000000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Oracle calls per endpoint before failing over
    pub max_retries_per_endpoint: u32,

    /// Linear backoff unit between attempts on the same endpoint
    pub backoff_base_seconds: f64,

    /// Pause after every wallet, whatever the outcome
    pub throttle_seconds: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries_per_endpoint: 2,
            backoff_base_seconds: 2.0,
            throttle_seconds: 0.2,
        }
    }
}

/// Largest accepted backoff unit or throttle, in seconds.
pub const MAX_DELAY_SECONDS: f64 = 3600.0;

impl RetryPolicy {
    /// Delay before `attempt` (1-based) on one endpoint. Zero for the first.
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        seconds(self.backoff_base_seconds * f64::from(attempt - 1))
    }

    pub fn throttle(&self) -> Duration {
        seconds(self.throttle_seconds)
    }
}

/// Saturates instead of panicking on values `validate` would reject.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(if value > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub tables: TableNames,
    pub ledger: LedgerConfig,
    pub trustline: TrustlineTarget,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("snapshot.db"),
            tables: TableNames::default(),
            ledger: LedgerConfig::default(),
            trustline: TrustlineTarget::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Load a JSON config file, normalise the currency code and validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.finalize()
    }

    /// Normalise and validate. Every constructor path goes through here.
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        self.trustline.currency = normalize_currency(&self.trustline.currency)?;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.endpoints.is_empty() {
            return Err(ConfigError::Invalid("at least one ledger endpoint is required".into()));
        }

        if self.ledger.endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err(ConfigError::Invalid("ledger endpoints must not be blank".into()));
        }

        if self.ledger.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("request_timeout_seconds must be at least 1".into()));
        }

        if self.ledger.page_limit == 0 {
            return Err(ConfigError::Invalid("page_limit must be at least 1".into()));
        }

        if self.retry.max_retries_per_endpoint == 0 {
            return Err(ConfigError::Invalid("max_retries_per_endpoint must be at least 1".into()));
        }

        for (name, value) in [
            ("backoff_base_seconds", self.retry.backoff_base_seconds),
            ("throttle_seconds", self.retry.throttle_seconds),
        ] {
            if !value.is_finite() || !(0.0..=MAX_DELAY_SECONDS).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 0 and {} seconds, got {}",
                    name, MAX_DELAY_SECONDS, value
                )));
            }
        }

        if self.trustline.issuer.trim().is_empty() {
            return Err(ConfigError::Invalid("trustline issuer must not be empty".into()));
        }

        let names = [&self.tables.source, &self.tables.retry, &self.tables.missing];
        for name in names {
            if !is_sql_identifier(name) {
                return Err(ConfigError::Invalid(format!(
                    "table name '{}' must be letters, digits and underscores",
                    name
                )));
            }
        }

        let unique: HashSet<String> = names.iter().map(|n| n.to_ascii_lowercase()).collect();
        if unique.len() != names.len() {
            return Err(ConfigError::Invalid("source, retry and missing tables must differ".into()));
        }

        Ok(())
    }
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Bring a currency code into the form the ledger reports in `account_lines`.
///
/// Three-character codes and 40-digit hex codes pass through unchanged. Longer
/// ticker names (up to 20 bytes) are hex-encoded and zero-padded to 160 bits.
pub fn normalize_currency(code: &str) -> Result<String, ConfigError> {
    let code = code.trim();

    if code.len() == 3 {
        return Ok(code.to_string());
    }

    if code.len() == 40 && code.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(code.to_string());
    }

    if (4..=20).contains(&code.len()) && code.is_ascii() {
        let mut hex: String = code.bytes().map(|b| format!("{:02X}", b)).collect();
        while hex.len() < 40 {
            hex.push('0');
        }
        return Ok(hex);
    }

    Err(ConfigError::Invalid(format!(
        "currency '{}' is neither a 3-letter code, a 40-digit hex code, nor a 4-20 character ticker",
        code
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default().finalize().unwrap();

        assert_eq!(config.ledger.endpoints.len(), 3);
        assert_eq!(config.retry.max_retries_per_endpoint, 2);
        assert_eq!(config.retry.backoff_base_seconds, 2.0);
        assert_eq!(config.retry.throttle(), Duration::from_millis(200));
        assert_eq!(config.tables.source, "tokens");
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff_before(1), Duration::ZERO);
        assert_eq!(policy.backoff_before(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_before(3), Duration::from_secs(4));
    }

    #[test]
    fn test_oversized_delays_do_not_panic() {
        let policy = RetryPolicy {
            backoff_base_seconds: 1e20,
            throttle_seconds: -1.0,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.backoff_before(2), Duration::MAX);
        assert_eq!(policy.throttle(), Duration::ZERO);

        let mut config = Config::default();
        config.retry.backoff_base_seconds = MAX_DELAY_SECONDS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_currency_normalization() {
        assert_eq!(normalize_currency("USD").unwrap(), "USD");
        assert_eq!(
            normalize_currency("BAYNANA").unwrap(),
            "4241594E414E4100000000000000000000000000"
        );
        assert_eq!(
            normalize_currency("4241594E414E4100000000000000000000000000").unwrap(),
            "4241594E414E4100000000000000000000000000"
        );
        assert!(normalize_currency("").is_err());
        assert!(normalize_currency("THIS_TICKER_IS_WAY_TOO_LONG").is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = Config::default();
        config.ledger.endpoints.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.max_retries_per_endpoint = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.throttle_seconds = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.backoff_base_seconds = 1e20;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.throttle_seconds = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ledger.request_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ledger.page_limit = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tables.missing = "tokens; DROP TABLE tokens".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tables.retry = "TOKENS".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "trustline": {{ "issuer": "rIssuer", "currency": "BAYNANA" }},
                "retry": {{ "throttle_seconds": 0.5 }}
            }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.trustline.issuer, "rIssuer");
        assert_eq!(config.trustline.currency, "4241594E414E4100000000000000000000000000");
        assert_eq!(config.retry.throttle_seconds, 0.5);
        assert_eq!(config.retry.max_retries_per_endpoint, 2);
        assert_eq!(config.ledger, LedgerConfig::default());
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
