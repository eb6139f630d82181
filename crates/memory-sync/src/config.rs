// memory-sync/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

use crate::transport::Credentials;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub api_key: String,
    pub account_id: Option<String>,
    pub auth_token: Option<String>,
    pub encryption_password: String,
    pub db_path: PathBuf,
    pub sync_interval_seconds: u64,
    pub http_timeout_seconds: u64,
    /// Local tombstones older than this are pruned at the start of a pull.
    /// `None` keeps them forever.
    pub tombstone_retention_days: Option<u32>,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_base_url = get("MEMORY_SYNC_API_URL")
            .context("MEMORY_SYNC_API_URL environment variable not set. Please set it in your .env file")?;
        let api_key = get("MEMORY_SYNC_API_KEY")
            .context("MEMORY_SYNC_API_KEY environment variable not set. Please set it in your .env file")?;
        let account_id = get("MEMORY_SYNC_ACCOUNT_ID");
        let auth_token = get("MEMORY_SYNC_AUTH_TOKEN");
        if account_id.is_none() || auth_token.is_none() {
            warn!("Account credentials not configured; remote operations will be deferred");
        }

        let encryption_password = get("MEMORY_SYNC_ENCRYPTION_PASSWORD")
            .context("MEMORY_SYNC_ENCRYPTION_PASSWORD environment variable not set")?;

        let db_path = get("MEMORY_SYNC_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_db_path);

        let tombstone_retention_days = match get("MEMORY_SYNC_TOMBSTONE_RETENTION_DAYS") {
            Some(raw) => Some(parse_value("MEMORY_SYNC_TOMBSTONE_RETENTION_DAYS", &raw)?),
            None => None,
        };

        Ok(Self {
            api_base_url,
            api_key,
            account_id,
            auth_token,
            encryption_password,
            db_path,
            sync_interval_seconds: parse_value(
                "MEMORY_SYNC_INTERVAL_SECONDS",
                &get("MEMORY_SYNC_INTERVAL_SECONDS").unwrap_or_else(|| "300".into()),
            )?,
            http_timeout_seconds: parse_value(
                "MEMORY_SYNC_HTTP_TIMEOUT_SECONDS",
                &get("MEMORY_SYNC_HTTP_TIMEOUT_SECONDS").unwrap_or_else(|| "30".into()),
            )?,
            tombstone_retention_days,
        })
    }

    fn default_db_path() -> PathBuf {
        let base = std::env::current_dir().unwrap_or_default();
        base.join("data").join("memories.db")
    }

    /// Credentials for the remote API, when both halves are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.account_id, &self.auth_token) {
            (Some(account), Some(token)) => Some(Credentials::new(account.clone(), token.clone())),
            _ => None,
        }
    }

    /// Salt for key derivation. Keys are per account.
    pub fn key_salt(&self) -> &str {
        self.account_id.as_deref().unwrap_or("")
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API URL: {}", self.api_base_url);
        info!("- API Key: {}", mask(&self.api_key));
        info!("- Account: {}", self.account_id.as_deref().unwrap_or("<unset>"));
        info!("- Auth Token: {}", self.auth_token.as_deref().map(mask).unwrap_or_else(|| "<unset>".into()));
        info!("- Database: {}", self.db_path.display());
        info!("- Sync Interval: {}s", self.sync_interval_seconds);
        info!("- HTTP Timeout: {}s", self.http_timeout_seconds);
        match self.tombstone_retention_days {
            Some(days) => info!("- Tombstone Retention: {} days", days),
            None => info!("- Tombstone Retention: forever"),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000".to_string(),
            api_key: "test-key".to_string(),
            account_id: Some("account-1".to_string()),
            auth_token: Some("token-1".to_string()),
            encryption_password: "secret".to_string(),
            db_path: PathBuf::from("/tmp/memory-sync-test.db"),
            sync_interval_seconds: 300,
            http_timeout_seconds: 5,
            tombstone_retention_days: None,
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", key, raw))
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(2).collect();
    format!("{}***", visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("MEMORY_SYNC_API_URL", "https://api.example.com/"),
            ("MEMORY_SYNC_API_KEY", "key-123"),
            ("MEMORY_SYNC_ENCRYPTION_PASSWORD", "hunter2"),
        ]
    }

    // ===== Defaults =====

    #[test]
    fn test_defaults_apply_when_optional_values_missing() {
        let config = SyncConfig::from_lookup(lookup_from(&required())).unwrap();

        assert_eq!(config.sync_interval_seconds, 300);
        assert_eq!(config.http_timeout_seconds, 30);
        assert_eq!(config.tombstone_retention_days, None);
        assert!(config.db_path.ends_with("data/memories.db"));
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_missing_api_url_is_an_error() {
        let pairs = vec![("MEMORY_SYNC_API_KEY", "k"), ("MEMORY_SYNC_ENCRYPTION_PASSWORD", "p")];
        let err = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("MEMORY_SYNC_API_URL"));
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let mut pairs = required();
        pairs.push(("MEMORY_SYNC_ACCOUNT_ID", "  "));
        pairs.push(("MEMORY_SYNC_AUTH_TOKEN", "token"));
        let config = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.account_id, None);
        assert!(config.credentials().is_none());
    }

    // ===== Parsing =====

    #[test]
    fn test_numeric_values_are_parsed() {
        let mut pairs = required();
        pairs.push(("MEMORY_SYNC_INTERVAL_SECONDS", "60"));
        pairs.push(("MEMORY_SYNC_HTTP_TIMEOUT_SECONDS", " 10 "));
        pairs.push(("MEMORY_SYNC_TOMBSTONE_RETENTION_DAYS", "90"));
        let config = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(config.sync_interval_seconds, 60);
        assert_eq!(config.http_timeout_seconds, 10);
        assert_eq!(config.tombstone_retention_days, Some(90));
    }

    #[test]
    fn test_invalid_number_names_the_variable() {
        let mut pairs = required();
        pairs.push(("MEMORY_SYNC_INTERVAL_SECONDS", "soon"));
        let err = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("MEMORY_SYNC_INTERVAL_SECONDS"));
    }

    // ===== Credentials =====

    #[test]
    fn test_credentials_need_both_halves() {
        let mut config = SyncConfig::for_tests();
        assert_eq!(config.credentials(), Some(Credentials::new("account-1", "token-1")));
        assert_eq!(config.key_salt(), "account-1");

        config.auth_token = None;
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_mask_hides_secret() {
        assert_eq!(mask("token-1"), "to***");
        assert_eq!(mask(""), "***");
    }

    #[test]
    fn test_config_clone() {
        let config1 = SyncConfig::for_tests();
        let config2 = config1.clone();
        assert_eq!(config1.api_base_url, config2.api_base_url);
        assert_eq!(config1.db_path, config2.db_path);
    }
}
