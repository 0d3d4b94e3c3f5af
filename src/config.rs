use std::path::PathBuf;
use std::time::Duration;

use color_eyre::{Result, eyre::Context};
use serde::Deserialize;
use url::Url;

use crate::client::RetryPolicy;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub region: String,
    pub catalog_url: Url,
    pub pricing_url: Url,
    pub api_key: Option<String>,
    pub webhook_url: Option<Url>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
    #[serde(default = "default_full_list")]
    pub full_list: PathBuf,
    #[serde(default = "default_dlc_list")]
    pub dlc_list: PathBuf,
    #[serde(default = "default_top_discounts")]
    pub top_discounts: usize,
    #[serde(default = "default_keep_snapshots")]
    pub keep_snapshots: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_concurrency() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_storage_path() -> PathBuf {
    "data".into()
}

fn default_report_path() -> PathBuf {
    "reports".into()
}

fn default_full_list() -> PathBuf {
    "lists/full.txt".into()
}

fn default_dlc_list() -> PathBuf {
    "lists/dlc_only.txt".into()
}

fn default_top_discounts() -> usize {
    10
}

fn default_keep_snapshots() -> usize {
    30
}

fn default_user_agent() -> String {
    concat!("price-watch/", env!("CARGO_PKG_VERSION")).into()
}

impl Config {
    /// Reads `.env` (if any) and then the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut config = envy::from_iter::<_, Config>(vars).wrap_err("failed to load config")?;
        config.region = config.region.trim().to_ascii_uppercase();
        if config.region.is_empty() {
            color_eyre::eyre::bail!("REGION must not be empty");
        }
        config.concurrency = config.concurrency.max(1);
        config.keep_snapshots = config.keep_snapshots.max(1);
        config.api_key = config.api_key.filter(|key| !key.trim().is_empty());
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn loads_required_keys_and_defaults() {
        let config = Config::from_vars(vars(&[
            ("REGION", " tr "),
            ("CATALOG_URL", "https://catalog.example.com/api/"),
            ("PRICING_URL", "https://prices.example.com/"),
        ]))
        .unwrap();

        assert_eq!(config.region, "TR");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.full_list, PathBuf::from("lists/full.txt"));
        assert!(config.webhook_url.is_none());
        assert!(config.api_key.is_none());
        assert_eq!(config.retry_policy().base, Duration::from_millis(500));
    }

    #[test]
    fn clamps_concurrency_and_reads_overrides() {
        let config = Config::from_vars(vars(&[
            ("REGION", "US"),
            ("CATALOG_URL", "https://catalog.example.com/"),
            ("PRICING_URL", "https://prices.example.com/"),
            ("CONCURRENCY", "0"),
            ("MAX_RETRIES", "5"),
            ("API_KEY", "  "),
            ("WEBHOOK_URL", "https://hooks.slack.com/services/T/B/X"),
        ]))
        .unwrap();

        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_retries, 5);
        assert!(config.api_key.is_none());
        assert!(config.webhook_url.is_some());
    }

    #[test]
    fn missing_region_is_an_error() {
        let result = Config::from_vars(vars(&[
            ("CATALOG_URL", "https://catalog.example.com/"),
            ("PRICING_URL", "https://prices.example.com/"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn unparsable_number_is_an_error() {
        let result = Config::from_vars(vars(&[
            ("REGION", "TR"),
            ("CATALOG_URL", "https://catalog.example.com/"),
            ("PRICING_URL", "https://prices.example.com/"),
            ("CONCURRENCY", "lots"),
        ]));
        assert!(result.is_err());
    }
}
