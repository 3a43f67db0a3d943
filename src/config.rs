//! Application configuration
//!
//! Read once at startup from `WTB_*` environment variables.

use crate::error::{AppError, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Ceiling of the in-game chat line the composed message is pasted into
pub const DEFAULT_MESSAGE_MAX_LENGTH: usize = 181;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding the SQLite store
    pub data_dir: PathBuf,
    /// Base URL of the recommendation backend, if any
    pub backend_url: Option<Url>,
    /// HTTP timeout for one recommendation request
    pub request_timeout: Duration,
    /// Idle time after which a running progress record is evicted
    pub progress_stall_timeout: Duration,
    /// How long completed progress records are kept
    pub progress_retention: Duration,
    /// How long an unconfirmed replacement proposal is held
    pub proposal_ttl: Duration,
    pub message_max_length: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            backend_url: None,
            request_timeout: Duration::from_secs(120),
            progress_stall_timeout: Duration::from_secs(600),
            progress_retention: Duration::from_secs(60),
            proposal_ttl: Duration::from_secs(3600),
            message_max_length: DEFAULT_MESSAGE_MAX_LENGTH,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let data_dir = lookup("WTB_DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let backend_url = match lookup("WTB_BACKEND_URL").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(
                Url::parse(raw.trim())
                    .map_err(|e| AppError::Config(format!("Invalid WTB_BACKEND_URL '{}': {}", raw, e)))?,
            ),
            None => None,
        };

        Ok(Self {
            data_dir,
            backend_url,
            request_timeout: parse_secs(&lookup, "WTB_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            progress_stall_timeout: parse_secs(
                &lookup,
                "WTB_PROGRESS_STALL_SECS",
                defaults.progress_stall_timeout,
            )?,
            progress_retention: parse_secs(
                &lookup,
                "WTB_PROGRESS_RETENTION_SECS",
                defaults.progress_retention,
            )?,
            proposal_ttl: parse_secs(&lookup, "WTB_PROPOSAL_TTL_SECS", defaults.proposal_ttl)?,
            message_max_length: match lookup("WTB_MESSAGE_MAX_LENGTH") {
                Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
                    AppError::Config(format!("Invalid WTB_MESSAGE_MAX_LENGTH '{}': {}", raw, e))
                })?,
                None => defaults.message_max_length,
            },
        })
    }

    /// Path of the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("wtb_assistant.db")
    }
}

fn parse_secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| AppError::Config(format!("Invalid {} '{}': {}", key, raw, e))),
        None => Ok(default),
    }
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

    #[test]
    fn test_defaults_when_unset() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert!(config.backend_url.is_none());
        assert_eq!(config.message_max_length, 181);
        assert_eq!(config.progress_stall_timeout, Duration::from_secs(600));
        assert_eq!(config.proposal_ttl, Duration::from_secs(3600));
        assert!(config.database_path().ends_with("wtb_assistant.db"));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("WTB_DATA_DIR", "/tmp/wtb"),
            ("WTB_BACKEND_URL", "http://localhost:8085/api/"),
            ("WTB_PROGRESS_STALL_SECS", "30"),
            ("WTB_MESSAGE_MAX_LENGTH", "120"),
        ]))
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/wtb"));
        assert_eq!(config.backend_url.unwrap().as_str(), "http://localhost:8085/api/");
        assert_eq!(config.progress_stall_timeout, Duration::from_secs(30));
        assert_eq!(config.message_max_length, 120);
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = AppConfig::from_lookup(lookup_from(&[("WTB_BACKEND_URL", "not a url")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err = AppConfig::from_lookup(lookup_from(&[("WTB_REQUEST_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
