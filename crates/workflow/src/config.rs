//! Marketplace configuration.
//!
//! Defaults cover local development; [`MarketConfig::from_env`] overlays
//! `COURSEMART_*` environment variables on top of them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use coursemart_infra::command_dispatcher::DEFAULT_MAX_ATTEMPTS;
use coursemart_pricing::RateTable;

pub const DEFAULT_CERTIFICATE_PREFIX: &str = "DTC";
pub const DEFAULT_MAX_PROOF_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_GATEWAY_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl ToString) -> Self {
        Self::Invalid {
            key,
            message: message.to_string(),
        }
    }
}

/// Logging options consumed by [`crate::telemetry::init`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Local units per USD for every domestic market.
    pub rates: RateTable,
    pub certificate_prefix: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub max_proof_bytes: usize,
    pub proof_content_types: Vec<String>,
    pub gateway_timeout_ms: u64,
    /// Attempts per command before an optimistic conflict is surfaced.
    pub dispatch_attempts: u32,
    pub log: LogConfig,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            rates: RateTable::default(),
            certificate_prefix: DEFAULT_CERTIFICATE_PREFIX.to_string(),
            checkout_success_url:
                "http://localhost:5173/pago-exitoso?session_id={CHECKOUT_SESSION_ID}".to_string(),
            checkout_cancel_url: "http://localhost:5173/carrito".to_string(),
            max_proof_bytes: DEFAULT_MAX_PROOF_BYTES,
            proof_content_types: ["image/jpeg", "image/png", "image/webp", "image/gif"]
                .into_iter()
                .map(String::from)
                .collect(),
            gateway_timeout_ms: DEFAULT_GATEWAY_TIMEOUT_MS,
            dispatch_attempts: DEFAULT_MAX_ATTEMPTS,
            log: LogConfig::default(),
        }
    }
}

impl MarketConfig {
    /// Defaults overlaid with `COURSEMART_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup` (keyed like the environment).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("COURSEMART_RATES") {
            config.rates = serde_json::from_str(&raw)
                .map_err(|e| ConfigError::invalid("COURSEMART_RATES", e))?;
        }
        if let Some(prefix) = lookup("COURSEMART_CERTIFICATE_PREFIX") {
            let prefix = prefix.trim();
            if prefix.is_empty() {
                return Err(ConfigError::invalid(
                    "COURSEMART_CERTIFICATE_PREFIX",
                    "prefix cannot be empty",
                ));
            }
            config.certificate_prefix = prefix.to_string();
        }
        if let Some(url) = lookup("COURSEMART_CHECKOUT_SUCCESS_URL") {
            config.checkout_success_url = url;
        }
        if let Some(url) = lookup("COURSEMART_CHECKOUT_CANCEL_URL") {
            config.checkout_cancel_url = url;
        }
        if let Some(raw) = lookup("COURSEMART_MAX_PROOF_BYTES") {
            config.max_proof_bytes = raw
                .parse()
                .map_err(|e| ConfigError::invalid("COURSEMART_MAX_PROOF_BYTES", e))?;
        }
        if let Some(raw) = lookup("COURSEMART_PROOF_CONTENT_TYPES") {
            config.proof_content_types = raw
                .split(',')
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Some(raw) = lookup("COURSEMART_GATEWAY_TIMEOUT_MS") {
            config.gateway_timeout_ms = raw
                .parse()
                .map_err(|e| ConfigError::invalid("COURSEMART_GATEWAY_TIMEOUT_MS", e))?;
        }
        if let Some(raw) = lookup("COURSEMART_DISPATCH_ATTEMPTS") {
            config.dispatch_attempts = raw
                .parse()
                .map_err(|e| ConfigError::invalid("COURSEMART_DISPATCH_ATTEMPTS", e))?;
        }
        if let Some(filter) = lookup("COURSEMART_LOG") {
            config.log.filter = filter;
        }
        if let Some(raw) = lookup("COURSEMART_LOG_JSON") {
            config.log.json = matches!(raw.trim(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    pub fn accepts_proof_type(&self, content_type: &str) -> bool {
        let content_type = content_type.trim().to_ascii_lowercase();
        self.proof_content_types.iter().any(|t| *t == content_type)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use coursemart_pricing::Country;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_production_market() {
        let config = MarketConfig::default();
        assert_eq!(config.certificate_prefix, "DTC");
        assert_eq!(config.max_proof_bytes, 5 * 1024 * 1024);
        assert!(config.accepts_proof_type("image/png"));
        assert!(!config.accepts_proof_type("application/pdf"));
        assert_eq!(config.rates.get(Country::Peru).map(|r| r.value()), Some(3.36));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = MarketConfig::from_lookup(lookup(&[
            ("COURSEMART_RATES", r#"{"peru": 3.5, "chile": 900}"#),
            ("COURSEMART_CERTIFICATE_PREFIX", "ACME"),
            ("COURSEMART_PROOF_CONTENT_TYPES", "image/png, IMAGE/JPEG"),
            ("COURSEMART_LOG_JSON", "true"),
        ]))
        .unwrap();

        assert_eq!(config.rates.get(Country::Peru).map(|r| r.value()), Some(3.5));
        assert!(config.rates.get(Country::Argentina).is_none());
        assert_eq!(config.certificate_prefix, "ACME");
        assert!(config.accepts_proof_type("image/jpeg"));
        assert!(!config.accepts_proof_type("image/webp"));
        assert!(config.log.json);
    }

    #[test]
    fn invalid_rates_are_rejected() {
        let err = MarketConfig::from_lookup(lookup(&[("COURSEMART_RATES", r#"{"peru": -1}"#)]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "COURSEMART_RATES", .. }));

        let err = MarketConfig::from_lookup(lookup(&[("COURSEMART_GATEWAY_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("COURSEMART_GATEWAY_TIMEOUT_MS"));
    }
}
