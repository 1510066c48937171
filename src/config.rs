// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # SDK Configuration
//!
//! Environment variable names, defaults, and the [`SdkConfig`] loaded from
//! them. Every field can also be set with a `with_*` builder method.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SDK_API_KEY` | API key sent as `Api-Key` and in `Proxy-Authorization` | Required |
//! | `SDK_APP_ID` | App identifier used in enclave hostnames | Optional |
//! | `SDK_API_URL` | Base URL of the key and relay-config API | `https://api.evervault.com` |
//! | `SDK_RELAY_URL` | Relay proxy `host:port` | `relay.evervault.com:443` |
//! | `SDK_CA_HOSTS` | Comma-separated CA certificate hosts, fallback last | `ca.evervault.com,ca.evervault.io` |
//! | `SDK_ENCLAVE_HOSTNAME` | Base domain of enclave services | `cage.evervault.com` |
//! | `SDK_CURVE` | `secp256k1` or `prime256v1` | `secp256k1` |
//! | `SDK_DECRYPTION_DOMAINS` | Comma-separated relay targets | empty |
//! | `SDK_RELAY_POLL_INTERVAL` | Relay config poll interval, seconds | `5` |
//! | `SDK_ATTESTATION_POLL_INTERVAL` | Attestation refresh interval, seconds | `300` |
//! | `SDK_DEBUG_REQUESTS` | Log intercepted and ignored requests | `false` |
//! | `SDK_MAX_FILE_SIZE` | Maximum binary payload in bytes | `26214400` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::time::Duration;

use crate::crypto::curves::{CurveName, DEFAULT_MAX_FILE_SIZE};

/// API key for the key endpoint and the relay.
pub const API_KEY_ENV: &str = "SDK_API_KEY";

/// App identifier; enclave hostnames use it with `_` replaced by `-`.
pub const APP_ID_ENV: &str = "SDK_APP_ID";

/// Base URL of the API.
pub const API_URL_ENV: &str = "SDK_API_URL";

/// Relay proxy address as `host:port`.
pub const RELAY_URL_ENV: &str = "SDK_RELAY_URL";

/// CA certificate hosts. The last entry is the fallback; the primary is
/// picked at random from the rest.
pub const CA_HOSTS_ENV: &str = "SDK_CA_HOSTS";

/// Base domain of enclave services.
pub const ENCLAVE_HOSTNAME_ENV: &str = "SDK_ENCLAVE_HOSTNAME";

/// `secp256k1` or `prime256v1`.
pub const CURVE_ENV: &str = "SDK_CURVE";

/// Comma-separated `host[/path]` patterns to relay.
pub const DECRYPTION_DOMAINS_ENV: &str = "SDK_DECRYPTION_DOMAINS";

/// Seconds between relay config polls.
pub const RELAY_POLL_INTERVAL_ENV: &str = "SDK_RELAY_POLL_INTERVAL";

/// Seconds between PCR and attestation document refreshes.
pub const ATTESTATION_POLL_INTERVAL_ENV: &str = "SDK_ATTESTATION_POLL_INTERVAL";

/// Log the routing decision for every outbound request.
pub const DEBUG_REQUESTS_ENV: &str = "SDK_DEBUG_REQUESTS";

/// Largest binary payload accepted for encryption, in bytes.
pub const MAX_FILE_SIZE_ENV: &str = "SDK_MAX_FILE_SIZE";

/// Logging format, `json` or `pretty`.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_API_URL: &str = "https://api.evervault.com";
pub const DEFAULT_RELAY_URL: &str = "relay.evervault.com:443";
pub const DEFAULT_CA_HOSTS: &[&str] = &["ca.evervault.com", "ca.evervault.io"];
pub const DEFAULT_ENCLAVE_HOSTNAME: &str = "cage.evervault.com";
/// Used until the API returns its own interval.
pub const DEFAULT_RELAY_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_ATTESTATION_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Invalid or missing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration missing: {0}")]
    Missing(String),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// SDK settings. See the module docs for the environment variables.
#[derive(Debug, Clone)]
pub struct SdkConfig {
    pub api_key: String,
    pub app_id: Option<String>,
    pub api_url: String,
    pub relay_url: String,
    pub ca_hosts: Vec<String>,
    pub enclave_hostname: String,
    pub curve: CurveName,
    pub decryption_domains: Vec<String>,
    pub relay_poll_interval: Duration,
    pub attestation_poll_interval: Duration,
    pub debug_requests: bool,
    pub max_file_size: usize,
}

impl SdkConfig {
    /// Defaults for everything except the API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            app_id: None,
            api_url: DEFAULT_API_URL.to_string(),
            relay_url: DEFAULT_RELAY_URL.to_string(),
            ca_hosts: DEFAULT_CA_HOSTS.iter().map(|h| h.to_string()).collect(),
            enclave_hostname: DEFAULT_ENCLAVE_HOSTNAME.to_string(),
            curve: CurveName::Secp256k1,
            decryption_domains: Vec::new(),
            relay_poll_interval: DEFAULT_RELAY_POLL_INTERVAL,
            attestation_poll_interval: DEFAULT_ATTESTATION_POLL_INTERVAL,
            debug_requests: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` in place of the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut config = Self::new(env.required(API_KEY_ENV)?);

        config.app_id = env.optional(APP_ID_ENV);
        config.api_url = env.or_default(API_URL_ENV, DEFAULT_API_URL);
        config.relay_url = env.or_default(RELAY_URL_ENV, DEFAULT_RELAY_URL);
        config.enclave_hostname = env.or_default(ENCLAVE_HOSTNAME_ENV, DEFAULT_ENCLAVE_HOSTNAME);

        if let Some(hosts) = env.list(CA_HOSTS_ENV) {
            config.ca_hosts = hosts;
        }
        if let Some(domains) = env.list(DECRYPTION_DOMAINS_ENV) {
            config.decryption_domains = domains;
        }
        if let Some(curve) = env.optional(CURVE_ENV) {
            config.curve = curve.parse().map_err(|_| ConfigError::Invalid {
                name: CURVE_ENV.to_string(),
                reason: format!("unsupported curve {curve}"),
            })?;
        }
        if let Some(secs) = env.parsed::<u64>(RELAY_POLL_INTERVAL_ENV)? {
            config.relay_poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parsed::<u64>(ATTESTATION_POLL_INTERVAL_ENV)? {
            config.attestation_poll_interval = Duration::from_secs(secs);
        }
        if let Some(debug) = env.parsed::<bool>(DEBUG_REQUESTS_ENV)? {
            config.debug_requests = debug;
        }
        if let Some(max) = env.parsed::<usize>(MAX_FILE_SIZE_ENV)? {
            config.max_file_size = max;
        }

        if config.ca_hosts.is_empty() {
            return Err(ConfigError::Invalid {
                name: CA_HOSTS_ENV.to_string(),
                reason: "at least one host is required".to_string(),
            });
        }
        Ok(config)
    }

    /// Set the app identifier.
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Set the API base URL.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Set the relay proxy address.
    pub fn with_relay_url(mut self, relay_url: impl Into<String>) -> Self {
        self.relay_url = relay_url.into();
        self
    }

    /// Set the CA hosts; the last one is the fallback.
    pub fn with_ca_hosts(mut self, hosts: Vec<String>) -> Self {
        self.ca_hosts = hosts;
        self
    }

    /// Set the enclave base domain.
    pub fn with_enclave_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.enclave_hostname = hostname.into();
        self
    }

    /// Set the encryption curve.
    pub fn with_curve(mut self, curve: CurveName) -> Self {
        self.curve = curve;
        self
    }

    /// Set the relayed `host[/path]` patterns.
    pub fn with_decryption_domains(mut self, domains: Vec<String>) -> Self {
        self.decryption_domains = domains;
        self
    }

    /// Set the relay config poll interval.
    pub fn with_relay_poll_interval(mut self, interval: Duration) -> Self {
        self.relay_poll_interval = interval;
        self
    }

    /// Set the PCR and attestation document refresh interval.
    pub fn with_attestation_poll_interval(mut self, interval: Duration) -> Self {
        self.attestation_poll_interval = interval;
        self
    }

    /// Log routing decisions.
    pub fn with_debug_requests(mut self, enabled: bool) -> Self {
        self.debug_requests = enabled;
        self
    }

    /// Set the largest binary payload, in bytes.
    pub fn with_max_file_size(mut self, max_file_size: usize) -> Self {
        self.max_file_size = max_file_size;
        self
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.optional(name)
            .ok_or_else(|| ConfigError::Missing(name.to_string()))
    }

    fn or_default(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn list(&self, name: &str) -> Option<Vec<String>> {
        self.optional(name).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    fn parsed<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(name)
            .map(|v| {
                v.parse::<T>().map_err(|e| ConfigError::Invalid {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<SdkConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SdkConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn api_key_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing(name)) if name == API_KEY_ENV));
        assert!(matches!(load(&[(API_KEY_ENV, "  ")]), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[(API_KEY_ENV, "ev:key:abc")]).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.curve, CurveName::Secp256k1);
        assert_eq!(config.ca_hosts.len(), 2);
        assert_eq!(config.relay_poll_interval, DEFAULT_RELAY_POLL_INTERVAL);
        assert_eq!(config.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert!(!config.debug_requests);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            (API_KEY_ENV, "key"),
            (CURVE_ENV, "prime256v1"),
            (DECRYPTION_DOMAINS_ENV, "api.stripe.com, *.example.com/v1/*,"),
            (RELAY_POLL_INTERVAL_ENV, "30"),
            (DEBUG_REQUESTS_ENV, "true"),
            (APP_ID_ENV, "app_123"),
        ])
        .unwrap();

        assert_eq!(config.curve, CurveName::Prime256v1);
        assert_eq!(
            config.decryption_domains,
            vec!["api.stripe.com", "*.example.com/v1/*"]
        );
        assert_eq!(config.relay_poll_interval, Duration::from_secs(30));
        assert!(config.debug_requests);
        assert_eq!(config.app_id.as_deref(), Some("app_123"));
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = load(&[(API_KEY_ENV, "key"), (CURVE_ENV, "ed25519")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name, .. } if name == CURVE_ENV));

        let err = load(&[(API_KEY_ENV, "key"), (RELAY_POLL_INTERVAL_ENV, "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
