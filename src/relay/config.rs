// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Polled relay outbound configuration.
//!
//! The remote config lists destination domains whose traffic must go through
//! the relay. It is fetched once on [`RelayConfigCache::start`], then on a
//! timer whose period follows the interval the API returns. Each successful
//! poll replaces the compiled domain list wholesale; failed polls are logged
//! and the previous list stays in place.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::config::SdkConfig;
use crate::refresh::{RepeatedTimer, TickError};

/// Body of `GET /v2/relay-outbound`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayOutboundResponse {
    /// Seconds until the next poll
    pub poll_interval: Option<f64>,
    pub data: RelayOutboundData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayOutboundData {
    #[serde(default)]
    pub outbound_destinations: HashMap<String, OutboundDestination>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundDestination {
    pub destination_domain: String,
}

/// Parsed relay outbound config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayOutboundConfig {
    pub destination_domains: Vec<String>,
    pub poll_interval: Option<Duration>,
}

impl RelayOutboundConfig {
    /// Build from a response body; `header_interval` (seconds) wins over the
    /// body's `pollInterval`.
    pub fn from_response(response: RelayOutboundResponse, header_interval: Option<f64>) -> Self {
        let mut destination_domains: Vec<String> = response
            .data
            .outbound_destinations
            .into_values()
            .map(|d| d.destination_domain)
            .collect();
        destination_domains.sort();

        let poll_interval = header_interval
            .or(response.poll_interval)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .filter(|d| !d.is_zero());

        Self {
            destination_domains,
            poll_interval,
        }
    }
}

/// Remote source of the relay outbound config.
#[async_trait]
pub trait RelayConfigSource: Send + Sync {
    async fn fetch_relay_config(&self) -> Result<RelayOutboundConfig, ApiError>;
}

/// `*x` matches any host ending in `x`; anything else matches exactly.
pub fn domain_pattern(domain: &str) -> Result<Regex, regex::Error> {
    match domain.strip_prefix('*') {
        Some(suffix) => Regex::new(&format!("^.*{}$", regex::escape(suffix))),
        None => Regex::new(&format!("^{}$", regex::escape(domain))),
    }
}

struct CompiledConfig {
    config: RelayOutboundConfig,
    patterns: Vec<Regex>,
}

impl CompiledConfig {
    fn compile(config: RelayOutboundConfig) -> Self {
        let patterns = config
            .destination_domains
            .iter()
            .filter_map(|domain| match domain_pattern(domain) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(domain = %domain, error = %e, "Skipping invalid relay destination");
                    None
                }
            })
            .collect();
        Self { config, patterns }
    }
}

struct CacheInner {
    source: Arc<dyn RelayConfigSource>,
    default_interval: Duration,
    current: RwLock<Option<Arc<CompiledConfig>>>,
    timer: OnceLock<RepeatedTimer>,
}

impl CacheInner {
    async fn refresh(&self) -> Result<(), ApiError> {
        let config = self.source.fetch_relay_config().await?;
        let interval = config.poll_interval.unwrap_or(self.default_interval);
        let compiled = Arc::new(CompiledConfig::compile(config));

        debug!(
            destinations = compiled.patterns.len(),
            interval_secs = interval.as_secs_f64(),
            "Relay outbound config refreshed"
        );

        match self.current.write() {
            Ok(mut guard) => *guard = Some(compiled),
            Err(poisoned) => *poisoned.into_inner() = Some(compiled),
        }

        if let Some(timer) = self.timer.get() {
            timer.update_interval(interval);
        }
        Ok(())
    }

    fn snapshot(&self) -> Option<Arc<CompiledConfig>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Shared handle to the polled relay config.
#[derive(Clone)]
pub struct RelayConfigCache {
    inner: Arc<CacheInner>,
}

impl RelayConfigCache {
    /// Poll every `default_interval` until the API returns its own interval.
    pub fn new(source: Arc<dyn RelayConfigSource>, default_interval: Duration) -> Self {
        let inner = Arc::new(CacheInner {
            source,
            default_interval,
            current: RwLock::new(None),
            timer: OnceLock::new(),
        });

        let weak: Weak<CacheInner> = Arc::downgrade(&inner);
        let timer = RepeatedTimer::new("relay-outbound-config", default_interval, move || {
            let weak = weak.clone();
            async move {
                let result: Result<(), TickError> = match weak.upgrade() {
                    Some(inner) => inner.refresh().await.map_err(Into::into),
                    None => Ok(()),
                };
                result
            }
        });
        // Freshly created, so the cell is empty.
        let _ = inner.timer.set(timer);

        Self { inner }
    }

    /// Cache polling at the configured relay poll interval.
    pub fn from_config(source: Arc<dyn RelayConfigSource>, config: &SdkConfig) -> Self {
        Self::new(source, config.relay_poll_interval)
    }

    /// Fetch once now, then keep polling. A failed first fetch is logged and
    /// polling still starts.
    pub async fn start(&self) {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Initial relay outbound config fetch failed");
        }
        if let Some(timer) = self.inner.timer.get() {
            timer.start();
            info!(interval_secs = timer.interval().as_secs_f64(), "Relay config polling started");
        }
    }

    /// Stop polling. The last config stays in use.
    pub fn stop(&self) {
        if let Some(timer) = self.inner.timer.get() {
            timer.stop();
        }
    }

    /// Fetch and publish the config now.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        self.inner.refresh().await
    }

    /// Whether `host` matches any polled destination domain.
    pub fn matches_host(&self, host: &str) -> bool {
        self.inner
            .snapshot()
            .is_some_and(|c| c.patterns.iter().any(|p| p.is_match(host)))
    }

    /// Last fetched config, if any poll has succeeded.
    pub fn config(&self) -> Option<RelayOutboundConfig> {
        self.inner.snapshot().map(|c| c.config.clone())
    }

    /// Current timer period.
    pub fn poll_interval(&self) -> Duration {
        self.inner
            .timer
            .get()
            .map(RepeatedTimer::interval)
            .unwrap_or(self.inner.default_interval)
    }

    /// True while the poll timer runs.
    pub fn is_polling(&self) -> bool {
        self.inner.timer.get().is_some_and(RepeatedTimer::is_running)
    }
}
