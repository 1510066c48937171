// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Expected enclave measurements per service name.
//!
//! Each name has a provider and the last value it produced. Providers are
//! retried with backoff; a provider that keeps failing leaves the previous
//! value in place. [`PcrManager::get`] never waits: on a miss it starts one
//! background fetch for that name and returns an empty list.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::SdkConfig;
use crate::refresh::{RepeatedTimer, TickError};
use crate::retry::{with_retry, RetryPolicy};

/// Expected PCR values, hex encoded. Unset registers are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcrSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcr0: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcr1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcr2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcr8: Option<String>,
}

impl PcrSet {
    /// True when no register is set.
    pub fn is_empty(&self) -> bool {
        self.pcr0.is_none() && self.pcr1.is_none() && self.pcr2.is_none() && self.pcr8.is_none()
    }
}

/// Error produced by a dynamic provider.
pub type ProviderFailure = Box<dyn std::error::Error + Send + Sync>;

/// Async function producing the PCR sets for one name.
pub type PcrProvider =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<PcrSet>, ProviderFailure>> + Send + Sync>;

/// How measurements for a name are obtained.
#[derive(Clone)]
pub enum AttestationData {
    Static(Vec<PcrSet>),
    Dynamic(PcrProvider),
}

impl AttestationData {
    /// Data fetched from `provider` and refreshed on each poll.
    pub fn dynamic<F, Fut>(provider: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<PcrSet>, ProviderFailure>> + Send + 'static,
    {
        AttestationData::Dynamic(Arc::new(move || Box::pin(provider())))
    }

    fn into_provider(self) -> (Option<Vec<PcrSet>>, PcrProvider) {
        match self {
            AttestationData::Static(sets) => {
                let value = sets.clone();
                let provider: PcrProvider = Arc::new(move || {
                    let sets = sets.clone();
                    Box::pin(async move { Ok(sets) })
                });
                (Some(value), provider)
            }
            AttestationData::Dynamic(provider) => (None, provider),
        }
    }
}

impl From<Vec<PcrSet>> for AttestationData {
    fn from(sets: Vec<PcrSet>) -> Self {
        AttestationData::Static(sets)
    }
}

impl From<PcrSet> for AttestationData {
    fn from(set: PcrSet) -> Self {
        AttestationData::Static(vec![set])
    }
}

/// Failure obtaining PCRs for a name.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("No attestation data registered for {0}")]
    NotRegistered(String),

    #[error("PCR provider for {name} failed after {attempts} attempts: {reason}")]
    Failed {
        name: String,
        attempts: u32,
        reason: String,
    },
}

struct PcrEntry {
    value: Option<Arc<Vec<PcrSet>>>,
    provider: PcrProvider,
    fetching: bool,
}

struct ManagerInner {
    entries: Mutex<HashMap<String, PcrEntry>>,
    retry: RetryPolicy,
    timer: OnceLock<RepeatedTimer>,
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PcrEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn fetch(&self, name: &str) -> Result<Arc<Vec<PcrSet>>, ProviderError> {
        let provider = self
            .lock()
            .get(name)
            .map(|e| e.provider.clone())
            .ok_or_else(|| ProviderError::NotRegistered(name.to_string()))?;

        match with_retry(&self.retry, || provider()).await {
            Ok(sets) => {
                let sets = Arc::new(sets);
                if let Some(entry) = self.lock().get_mut(name) {
                    entry.value = Some(sets.clone());
                }
                debug!(name = %name, sets = sets.len(), "PCRs refreshed");
                Ok(sets)
            }
            Err(e) => {
                warn!(name = %name, error = %e, "PCR provider failed, keeping previous value");
                Err(ProviderError::Failed {
                    name: name.to_string(),
                    attempts: self.retry.max_retries + 1,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn fetch_all(&self) -> usize {
        let names: Vec<String> = self.lock().keys().cloned().collect();
        let results = join_all(names.iter().map(|name| self.fetch(name))).await;
        results.iter().filter(|r| r.is_err()).count()
    }
}

/// Shared handle to the PCR cache.
#[derive(Clone)]
pub struct PcrManager {
    inner: Arc<ManagerInner>,
}

impl PcrManager {
    /// Manager refreshing every `poll_interval` with the default retry policy.
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_retry_policy(poll_interval, RetryPolicy::default())
    }

    /// Manager refreshing at the configured attestation poll interval.
    pub fn from_config(config: &SdkConfig) -> Self {
        Self::new(config.attestation_poll_interval)
    }

    /// Manager with a custom provider retry policy.
    pub fn with_retry_policy(poll_interval: Duration, retry: RetryPolicy) -> Self {
        let inner = Arc::new(ManagerInner {
            entries: Mutex::new(HashMap::new()),
            retry,
            timer: OnceLock::new(),
        });

        let weak: Weak<ManagerInner> = Arc::downgrade(&inner);
        let timer = RepeatedTimer::new("pcr-refresh", poll_interval, move || {
            let weak = weak.clone();
            async move {
                let result: Result<(), TickError> = match weak.upgrade() {
                    Some(inner) => match inner.fetch_all().await {
                        0 => Ok(()),
                        failed => Err(format!("{failed} PCR provider(s) failed").into()),
                    },
                    None => Ok(()),
                };
                result
            }
        });
        let _ = inner.timer.set(timer);

        Self { inner }
    }

    /// Register or replace the data for `name`. Static data is available
    /// immediately.
    pub fn register(&self, name: impl Into<String>, data: impl Into<AttestationData>) {
        let name = name.into();
        let (value, provider) = data.into().into_provider();
        info!(name = %name, is_static = value.is_some(), "Registered attestation data");
        self.inner.lock().insert(
            name,
            PcrEntry {
                value: value.map(Arc::new),
                provider,
                fetching: false,
            },
        );
    }

    /// True once `name` has attestation data.
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.lock().contains_key(name)
    }

    /// Run the provider for `name` with retries and store the result.
    pub async fn fetch(&self, name: &str) -> Result<Arc<Vec<PcrSet>>, ProviderError> {
        self.inner.fetch(name).await
    }

    /// Refresh every registered name. Failures are logged; returns how many
    /// names failed.
    pub async fn fetch_all(&self) -> usize {
        self.inner.fetch_all().await
    }

    /// Cached sets for `name`, empty when nothing is cached yet. A miss
    /// starts a background fetch unless one is already running.
    pub fn get(&self, name: &str) -> Vec<PcrSet> {
        {
            let mut entries = self.inner.lock();
            let Some(entry) = entries.get_mut(name) else {
                return Vec::new();
            };
            if let Some(value) = &entry.value {
                return value.as_ref().clone();
            }
            if entry.fetching {
                return Vec::new();
            }
            entry.fetching = true;
        }

        let Ok(handle) = Handle::try_current() else {
            warn!(name = %name, "No tokio runtime; PCRs not fetched");
            if let Some(entry) = self.inner.lock().get_mut(name) {
                entry.fetching = false;
            }
            return Vec::new();
        };

        let inner = self.inner.clone();
        let name = name.to_string();
        handle.spawn(async move {
            let _ = inner.fetch(&name).await;
            if let Some(entry) = inner.lock().get_mut(&name) {
                entry.fetching = false;
            }
        });
        Vec::new()
    }

    /// Drop cached values. Registrations stay.
    pub fn clear(&self) {
        for entry in self.inner.lock().values_mut() {
            entry.value = None;
        }
    }

    /// Refresh every registered name on each tick.
    pub fn start(&self) {
        if let Some(timer) = self.inner.timer.get() {
            timer.start();
        }
    }

    /// Stop refreshing. Cached values stay.
    pub fn stop(&self) {
        if let Some(timer) = self.inner.timer.get() {
            timer.stop();
        }
    }

    /// True while the refresh timer runs.
    pub fn is_polling(&self) -> bool {
        self.inner.timer.get().is_some_and(RepeatedTimer::is_running)
    }
}
