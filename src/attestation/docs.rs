// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Attestation documents per enclave service.
//!
//! Documents are polled without retry. A failed fetch keeps whatever was
//! cached for that name; every poll publishes a fresh map in one swap.
//! [`AttestationDocCache::reload`] refetches one name on demand, for when an
//! enclave was redeployed between polls. The TLS hook cannot await, so it
//! uses [`AttestationDocCache::reload_in_background`] instead.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use futures::future::join_all;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::config::SdkConfig;
use crate::refresh::{RepeatedTimer, TickError};

/// Remote source of attestation documents.
#[async_trait]
pub trait AttestationDocSource: Send + Sync {
    /// Base64 attestation document for enclave service `name`.
    async fn fetch_attestation_doc(&self, name: &str) -> Result<String, ApiError>;
}

type DocMap = HashMap<String, String>;

struct DocInner {
    source: Arc<dyn AttestationDocSource>,
    names: RwLock<Vec<String>>,
    docs: RwLock<Arc<DocMap>>,
    reloading: Mutex<HashSet<String>>,
    timer: OnceLock<RepeatedTimer>,
}

impl DocInner {
    fn names(&self) -> Vec<String> {
        match self.names.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn snapshot(&self) -> Arc<DocMap> {
        match self.docs.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn publish(&self, docs: DocMap) {
        let docs = Arc::new(docs);
        match self.docs.write() {
            Ok(mut guard) => *guard = docs,
            Err(poisoned) => *poisoned.into_inner() = docs,
        }
    }

    fn track(&self, name: &str) {
        let mut names = match self.names.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    async fn reload(&self, name: &str) -> Result<(), ApiError> {
        self.track(name);
        let doc = self.source.fetch_attestation_doc(name).await?;
        let mut docs = self.snapshot().as_ref().clone();
        docs.insert(name.to_string(), doc);
        self.publish(docs);
        debug!(name = %name, "Attestation document reloaded");
        Ok(())
    }

    /// Claims `name` for a background reload; false if one is in flight.
    fn claim_reload(&self, name: &str) -> bool {
        self.reloading
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string())
    }

    fn release_reload(&self, name: &str) {
        self.reloading
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name);
    }

    /// Fetch every tracked name; returns how many failed.
    async fn poll(&self) -> usize {
        let names = self.names();
        let results = join_all(names.iter().map(|name| async move {
            (name, self.source.fetch_attestation_doc(name).await)
        }))
        .await;

        let mut docs = self.snapshot().as_ref().clone();
        let mut failed = 0;
        for (name, result) in results {
            match result {
                Ok(doc) => {
                    docs.insert(name.clone(), doc);
                }
                Err(e) => {
                    failed += 1;
                    warn!(name = %name, error = %e, "Attestation document fetch failed, keeping cached");
                }
            }
        }
        self.publish(docs);
        debug!(names = names.len(), failed, "Attestation documents polled");
        failed
    }
}

/// Shared handle to the attestation document cache.
#[derive(Clone)]
pub struct AttestationDocCache {
    inner: Arc<DocInner>,
}

impl AttestationDocCache {
    /// Cache polling `names` every `poll_interval`.
    pub fn new(
        source: Arc<dyn AttestationDocSource>,
        names: Vec<String>,
        poll_interval: Duration,
    ) -> Self {
        let inner = Arc::new(DocInner {
            source,
            names: RwLock::new(names),
            docs: RwLock::new(Arc::new(HashMap::new())),
            reloading: Mutex::new(HashSet::new()),
            timer: OnceLock::new(),
        });

        let weak: Weak<DocInner> = Arc::downgrade(&inner);
        let timer = RepeatedTimer::new("attestation-docs", poll_interval, move || {
            let weak = weak.clone();
            async move {
                let result: Result<(), TickError> = match weak.upgrade() {
                    Some(inner) => match inner.poll().await {
                        0 => Ok(()),
                        failed => Err(format!("{failed} attestation document(s) unavailable").into()),
                    },
                    None => Ok(()),
                };
                result
            }
        });
        let _ = inner.timer.set(timer);

        Self { inner }
    }

    /// Cache polling `names` at the configured attestation poll interval.
    pub fn from_config(
        source: Arc<dyn AttestationDocSource>,
        names: Vec<String>,
        config: &SdkConfig,
    ) -> Self {
        Self::new(source, names, config.attestation_poll_interval)
    }

    /// Start tracking `name`. Its document is fetched on the next poll or
    /// reload.
    pub fn track(&self, name: impl Into<String>) {
        self.inner.track(&name.into());
    }

    /// Names polled on each tick.
    pub fn names(&self) -> Vec<String> {
        self.inner.names()
    }

    /// Fetch once now, then keep polling.
    pub async fn start(&self) {
        self.poll().await;
        if let Some(timer) = self.inner.timer.get() {
            timer.start();
            info!(
                interval_secs = timer.interval().as_secs_f64(),
                "Attestation document polling started"
            );
        }
    }

    /// Stop polling. Cached documents stay.
    pub fn stop(&self) {
        if let Some(timer) = self.inner.timer.get() {
            timer.stop();
        }
    }

    /// True while the poll timer runs.
    pub fn is_polling(&self) -> bool {
        self.inner.timer.get().is_some_and(RepeatedTimer::is_running)
    }

    /// Fetch every tracked name; returns how many failed.
    pub async fn poll(&self) -> usize {
        self.inner.poll().await
    }

    /// Refetch the document for `name` now. On failure the cached document
    /// stays.
    pub async fn reload(&self, name: &str) -> Result<(), ApiError> {
        self.inner.reload(name).await
    }

    /// Start a reload of `name` on the current runtime without waiting for
    /// it. Returns false when a reload for `name` is already running or no
    /// runtime is available.
    pub fn reload_in_background(&self, name: &str) -> bool {
        if !self.inner.claim_reload(name) {
            return false;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!(name = %name, "No tokio runtime; attestation document not reloaded");
            self.inner.release_reload(name);
            return false;
        };

        let inner = self.inner.clone();
        let name = name.to_string();
        handle.spawn(async move {
            if let Err(e) = inner.reload(&name).await {
                warn!(name = %name, error = %e, "Attestation document reload failed");
            }
            inner.release_reload(&name);
        });
        true
    }

    /// Decoded document for `name`.
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        let encoded = self.get_encoded(name)?;
        match Base64::decode_vec(encoded.trim()) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(name = %name, error = %e, "Cached attestation document is not valid base64");
                None
            }
        }
    }

    /// Document for `name` as served.
    pub fn get_encoded(&self, name: &str) -> Option<String> {
        self.inner.snapshot().get(name).cloned()
    }

    /// Drop every cached document. Tracked names stay.
    pub fn clear(&self) {
        self.inner.publish(HashMap::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeDocs {
        online: AtomicBool,
        calls: AtomicUsize,
        version: AtomicUsize,
    }

    impl FakeDocs {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                online: AtomicBool::new(true),
                calls: AtomicUsize::new(0),
                version: AtomicUsize::new(1),
            })
        }
    }

    #[async_trait]
    impl AttestationDocSource for FakeDocs {
        async fn fetch_attestation_doc(&self, name: &str) -> Result<String, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.online.load(Ordering::SeqCst) {
                return Err(ApiError::Status {
                    status: 503,
                    url: format!("https://{name}/.well-known/attestation"),
                });
            }
            let doc = format!("{name}-v{}", self.version.load(Ordering::SeqCst));
            Ok(Base64::encode_string(doc.as_bytes()))
        }
    }

    fn cache(source: Arc<FakeDocs>) -> AttestationDocCache {
        AttestationDocCache::new(
            source,
            vec!["payments".to_string(), "ledger".to_string()],
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn start_polls_every_name() {
        let source = FakeDocs::new();
        let cache = cache(source.clone());
        cache.start().await;

        assert_eq!(cache.get("payments").unwrap(), b"payments-v1");
        assert_eq!(cache.get("ledger").unwrap(), b"ledger-v1");
        assert!(cache.get("unknown").is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_polling());
        cache.stop();
    }

    #[tokio::test]
    async fn failed_poll_keeps_stale_documents() {
        let source = FakeDocs::new();
        let cache = cache(source.clone());
        assert_eq!(cache.poll().await, 0);

        source.online.store(false, Ordering::SeqCst);
        source.version.store(2, Ordering::SeqCst);
        assert_eq!(cache.poll().await, 2);
        assert_eq!(cache.get("payments").unwrap(), b"payments-v1");
    }

    #[tokio::test]
    async fn reload_replaces_one_name() {
        let source = FakeDocs::new();
        let cache = cache(source.clone());
        cache.poll().await;

        source.version.store(2, Ordering::SeqCst);
        cache.reload("payments").await.unwrap();
        assert_eq!(cache.get("payments").unwrap(), b"payments-v2");
        assert_eq!(cache.get("ledger").unwrap(), b"ledger-v1");

        source.online.store(false, Ordering::SeqCst);
        assert!(cache.reload("payments").await.is_err());
        assert_eq!(cache.get("payments").unwrap(), b"payments-v2");
    }

    #[tokio::test]
    async fn reload_tracks_new_names() {
        let source = FakeDocs::new();
        let cache = AttestationDocCache::new(source, Vec::new(), Duration::from_secs(300));
        cache.reload("fresh").await.unwrap();
        assert_eq!(cache.names(), vec!["fresh"]);
        assert_eq!(cache.get("fresh").unwrap(), b"fresh-v1");
    }

    #[tokio::test]
    async fn background_reload_runs_once_per_name() {
        let source = FakeDocs::new();
        let cache = cache(source.clone());
        cache.poll().await;
        source.version.store(2, Ordering::SeqCst);

        assert!(cache.reload_in_background("payments"));
        assert!(!cache.reload_in_background("payments"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cache.get("payments").unwrap(), b"payments-v2");
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert!(cache.reload_in_background("payments"));
    }

    #[test]
    fn background_reload_needs_a_runtime() {
        let cache = cache(FakeDocs::new());
        assert!(!cache.reload_in_background("payments"));
        assert!(cache.inner.claim_reload("payments"));
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        let source = FakeDocs::new();
        let cache = cache(source);
        cache.poll().await;
        cache.clear();
        assert!(cache.get("payments").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_interval_comes_from_sdk_config() {
        let source = FakeDocs::new();
        let config = SdkConfig::new("key").with_attestation_poll_interval(Duration::from_secs(20));
        let cache = AttestationDocCache::from_config(source.clone(), vec!["payments".to_string()], &config);
        cache.start().await;
        source.version.store(2, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.get("payments").unwrap(), b"payments-v1");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cache.get("payments").unwrap(), b"payments-v2");
        cache.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn timer_repolls() {
        let source = FakeDocs::new();
        let cache = AttestationDocCache::new(
            source.clone(),
            vec!["payments".to_string()],
            Duration::from_secs(10),
        );
        cache.start().await;
        source.version.store(3, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.get("payments").unwrap(), b"payments-v3");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        cache.stop();
    }
}
