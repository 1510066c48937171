// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relay CA trust.
//!
//! The relay re-terminates TLS with certificates issued by its own CA. The CA
//! certificate is fetched from a randomly chosen primary host, raced against
//! a fallback host that starts after [`DEFAULT_FALLBACK_DELAY`]. The first
//! host to return a parseable certificate wins and the other task is
//! aborted, whether it is still waiting out its delay or mid-request.
//!
//! Trust is held as a rustls [`ClientConfig`] (web PKI roots plus the relay
//! CA) shared by every relayed connection. Installing a new CA swaps the
//! whole config.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::error::RelayError;
use crate::api::ApiError;

/// Delay before the fallback host is tried.
pub const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_millis(500);

/// Remote source of the relay CA certificate.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    /// PEM or DER certificate bytes served by `host`.
    async fn fetch_certificate(&self, host: &str) -> Result<Vec<u8>, ApiError>;
}

/// A parsed CA certificate with its validity window.
#[derive(Debug, Clone)]
pub struct CaCertificate {
    der: CertificateDer<'static>,
    not_before: i64,
    not_after: i64,
}

impl CaCertificate {
    /// Parse PEM (`-----BEGIN CERTIFICATE-----`) or raw DER.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RelayError> {
        let der = if bytes.trim_ascii_start().starts_with(b"-----BEGIN") {
            pem::parse(bytes)
                .map_err(|e| RelayError::Certificate(format!("invalid PEM: {e}")))?
                .into_contents()
        } else {
            bytes.to_vec()
        };

        let (not_before, not_after) = {
            let (_, cert) = x509_parser::parse_x509_certificate(&der)
                .map_err(|e| RelayError::Certificate(format!("invalid X.509: {e}")))?;
            let validity = cert.validity();
            (validity.not_before.timestamp(), validity.not_after.timestamp())
        };

        Ok(Self {
            der: CertificateDer::from(der),
            not_before,
            not_after,
        })
    }

    /// Certificate bytes, DER.
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    /// `notBefore` as unix seconds.
    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    /// `notAfter` as unix seconds.
    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// True inside the validity window.
    pub fn is_valid_at(&self, unix_secs: i64) -> bool {
        self.not_before <= unix_secs && unix_secs <= self.not_after
    }
}

/// Root store with the bundled web PKI roots.
pub fn webpki_root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

/// Client config over `roots` with the ring provider.
pub fn client_config_with_roots(roots: RootCertStore) -> Result<ClientConfig, RelayError> {
    Ok(
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| RelayError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

#[derive(Clone)]
struct TrustState {
    certificate: Arc<CaCertificate>,
    config: Arc<ClientConfig>,
}

enum Winner {
    Primary,
    Fallback,
}

/// Fetches, validates and installs the relay CA.
pub struct RelayCaStore {
    source: Arc<dyn CertificateSource>,
    primary_hosts: Vec<String>,
    fallback_host: String,
    fallback_delay: Duration,
    current: RwLock<Option<TrustState>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl RelayCaStore {
    /// `hosts` lists primaries followed by the fallback. With a single host
    /// there is no race.
    pub fn new(source: Arc<dyn CertificateSource>, hosts: &[String]) -> Result<Self, RelayError> {
        let (fallback_host, primaries) = hosts
            .split_last()
            .ok_or_else(|| RelayError::Certificate("no CA hosts configured".to_string()))?;

        let primary_hosts = if primaries.is_empty() {
            vec![fallback_host.clone()]
        } else {
            primaries.to_vec()
        };

        Ok(Self {
            source,
            primary_hosts,
            fallback_host: fallback_host.clone(),
            fallback_delay: DEFAULT_FALLBACK_DELAY,
            current: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Override the head start given to the primary host.
    pub fn with_fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay = delay;
        self
    }

    /// Currently installed CA, if any.
    pub fn certificate(&self) -> Option<Arc<CaCertificate>> {
        self.snapshot().map(|s| s.certificate)
    }

    /// Currently installed trust config, if any.
    pub fn client_config(&self) -> Option<Arc<ClientConfig>> {
        self.snapshot().map(|s| s.config)
    }

    /// Trust config with a CA valid right now, fetching one if needed.
    pub async fn ensure_fresh(&self) -> Result<Arc<ClientConfig>, RelayError> {
        if let Some(config) = self.fresh_config() {
            return Ok(config);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(config) = self.fresh_config() {
            return Ok(config);
        }

        let certificate = self.fetch_certificate().await?;
        self.install(certificate)
    }

    /// Swap in `certificate` as the trusted relay CA.
    pub fn install(&self, certificate: CaCertificate) -> Result<Arc<ClientConfig>, RelayError> {
        let mut roots = webpki_root_store();
        roots
            .add(certificate.der().clone())
            .map_err(|e| RelayError::Certificate(format!("CA rejected by root store: {e}")))?;
        let config = Arc::new(client_config_with_roots(roots)?);

        info!(
            not_before = certificate.not_before(),
            not_after = certificate.not_after(),
            "Installed relay CA certificate"
        );

        let state = TrustState {
            certificate: Arc::new(certificate),
            config: config.clone(),
        };
        match self.current.write() {
            Ok(mut guard) => *guard = Some(state),
            Err(poisoned) => *poisoned.into_inner() = Some(state),
        }
        Ok(config)
    }

    /// Race the primary against the delayed fallback.
    pub async fn fetch_certificate(&self) -> Result<CaCertificate, RelayError> {
        let primary_host = self
            .primary_hosts
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| self.fallback_host.clone());

        let mut primary = self.spawn_fetch(primary_host.clone(), Duration::ZERO);
        if primary_host == self.fallback_host {
            return join_fetch(primary).await.map_err(RelayError::Certificate);
        }
        let mut fallback = self.spawn_fetch(self.fallback_host.clone(), self.fallback_delay);

        let (winner, first) = tokio::select! {
            result = &mut primary => (Winner::Primary, flatten(result)),
            result = &mut fallback => (Winner::Fallback, flatten(result)),
        };
        let other = match winner {
            Winner::Primary => fallback,
            Winner::Fallback => primary,
        };

        match first {
            Ok(certificate) => {
                other.abort();
                Ok(certificate)
            }
            Err(first_error) => {
                warn!(error = %first_error, "CA certificate fetch failed, awaiting other host");
                join_fetch(other).await.map_err(|second_error| {
                    RelayError::Certificate(format!("{first_error}; {second_error}"))
                })
            }
        }
    }

    fn spawn_fetch(&self, host: String, delay: Duration) -> JoinHandle<Result<CaCertificate, String>> {
        let source = self.source.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let bytes = source
                .fetch_certificate(&host)
                .await
                .map_err(|e| format!("{host}: {e}"))?;
            CaCertificate::from_bytes(&bytes).map_err(|e| format!("{host}: {e}"))
        })
    }

    fn snapshot(&self) -> Option<TrustState> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn fresh_config(&self) -> Option<Arc<ClientConfig>> {
        let now = chrono::Utc::now().timestamp();
        self.snapshot()
            .filter(|s| s.certificate.is_valid_at(now))
            .map(|s| s.config)
    }
}

fn flatten(
    result: Result<Result<CaCertificate, String>, tokio::task::JoinError>,
) -> Result<CaCertificate, String> {
    result.map_err(|e| format!("fetch task failed: {e}"))?
}

async fn join_fetch(
    handle: JoinHandle<Result<CaCertificate, String>>,
) -> Result<CaCertificate, String> {
    flatten(handle.await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const RELAY_CA: &str = include_str!("testdata/relay_ca.pem");
    const EXPIRED_CA: &str = include_str!("testdata/expired_ca.pem");

    #[derive(Default)]
    struct FakeCertificateSource {
        routes: HashMap<String, (Duration, Option<&'static str>)>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeCertificateSource {
        fn route(mut self, host: &str, delay_ms: u64, body: Option<&'static str>) -> Self {
            self.routes
                .insert(host.to_string(), (Duration::from_millis(delay_ms), body));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CertificateSource for FakeCertificateSource {
        async fn fetch_certificate(&self, host: &str) -> Result<Vec<u8>, ApiError> {
            self.calls.lock().unwrap().push(host.to_string());
            let (delay, body) = self.routes.get(host).cloned().unwrap_or_default();
            tokio::time::sleep(delay).await;
            body.map(|b| b.as_bytes().to_vec())
                .ok_or_else(|| ApiError::Request(format!("{host} unreachable")))
        }
    }

    fn hosts() -> Vec<String> {
        vec!["primary".to_string(), "fallback".to_string()]
    }

    fn not_after(store: &RelayCaStore) -> i64 {
        store.certificate().unwrap().not_after()
    }

    #[test]
    fn parses_pem_and_der() {
        let from_pem = CaCertificate::from_bytes(RELAY_CA.as_bytes()).unwrap();
        assert_eq!(from_pem.not_before(), 1_577_836_800);
        assert_eq!(from_pem.not_after(), 4_733_510_400);

        let der = pem::parse(RELAY_CA).unwrap().into_contents();
        let from_der = CaCertificate::from_bytes(&der).unwrap();
        assert_eq!(from_der.der(), from_pem.der());
    }

    #[test]
    fn validity_window() {
        let valid = CaCertificate::from_bytes(RELAY_CA.as_bytes()).unwrap();
        let expired = CaCertificate::from_bytes(EXPIRED_CA.as_bytes()).unwrap();
        let now = chrono::Utc::now().timestamp();

        assert!(valid.is_valid_at(now));
        assert!(!valid.is_valid_at(valid.not_before() - 1));
        assert!(!expired.is_valid_at(now));
    }

    #[test]
    fn rejects_garbage() {
        assert!(CaCertificate::from_bytes(b"not a certificate").is_err());
        assert!(CaCertificate::from_bytes(b"-----BEGIN CERTIFICATE-----\n!!\n").is_err());
    }

    #[test]
    fn needs_at_least_one_host() {
        let source = Arc::new(FakeCertificateSource::default());
        assert!(RelayCaStore::new(source, &[]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn fast_primary_wins_without_fallback() {
        let source = Arc::new(
            FakeCertificateSource::default()
                .route("primary", 100, Some(RELAY_CA))
                .route("fallback", 0, Some(EXPIRED_CA)),
        );
        let store = RelayCaStore::new(source.clone(), &hosts()).unwrap();

        store.ensure_fresh().await.unwrap();
        assert_eq!(not_after(&store), 4_733_510_400);
        assert_eq!(source.calls(), vec!["primary"]);

        // The pending fallback never fires.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), vec!["primary"]);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_wins_when_primary_is_slow() {
        let source = Arc::new(
            FakeCertificateSource::default()
                .route("primary", 5_000, Some(EXPIRED_CA))
                .route("fallback", 10, Some(RELAY_CA)),
        );
        let store = RelayCaStore::new(source.clone(), &hosts()).unwrap();
        let started = tokio::time::Instant::now();

        let certificate = store.fetch_certificate().await.unwrap();
        assert_eq!(certificate.not_after(), 4_733_510_400);
        assert!(started.elapsed() >= DEFAULT_FALLBACK_DELAY);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_primary_falls_back() {
        let source = Arc::new(
            FakeCertificateSource::default()
                .route("primary", 10, None)
                .route("fallback", 10, Some(RELAY_CA)),
        );
        let store = RelayCaStore::new(source.clone(), &hosts()).unwrap();

        store.ensure_fresh().await.unwrap();
        assert!(store.client_config().is_some());
        assert_eq!(source.calls(), vec!["primary", "fallback"]);
    }

    #[tokio::test(start_paused = true)]
    async fn both_hosts_failing_is_a_certificate_error() {
        let source = Arc::new(FakeCertificateSource::default());
        let store = RelayCaStore::new(source, &hosts()).unwrap();

        let err = store.ensure_fresh().await.unwrap_err();
        match err {
            RelayError::Certificate(message) => {
                assert!(message.contains("primary"));
                assert!(message.contains("fallback"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.client_config().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_certificate_is_reused_and_expired_is_refetched() {
        let source = Arc::new(FakeCertificateSource::default().route("only", 0, Some(RELAY_CA)));
        let store = RelayCaStore::new(source.clone(), &["only".to_string()]).unwrap();
        let first = store.ensure_fresh().await.unwrap();
        let second = store.ensure_fresh().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls().len(), 1);

        let expired = Arc::new(FakeCertificateSource::default().route("only", 0, Some(EXPIRED_CA)));
        let store = RelayCaStore::new(expired.clone(), &["only".to_string()]).unwrap();
        store.ensure_fresh().await.unwrap();
        store.ensure_fresh().await.unwrap();
        assert_eq!(expired.calls().len(), 2);
    }
}
