// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Stateful encryption client.
//!
//! Owns the cached team public key and the current ephemeral key session.
//! The team key is fetched on first use and kept until
//! [`EncryptionClient::refresh_team_key`]. The ephemeral key pair and its
//! derived secret are regenerated once per rotation window, or immediately
//! when the team key changes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use super::curves::{CurveName, EncryptionConfig};
use super::ecdh::{DerivedKey, EphemeralKeyPair, TeamPublicKey};
use super::encrypt::{encrypt, Ciphertext, EncryptOptions, EncryptionContext, Plaintext};
use super::error::CryptoError;
use crate::api::ApiError;
use crate::config::SdkConfig;
use crate::error::SdkError;

/// Remote source of the team public key.
#[async_trait]
pub trait TeamKeySource: Send + Sync {
    /// Fetch the base64 compressed team key for `curve`.
    async fn fetch_team_key(&self, curve: CurveName) -> Result<String, ApiError>;
}

/// Ephemeral key material for one rotation window.
struct KeySession {
    team_key: TeamPublicKey,
    ephemeral_public_key: Vec<u8>,
    key: DerivedKey,
    created_at: Instant,
}

impl KeySession {
    fn is_current(&self, team_key: &TeamPublicKey, config: &EncryptionConfig) -> bool {
        self.team_key == *team_key && self.created_at.elapsed() < config.key_rotation_interval
    }
}

/// Encrypts values for the team that owns the fetched public key.
pub struct EncryptionClient<S> {
    source: S,
    config: &'static EncryptionConfig,
    max_file_size: usize,
    team_key: RwLock<Option<TeamPublicKey>>,
    session: RwLock<Option<Arc<KeySession>>>,
}

impl<S: TeamKeySource> EncryptionClient<S> {
    /// Client for `curve` with that curve's default limits.
    pub fn new(source: S, curve: CurveName) -> Self {
        let config = curve.encryption_config();
        Self {
            source,
            config,
            max_file_size: config.max_file_size,
            team_key: RwLock::new(None),
            session: RwLock::new(None),
        }
    }

    /// Client using the configured curve and maximum file size.
    pub fn from_config(source: S, config: &SdkConfig) -> Self {
        Self::new(source, config.curve).with_max_file_size(config.max_file_size)
    }

    /// Override the maximum binary payload size.
    pub fn with_max_file_size(mut self, max_file_size: usize) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Per-curve constants in use.
    pub fn config(&self) -> &'static EncryptionConfig {
        self.config
    }

    pub fn curve(&self) -> CurveName {
        self.config.curve
    }

    /// Cached team key, fetching it on first use.
    pub async fn team_key(&self) -> Result<TeamPublicKey, SdkError> {
        if let Some(key) = &*self.team_key.read().await {
            return Ok(key.clone());
        }
        // Concurrent first calls may each fetch; the result is the same key.
        self.refresh_team_key().await
    }

    /// Refetch the team key and drop the current ephemeral session.
    pub async fn refresh_team_key(&self) -> Result<TeamPublicKey, SdkError> {
        let encoded = self.source.fetch_team_key(self.curve()).await?;
        let key = TeamPublicKey::from_base64(self.curve(), &encoded)?;

        *self.team_key.write().await = Some(key.clone());
        *self.session.write().await = None;

        info!(curve = %self.curve(), "Fetched team public key");
        Ok(key)
    }

    /// Encrypt `data`; see [`encrypt`] for the dispatch rules.
    pub async fn encrypt(
        &self,
        data: impl Into<Plaintext>,
        options: &EncryptOptions,
    ) -> Result<Ciphertext, SdkError> {
        let data = data.into();
        if matches!(data, Plaintext::Value(Value::Null)) {
            return Err(CryptoError::UndefinedData.into());
        }

        let team_key = self.team_key().await?;
        let session = self.session(&team_key).await?;

        let context = EncryptionContext {
            config: self.config,
            team_key: &team_key,
            ephemeral_public_key: &session.ephemeral_public_key,
            key: &session.key,
            max_file_size: self.max_file_size,
        };
        Ok(encrypt(&context, data, options)?)
    }

    async fn session(&self, team_key: &TeamPublicKey) -> Result<Arc<KeySession>, CryptoError> {
        if let Some(session) = &*self.session.read().await {
            if session.is_current(team_key, self.config) {
                return Ok(session.clone());
            }
        }

        let mut guard = self.session.write().await;
        if let Some(session) = &*guard {
            if session.is_current(team_key, self.config) {
                return Ok(session.clone());
            }
        }

        let (ephemeral_public_key, key) = EphemeralKeyPair::generate(self.curve()).derive(team_key)?;
        let session = Arc::new(KeySession {
            team_key: team_key.clone(),
            ephemeral_public_key,
            key,
            created_at: Instant::now(),
        });
        *guard = Some(session.clone());

        debug!(curve = %self.curve(), "Rotated ephemeral key pair");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::decrypt::Decryptor;
    use crate::crypto::ecdh::TeamSecretKey;
    use crate::crypto::envelope::Envelope;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeKeySource {
        keys: Mutex<Vec<TeamSecretKey>>,
        fetches: AtomicUsize,
        fail: bool,
    }

    impl FakeKeySource {
        fn new(curve: CurveName) -> Self {
            Self {
                keys: Mutex::new(vec![TeamSecretKey::generate(curve)]),
                fetches: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn rotate(&self, curve: CurveName) {
            self.keys.lock().unwrap().push(TeamSecretKey::generate(curve));
        }

        fn decrypt(&self, envelope: &str) -> Value {
            let keys = self.keys.lock().unwrap();
            let current = keys.last().unwrap();
            Decryptor::new(current).decrypt_envelope(envelope).unwrap().value
        }
    }

    #[async_trait]
    impl TeamKeySource for Arc<FakeKeySource> {
        async fn fetch_team_key(&self, _curve: CurveName) -> Result<String, ApiError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ApiError::Unauthorized);
            }
            let keys = self.keys.lock().unwrap();
            Ok(keys.last().unwrap().public_key().to_base64())
        }
    }

    fn envelope_of(ciphertext: &Ciphertext) -> Envelope {
        Envelope::parse(ciphertext.as_value().and_then(Value::as_str).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn team_key_is_fetched_once_and_cached() {
        let source = Arc::new(FakeKeySource::new(CurveName::Prime256v1));
        let client = EncryptionClient::new(source.clone(), CurveName::Prime256v1);

        let first = client.encrypt("a", &EncryptOptions::default()).await.unwrap();
        let second = client.encrypt(json!({"b": 1}), &EncryptOptions::default()).await.unwrap();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(
            envelope_of(&first).ephemeral_public_key,
            envelope_of(&second).ephemeral_public_key
        );
        assert_eq!(
            source.decrypt(first.as_value().unwrap().as_str().unwrap()),
            json!("a")
        );
    }

    #[tokio::test]
    async fn undefined_input_is_rejected_before_fetching() {
        let source = Arc::new(FakeKeySource::new(CurveName::Secp256k1));
        let client = EncryptionClient::new(source.clone(), CurveName::Secp256k1);

        let result = client.encrypt(Value::Null, &EncryptOptions::default()).await;
        assert!(matches!(result, Err(SdkError::Crypto(CryptoError::UndefinedData))));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn key_fetch_failure_propagates() {
        let mut fake = FakeKeySource::new(CurveName::Secp256k1);
        fake.fail = true;
        let client = EncryptionClient::new(Arc::new(fake), CurveName::Secp256k1);

        let result = client.encrypt("x", &EncryptOptions::default()).await;
        assert!(matches!(result, Err(SdkError::Api(ApiError::Unauthorized))));
    }

    #[tokio::test(start_paused = true)]
    async fn ephemeral_key_rotates_after_interval() {
        let source = Arc::new(FakeKeySource::new(CurveName::Secp256k1));
        let client = EncryptionClient::new(source.clone(), CurveName::Secp256k1);

        let before = client.encrypt("x", &EncryptOptions::default()).await.unwrap();
        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        let same = client.encrypt("x", &EncryptOptions::default()).await.unwrap();
        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        let after = client.encrypt("x", &EncryptOptions::default()).await.unwrap();

        assert_eq!(
            envelope_of(&before).ephemeral_public_key,
            envelope_of(&same).ephemeral_public_key
        );
        assert_ne!(
            envelope_of(&before).ephemeral_public_key,
            envelope_of(&after).ephemeral_public_key
        );
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refreshing_team_key_starts_a_new_session() {
        let source = Arc::new(FakeKeySource::new(CurveName::Prime256v1));
        let client = EncryptionClient::new(source.clone(), CurveName::Prime256v1);

        let before = client.encrypt("x", &EncryptOptions::default()).await.unwrap();
        source.rotate(CurveName::Prime256v1);
        client.refresh_team_key().await.unwrap();
        let after = client.encrypt("y", &EncryptOptions::default()).await.unwrap();

        assert_ne!(
            envelope_of(&before).ephemeral_public_key,
            envelope_of(&after).ephemeral_public_key
        );
        assert_eq!(source.decrypt(after.as_value().unwrap().as_str().unwrap()), json!("y"));
    }

    #[tokio::test]
    async fn oversized_file_reports_size_error() {
        let source = Arc::new(FakeKeySource::new(CurveName::Prime256v1));
        let client =
            EncryptionClient::new(source, CurveName::Prime256v1).with_max_file_size(8);

        let result = client.encrypt(vec![0u8; 9], &EncryptOptions::default()).await;
        match result {
            Err(SdkError::Crypto(err)) => assert!(err.is_exceeded_max_file_size()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sdk_config_sets_curve_and_file_limit() {
        let source = Arc::new(FakeKeySource::new(CurveName::Prime256v1));
        let config = SdkConfig::new("key")
            .with_curve(CurveName::Prime256v1)
            .with_max_file_size(4);
        let client = EncryptionClient::from_config(source.clone(), &config);
        assert_eq!(client.curve(), CurveName::Prime256v1);

        let result = client.encrypt(vec![0u8; 5], &EncryptOptions::default()).await;
        assert!(matches!(result, Err(SdkError::Crypto(ref err)) if err.is_exceeded_max_file_size()));

        let sealed = client.encrypt(vec![1u8; 4], &EncryptOptions::default()).await;
        assert!(sealed.is_ok());
    }
}
