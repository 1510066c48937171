// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope encryption.
//!
//! Dispatch by data shape:
//!
//! - binary payloads become an encrypted file container
//! - objects with `preserve_object_shape` are walked field by field and only
//!   their leaves are encrypted
//! - everything else becomes a single `ev:` string
//!
//! Every leaf is sealed with AES-256-GCM under the ECDH-derived key and a
//! fresh random IV.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::Aes256Gcm;
use serde::Serialize;
use serde_json::{Map, Value};

use super::curves::EncryptionConfig;
use super::ecdh::{DerivedKey, TeamPublicKey};
use super::envelope::{Datatype, Envelope};
use super::error::CryptoError;
use super::file::encode_file;
use super::metadata::EncryptionMetadata;

/// Data accepted by [`encrypt`].
#[derive(Debug, Clone, PartialEq)]
pub enum Plaintext {
    Value(Value),
    Bytes(Vec<u8>),
}

impl Plaintext {
    /// Convert any serializable value.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, CryptoError> {
        serde_json::to_value(value)
            .map(Plaintext::Value)
            .map_err(|e| CryptoError::UnsupportedDataType(e.to_string()))
    }
}

impl From<Value> for Plaintext {
    fn from(value: Value) -> Self {
        Plaintext::Value(value)
    }
}

impl From<&str> for Plaintext {
    fn from(value: &str) -> Self {
        Plaintext::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Plaintext {
    fn from(value: String) -> Self {
        Plaintext::Value(Value::String(value))
    }
}

impl From<bool> for Plaintext {
    fn from(value: bool) -> Self {
        Plaintext::Value(Value::Bool(value))
    }
}

impl From<i64> for Plaintext {
    fn from(value: i64) -> Self {
        Plaintext::Value(Value::from(value))
    }
}

impl From<f64> for Plaintext {
    fn from(value: f64) -> Self {
        Plaintext::Value(Value::from(value))
    }
}

impl From<Vec<u8>> for Plaintext {
    fn from(value: Vec<u8>) -> Self {
        Plaintext::Bytes(value)
    }
}

/// Output of [`encrypt`]: an envelope string or shape-preserved JSON, or a
/// file container.
#[derive(Debug, Clone, PartialEq)]
pub enum Ciphertext {
    Value(Value),
    File(Vec<u8>),
}

impl Ciphertext {
    /// The encrypted value, unless this is a file.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Ciphertext::Value(value) => Some(value),
            Ciphertext::File(_) => None,
        }
    }

    /// The `%EVENC` container, if the input was binary.
    pub fn as_file(&self) -> Option<&[u8]> {
        match self {
            Ciphertext::File(bytes) => Some(bytes),
            Ciphertext::Value(_) => None,
        }
    }
}

/// Per-call encryption settings.
#[derive(Debug, Clone, Default)]
pub struct EncryptOptions {
    /// Encrypt object leaves in place instead of the whole object.
    pub preserve_object_shape: bool,
    /// Data role embedded as metadata; switches to the metadata version tag.
    pub role: Option<String>,
}

impl EncryptOptions {
    /// Encrypt object leaves in place instead of the whole object.
    pub fn preserve_object_shape(mut self) -> Self {
        self.preserve_object_shape = true;
        self
    }

    /// Attach a data role to every envelope.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Key material for one rotation window.
pub struct EncryptionContext<'a> {
    pub config: &'static EncryptionConfig,
    pub team_key: &'a TeamPublicKey,
    pub ephemeral_public_key: &'a [u8],
    pub key: &'a DerivedKey,
    pub max_file_size: usize,
}

/// Encrypt `data` under the context's derived key.
pub fn encrypt(
    context: &EncryptionContext<'_>,
    data: Plaintext,
    options: &EncryptOptions,
) -> Result<Ciphertext, CryptoError> {
    let metadata = options.role.as_deref().map(EncryptionMetadata::new);
    let sealer = Sealer::new(context, metadata)?;

    match data {
        Plaintext::Bytes(bytes) => sealer.seal_file(&bytes).map(Ciphertext::File),
        Plaintext::Value(Value::Null) => Err(CryptoError::UndefinedData),
        Plaintext::Value(Value::Object(map)) if options.preserve_object_shape => {
            sealer.seal_object(map).map(|m| Ciphertext::Value(Value::Object(m)))
        }
        Plaintext::Value(value) => sealer
            .seal_leaf(&value)
            .map(|s| Ciphertext::Value(Value::String(s))),
    }
}

struct Sealer<'a> {
    context: &'a EncryptionContext<'a>,
    cipher: Aes256Gcm,
    metadata: Option<EncryptionMetadata>,
}

impl<'a> Sealer<'a> {
    fn new(
        context: &'a EncryptionContext<'a>,
        metadata: Option<EncryptionMetadata>,
    ) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(context.key.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        Ok(Self {
            context,
            cipher,
            metadata,
        })
    }

    /// AEAD-seal `plaintext`, returning `(iv, ciphertext || tag)`.
    fn seal(&self, plaintext: &[u8], with_metadata: bool) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let body = match (&self.metadata, with_metadata) {
            (Some(metadata), true) => metadata.prepend_to(plaintext)?,
            _ => plaintext.to_vec(),
        };
        let has_metadata = with_metadata && self.metadata.is_some();

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let aad: &[u8] = if self.context.config.aad.applies(has_metadata) {
            self.context.team_key.as_bytes()
        } else {
            &[]
        };

        let ciphertext = self
            .cipher
            .encrypt(&nonce, Payload { msg: &body, aad })
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        Ok((nonce.to_vec(), ciphertext))
    }

    fn seal_leaf(&self, value: &Value) -> Result<String, CryptoError> {
        let (plaintext, datatype) = match value {
            Value::String(s) => (s.clone(), None),
            Value::Number(n) => (n.to_string(), Some(Datatype::Number)),
            Value::Bool(b) => (b.to_string(), Some(Datatype::Boolean)),
            Value::Array(_) => (serialize(value)?, Some(Datatype::Array)),
            Value::Object(_) => (serialize(value)?, Some(Datatype::Object)),
            Value::Null => return Err(CryptoError::UndefinedData),
        };

        let has_metadata = self.metadata.is_some();
        let (iv, ciphertext) = self.seal(plaintext.as_bytes(), true)?;

        Ok(Envelope {
            version: self.context.config.version_tag(has_metadata).to_string(),
            datatype,
            iv,
            ephemeral_public_key: self.context.ephemeral_public_key.to_vec(),
            ciphertext,
        }
        .encode())
    }

    fn seal_object(&self, map: Map<String, Value>) -> Result<Map<String, Value>, CryptoError> {
        map.into_iter()
            .map(|(key, value)| {
                let sealed = match value {
                    Value::Null => Value::Null,
                    Value::Object(inner) => Value::Object(self.seal_object(inner)?),
                    leaf => Value::String(self.seal_leaf(&leaf)?),
                };
                Ok((key, sealed))
            })
            .collect()
    }

    fn seal_file(&self, bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let max = self.context.max_file_size;
        if bytes.len() > max {
            return Err(CryptoError::ExceededMaxFileSize {
                size: bytes.len(),
                max,
            });
        }

        // The container has no version-tag slot for metadata.
        let (iv, ciphertext) = self.seal(bytes, false)?;
        encode_file(
            self.context.config,
            &iv,
            self.context.ephemeral_public_key,
            &ciphertext,
        )
    }
}

fn serialize(value: &Value) -> Result<String, CryptoError> {
    serde_json::to_string(value).map_err(|e| CryptoError::UnsupportedDataType(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::curves::CurveName;
    use crate::crypto::decrypt::Decryptor;
    use crate::crypto::ecdh::{EphemeralKeyPair, TeamSecretKey};
    use serde_json::json;

    struct Fixture {
        team_secret: TeamSecretKey,
        team_key: TeamPublicKey,
        ephemeral_public_key: Vec<u8>,
        key: DerivedKey,
        config: &'static EncryptionConfig,
    }

    impl Fixture {
        fn new(curve: CurveName) -> Self {
            let team_secret = TeamSecretKey::generate(curve);
            let team_key = team_secret.public_key();
            let (ephemeral_public_key, key) =
                EphemeralKeyPair::generate(curve).derive(&team_key).unwrap();
            Self {
                team_secret,
                team_key,
                ephemeral_public_key,
                key,
                config: curve.encryption_config(),
            }
        }

        fn context(&self, max_file_size: usize) -> EncryptionContext<'_> {
            EncryptionContext {
                config: self.config,
                team_key: &self.team_key,
                ephemeral_public_key: &self.ephemeral_public_key,
                key: &self.key,
                max_file_size,
            }
        }

        fn encrypt(&self, data: impl Into<Plaintext>, options: &EncryptOptions) -> Ciphertext {
            encrypt(&self.context(1024), data.into(), options).unwrap()
        }

        fn decryptor(&self) -> Decryptor<'_> {
            Decryptor::new(&self.team_secret)
        }
    }

    #[test]
    fn round_trips_every_shape() {
        for curve in [CurveName::Secp256k1, CurveName::Prime256v1] {
            let fixture = Fixture::new(curve);
            let inputs = vec![
                json!(true),
                json!("hello"),
                json!(42),
                json!(3.5),
                json!([1, "two", false]),
                json!({"name": "Ada", "nested": {"age": 36, "tags": ["x"]}}),
            ];

            for input in inputs {
                let encrypted = fixture.encrypt(input.clone(), &EncryptOptions::default());
                let envelope = encrypted.as_value().and_then(Value::as_str).unwrap();
                assert!(Envelope::is_envelope(envelope));

                let decrypted = fixture.decryptor().decrypt_value(encrypted.as_value().unwrap()).unwrap();
                assert_eq!(decrypted, input, "curve {curve}");
            }
        }
    }

    #[test]
    fn datatype_segment_marks_non_strings() {
        let fixture = Fixture::new(CurveName::Prime256v1);
        let string = fixture.encrypt("text", &EncryptOptions::default());
        let number = fixture.encrypt(7i64, &EncryptOptions::default());

        let string_segments = string.as_value().unwrap().as_str().unwrap().split(':').count();
        let number_env = Envelope::parse(number.as_value().unwrap().as_str().unwrap()).unwrap();
        assert_eq!(string_segments, 6);
        assert_eq!(number_env.datatype, Some(Datatype::Number));
    }

    #[test]
    fn preserves_object_shape() {
        let fixture = Fixture::new(CurveName::Secp256k1);
        let input = json!({
            "id": 1,
            "profile": {"email": "a@b.c", "verified": true, "missing": null},
            "list": ["a", "b"]
        });

        let encrypted = fixture.encrypt(input.clone(), &EncryptOptions::default().preserve_object_shape());
        let value = encrypted.as_value().unwrap();

        assert!(Envelope::is_envelope(value["id"].as_str().unwrap()));
        assert!(Envelope::is_envelope(value["profile"]["email"].as_str().unwrap()));
        assert!(Envelope::is_envelope(value["list"].as_str().unwrap()));
        assert!(value["profile"]["missing"].is_null());

        let decrypted = fixture.decryptor().decrypt_value(value).unwrap();
        assert_eq!(decrypted, input);
    }

    #[test]
    fn metadata_switches_version_tag_and_round_trips() {
        for curve in [CurveName::Secp256k1, CurveName::Prime256v1] {
            let fixture = Fixture::new(curve);
            let options = EncryptOptions::default().with_role("billing");
            let encrypted = fixture.encrypt("4242", &options);
            let text = encrypted.as_value().unwrap().as_str().unwrap();

            let envelope = Envelope::parse(text).unwrap();
            assert_eq!(envelope.version, fixture.config.version_with_metadata);

            let decrypted = fixture.decryptor().decrypt_envelope(text).unwrap();
            assert_eq!(decrypted.value, json!("4242"));
            assert_eq!(decrypted.metadata.unwrap().role, "billing");
        }
    }

    #[test]
    fn null_input_is_undefined() {
        let fixture = Fixture::new(CurveName::Prime256v1);
        let result = encrypt(&fixture.context(16), Plaintext::Value(Value::Null), &EncryptOptions::default());
        assert!(matches!(result, Err(CryptoError::UndefinedData)));
    }

    #[test]
    fn binary_round_trip_through_file_container() {
        let fixture = Fixture::new(CurveName::Prime256v1);
        let data: Vec<u8> = (0..=255u8).cycle().take(700).collect();

        let encrypted = fixture.encrypt(data.clone(), &EncryptOptions::default());
        let file = encrypted.as_file().unwrap();
        assert_eq!(&file[..6], b"%EVENC");

        let decrypted = fixture.decryptor().decrypt_file(file).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn max_file_size_boundary() {
        let fixture = Fixture::new(CurveName::Secp256k1);
        let context = fixture.context(64);

        let at_limit = encrypt(&context, Plaintext::Bytes(vec![1; 64]), &EncryptOptions::default());
        assert!(at_limit.is_ok());

        let over = encrypt(&context, Plaintext::Bytes(vec![1; 65]), &EncryptOptions::default());
        match over {
            Err(err) => assert!(err.is_exceeded_max_file_size()),
            Ok(_) => panic!("expected size error"),
        }
    }

    #[test]
    fn fresh_iv_per_leaf() {
        let fixture = Fixture::new(CurveName::Prime256v1);
        let a = fixture.encrypt("same", &EncryptOptions::default());
        let b = fixture.encrypt("same", &EncryptOptions::default());
        assert_ne!(a, b);
    }

    #[derive(Serialize)]
    struct Card {
        number: String,
        cvc: u16,
    }

    #[test]
    fn serializable_structs_encrypt_as_objects() {
        let fixture = Fixture::new(CurveName::Secp256k1);
        let card = Card {
            number: "4242424242424242".to_string(),
            cvc: 123,
        };
        let plaintext = Plaintext::from_serializable(&card).unwrap();
        let encrypted = fixture.encrypt(plaintext, &EncryptOptions::default().preserve_object_shape());

        let decrypted = fixture.decryptor().decrypt_value(encrypted.as_value().unwrap()).unwrap();
        assert_eq!(decrypted, json!({"number": "4242424242424242", "cvc": 123}));
    }
}
