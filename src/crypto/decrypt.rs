// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Decryption of envelopes and file containers with the team secret key.
//!
//! The SDK itself never holds a team secret; this side exists so the wire
//! formats can be checked end to end and for tooling that sits next to the
//! decryption service.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use serde_json::{Map, Value};

use super::curves::{EncryptionConfig, IV_LENGTH};
use super::ecdh::TeamSecretKey;
use super::envelope::{Datatype, Envelope};
use super::error::CryptoError;
use super::file::decode_file;
use super::metadata::EncryptionMetadata;

/// A decrypted envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Decrypted {
    pub value: Value,
    pub metadata: Option<EncryptionMetadata>,
}

/// Opens envelopes and file containers with a team secret key.
pub struct Decryptor<'a> {
    team_secret: &'a TeamSecretKey,
}

impl<'a> Decryptor<'a> {
    /// Decryptor for values sealed to `team_secret`.
    pub fn new(team_secret: &'a TeamSecretKey) -> Self {
        Self { team_secret }
    }

    /// Decrypt a single `ev:` string back into its original JSON value.
    pub fn decrypt_envelope(&self, encoded: &str) -> Result<Decrypted, CryptoError> {
        let envelope = Envelope::parse(encoded)?;
        let (config, has_metadata) = EncryptionConfig::from_version_tag(&envelope.version)
            .ok_or_else(|| {
                CryptoError::MalformedEnvelope(format!("unknown version {}", envelope.version))
            })?;
        self.check_curve(config)?;

        let plaintext = self.open(
            config,
            &envelope.iv,
            &envelope.ephemeral_public_key,
            &envelope.ciphertext,
            has_metadata,
        )?;

        let (metadata, body) = if has_metadata {
            let (metadata, body) = EncryptionMetadata::split_preamble(&plaintext)?;
            (Some(metadata), body)
        } else {
            (None, plaintext.as_slice())
        };

        let text = std::str::from_utf8(body)
            .map_err(|e| CryptoError::DecryptionFailed(format!("plaintext is not UTF-8: {e}")))?;

        Ok(Decrypted {
            value: restore(text, envelope.datatype)?,
            metadata,
        })
    }

    /// Decrypt every envelope inside `value`, leaving other values untouched.
    pub fn decrypt_value(&self, value: &Value) -> Result<Value, CryptoError> {
        match value {
            Value::String(s) if Envelope::is_envelope(s) => Ok(self.decrypt_envelope(s)?.value),
            Value::Object(map) => map
                .iter()
                .map(|(key, inner)| Ok((key.clone(), self.decrypt_value(inner)?)))
                .collect::<Result<Map<_, _>, CryptoError>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    /// Decrypt an encrypted file container.
    pub fn decrypt_file(&self, bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let file = decode_file(bytes)?;
        let config = EncryptionConfig::from_file_version(file.version).ok_or_else(|| {
            CryptoError::MalformedFile(format!("unsupported version 0x{:02x}", file.version))
        })?;
        self.check_curve(config)?;

        self.open(config, &file.iv, &file.ephemeral_public_key, &file.ciphertext, false)
    }

    fn check_curve(&self, config: &EncryptionConfig) -> Result<(), CryptoError> {
        if config.curve != self.team_secret.curve() {
            return Err(CryptoError::UnsupportedCurve(format!(
                "payload uses {} but team key is {}",
                config.curve,
                self.team_secret.curve()
            )));
        }
        Ok(())
    }

    fn open(
        &self,
        config: &EncryptionConfig,
        iv: &[u8],
        ephemeral_public_key: &[u8],
        ciphertext: &[u8],
        has_metadata: bool,
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce: [u8; IV_LENGTH] = iv.try_into().map_err(|_| {
            CryptoError::DecryptionFailed(format!("IV must be {IV_LENGTH} bytes, got {}", iv.len()))
        })?;

        let key = self.team_secret.derive(ephemeral_public_key)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

        let team_key = self.team_secret.public_key();
        let aad: &[u8] = if config.aad.applies(has_metadata) {
            team_key.as_bytes()
        } else {
            &[]
        };

        cipher
            .decrypt(&Nonce::from(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::DecryptionFailed("authentication failed".to_string()))
    }
}

fn restore(text: &str, datatype: Option<Datatype>) -> Result<Value, CryptoError> {
    match datatype {
        None => Ok(Value::String(text.to_string())),
        Some(Datatype::Boolean) => match text {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(CryptoError::DecryptionFailed(format!("invalid boolean {other}"))),
        },
        Some(datatype) => serde_json::from_str(text).map_err(|e| {
            CryptoError::DecryptionFailed(format!("invalid {} payload: {e}", datatype.as_str()))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::curves::CurveName;
    use crate::crypto::ecdh::EphemeralKeyPair;
    use crate::crypto::encrypt::{encrypt, EncryptOptions, EncryptionContext, Plaintext};
    use serde_json::json;

    fn seal(team: &TeamSecretKey, value: Value) -> String {
        let team_key = team.public_key();
        let (ephemeral_public_key, key) = EphemeralKeyPair::generate(team.curve())
            .derive(&team_key)
            .unwrap();
        let context = EncryptionContext {
            config: team.curve().encryption_config(),
            team_key: &team_key,
            ephemeral_public_key: &ephemeral_public_key,
            key: &key,
            max_file_size: 1024,
        };
        encrypt(&context, Plaintext::Value(value), &EncryptOptions::default())
            .unwrap()
            .as_value()
            .and_then(Value::as_str)
            .unwrap()
            .to_string()
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let team = TeamSecretKey::generate(CurveName::Prime256v1);
        let mut envelope = Envelope::parse(&seal(&team, json!("secret"))).unwrap();
        envelope.ciphertext[0] ^= 0x01;

        let result = Decryptor::new(&team).decrypt_envelope(&envelope.encode());
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn short_iv_is_rejected() {
        let team = TeamSecretKey::generate(CurveName::Secp256k1);
        let mut envelope = Envelope::parse(&seal(&team, json!("secret"))).unwrap();
        envelope.iv.truncate(8);

        match Decryptor::new(&team).decrypt_envelope(&envelope.encode()) {
            Err(CryptoError::DecryptionFailed(message)) => assert!(message.contains("got 8")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn wrong_team_key_cannot_decrypt() {
        let team = TeamSecretKey::generate(CurveName::Secp256k1);
        let other = TeamSecretKey::generate(CurveName::Secp256k1);
        let encoded = seal(&team, json!(12));

        assert!(Decryptor::new(&other).decrypt_envelope(&encoded).is_err());
    }

    #[test]
    fn curve_mismatch_is_reported() {
        let team = TeamSecretKey::generate(CurveName::Prime256v1);
        let other = TeamSecretKey::generate(CurveName::Secp256k1);
        let encoded = seal(&team, json!(false));

        assert!(matches!(
            Decryptor::new(&other).decrypt_envelope(&encoded),
            Err(CryptoError::UnsupportedCurve(_))
        ));
    }

    #[test]
    fn aad_binds_the_team_key_on_prime256v1() {
        // Re-tag a P-256 envelope so the decryptor skips AAD; GCM must reject it.
        let team = TeamSecretKey::generate(CurveName::Prime256v1);
        let envelope = Envelope::parse(&seal(&team, json!("x"))).unwrap();
        let key = team.derive(&envelope.ephemeral_public_key).unwrap();
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).unwrap();
        let iv: [u8; IV_LENGTH] = envelope.iv.as_slice().try_into().unwrap();

        let without_aad = cipher.decrypt(
            &Nonce::from(iv),
            Payload {
                msg: &envelope.ciphertext,
                aad: &[],
            },
        );
        assert!(without_aad.is_err());
    }

    #[test]
    fn plain_values_pass_through() {
        let team = TeamSecretKey::generate(CurveName::Secp256k1);
        let input = json!({"plain": "text", "n": 1, "nested": {"flag": true}});
        assert_eq!(Decryptor::new(&team).decrypt_value(&input).unwrap(), input);
    }
}
