// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ECDH key agreement and symmetric key derivation.
//!
//! The symmetric key is a single SHA-256 round over
//! `shared_x || 00000001 || DER(ephemeral public key)`, binding the derived
//! key to both the team key and the ephemeral key.

use base64ct::{Base64, Encoding};
use k256::elliptic_curve::rand_core::OsRng;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::curves::{CurveName, KEY_LENGTH};
use super::der;
use super::error::CryptoError;

/// Fixed big-endian counter appended to the raw shared secret.
const KDF_COUNTER: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Long-lived public key of the remote decryption service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamPublicKey {
    curve: CurveName,
    compressed: Vec<u8>,
}

impl TeamPublicKey {
    /// Parse a SEC1 point (compressed or uncompressed) on `curve`.
    pub fn from_sec1_bytes(curve: CurveName, bytes: &[u8]) -> Result<Self, CryptoError> {
        let compressed = curve.compress(bytes).ok_or_else(|| {
            CryptoError::InvalidPublicKey(format!("not a valid {curve} point"))
        })?;
        Ok(Self { curve, compressed })
    }

    /// Parse the base64 form returned by the key endpoint.
    pub fn from_base64(curve: CurveName, encoded: &str) -> Result<Self, CryptoError> {
        let bytes = Base64::decode_vec(encoded.trim())
            .map_err(|e| CryptoError::InvalidPublicKey(format!("invalid base64: {e}")))?;
        Self::from_sec1_bytes(curve, &bytes)
    }

    pub fn curve(&self) -> CurveName {
        self.curve
    }

    /// Compressed SEC1 bytes. Also used as AEAD additional data.
    pub fn as_bytes(&self) -> &[u8] {
        &self.compressed
    }

    /// Compressed key, base64.
    pub fn to_base64(&self) -> String {
        Base64::encode_string(&self.compressed)
    }
}

/// 32-byte symmetric key derived from an ECDH exchange.
pub struct DerivedKey(Zeroizing<[u8; KEY_LENGTH]>);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Private half of an ephemeral key pair. Consumed by [`derive_shared_secret`].
pub enum EphemeralSecretKey {
    Secp256k1(k256::ecdh::EphemeralSecret),
    Prime256v1(p256::ecdh::EphemeralSecret),
}

/// Ephemeral key pair generated per rotation window.
pub struct EphemeralKeyPair {
    secret: EphemeralSecretKey,
    public_key: Vec<u8>,
}

impl EphemeralKeyPair {
    /// Fresh random key pair on `curve`.
    pub fn generate(curve: CurveName) -> Self {
        match curve {
            CurveName::Secp256k1 => {
                let secret = k256::ecdh::EphemeralSecret::random(&mut OsRng);
                let public_key = secret.public_key().to_encoded_point(true).as_bytes().to_vec();
                Self {
                    secret: EphemeralSecretKey::Secp256k1(secret),
                    public_key,
                }
            }
            CurveName::Prime256v1 => {
                let secret = p256::ecdh::EphemeralSecret::random(&mut OsRng);
                let public_key = secret.public_key().to_encoded_point(true).as_bytes().to_vec();
                Self {
                    secret: EphemeralSecretKey::Prime256v1(secret),
                    public_key,
                }
            }
        }
    }

    /// Compressed ephemeral public key, as embedded in envelopes.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Derive the symmetric key against `team_key`, dropping the secret.
    pub fn derive(self, team_key: &TeamPublicKey) -> Result<(Vec<u8>, DerivedKey), CryptoError> {
        let key = derive_shared_secret(self.secret, team_key, &self.public_key)?;
        Ok((self.public_key, key))
    }
}

/// Derive the envelope key from an ephemeral secret and the team public key.
pub fn derive_shared_secret(
    ephemeral_secret: EphemeralSecretKey,
    team_key: &TeamPublicKey,
    ephemeral_public_key: &[u8],
) -> Result<DerivedKey, CryptoError> {
    let raw = match (ephemeral_secret, team_key.curve()) {
        (EphemeralSecretKey::Secp256k1(secret), CurveName::Secp256k1) => {
            let peer = k256::PublicKey::from_sec1_bytes(team_key.as_bytes())
                .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
            let shared = secret.diffie_hellman(&peer);
            Zeroizing::new(shared.raw_secret_bytes().to_vec())
        }
        (EphemeralSecretKey::Prime256v1(secret), CurveName::Prime256v1) => {
            let peer = p256::PublicKey::from_sec1_bytes(team_key.as_bytes())
                .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
            let shared = secret.diffie_hellman(&peer);
            Zeroizing::new(shared.raw_secret_bytes().to_vec())
        }
        (_, curve) => {
            return Err(CryptoError::UnsupportedCurve(format!(
                "ephemeral key does not match team key curve {curve}"
            )))
        }
    };

    kdf(team_key.curve(), &raw, ephemeral_public_key)
}

/// Single-round KDF shared by the encrypting and decrypting sides.
pub(crate) fn kdf(
    curve: CurveName,
    raw_secret: &[u8],
    ephemeral_public_key: &[u8],
) -> Result<DerivedKey, CryptoError> {
    let encoded_key = der::encode_compressed_public_key(curve, &hex::encode(ephemeral_public_key))?;

    let mut hasher = Sha256::new();
    hasher.update(raw_secret);
    hasher.update(KDF_COUNTER);
    hasher.update(&encoded_key);

    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    key.copy_from_slice(&hasher.finalize());
    Ok(DerivedKey(key))
}

/// Private team key, held only by the decrypting side.
pub enum TeamSecretKey {
    Secp256k1(k256::SecretKey),
    Prime256v1(p256::SecretKey),
}

impl TeamSecretKey {
    /// Fresh random team key on `curve`.
    pub fn generate(curve: CurveName) -> Self {
        match curve {
            CurveName::Secp256k1 => TeamSecretKey::Secp256k1(k256::SecretKey::random(&mut OsRng)),
            CurveName::Prime256v1 => {
                TeamSecretKey::Prime256v1(p256::SecretKey::random(&mut OsRng))
            }
        }
    }

    pub fn curve(&self) -> CurveName {
        match self {
            TeamSecretKey::Secp256k1(_) => CurveName::Secp256k1,
            TeamSecretKey::Prime256v1(_) => CurveName::Prime256v1,
        }
    }

    /// The public half, as served by the key endpoint.
    pub fn public_key(&self) -> TeamPublicKey {
        let compressed = match self {
            TeamSecretKey::Secp256k1(sk) => sk.public_key().to_encoded_point(true).as_bytes().to_vec(),
            TeamSecretKey::Prime256v1(sk) => sk.public_key().to_encoded_point(true).as_bytes().to_vec(),
        };
        TeamPublicKey {
            curve: self.curve(),
            compressed,
        }
    }

    /// Recompute the envelope key from the ephemeral public key in an envelope.
    pub fn derive(&self, ephemeral_public_key: &[u8]) -> Result<DerivedKey, CryptoError> {
        let invalid = |e: k256::elliptic_curve::Error| CryptoError::InvalidPublicKey(e.to_string());
        let raw = match self {
            TeamSecretKey::Secp256k1(sk) => {
                let peer = k256::PublicKey::from_sec1_bytes(ephemeral_public_key).map_err(invalid)?;
                let shared = k256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), peer.as_affine());
                Zeroizing::new(shared.raw_secret_bytes().to_vec())
            }
            TeamSecretKey::Prime256v1(sk) => {
                let peer = p256::PublicKey::from_sec1_bytes(ephemeral_public_key).map_err(invalid)?;
                let shared = p256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), peer.as_affine());
                Zeroizing::new(shared.raw_secret_bytes().to_vec())
            }
        };
        kdf(self.curve(), &raw, ephemeral_public_key)
    }
}
