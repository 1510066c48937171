// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Curve constants and per-curve encryption configuration.
//!
//! The protocol version fixes both the curve and the cipher, so everything
//! here is static. A client selects one [`EncryptionConfig`] from its curve
//! and never changes it afterwards.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use k256::elliptic_curve::sec1::ToEncodedPoint;

use super::error::CryptoError;

/// AES-256 key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// AES-GCM IV length in bytes.
pub const IV_LENGTH: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const AUTH_TAG_LENGTH: usize = 16;

/// Length of a SEC1 compressed point on either supported curve.
pub const COMPRESSED_KEY_LENGTH: usize = 33;

/// Default maximum plaintext size for file encryption (25 MiB).
pub const DEFAULT_MAX_FILE_SIZE: usize = 25 * 1024 * 1024;

/// Ephemeral keys are rotated after this long.
const KEY_ROTATION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Named curves supported by the envelope protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurveName {
    Secp256k1,
    Prime256v1,
}

impl CurveName {
    /// OpenSSL-style curve name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CurveName::Secp256k1 => "secp256k1",
            CurveName::Prime256v1 => "prime256v1",
        }
    }

    /// Explicit X9.62 parameters for this curve.
    pub fn parameters(&self) -> &'static CurveParameters {
        match self {
            CurveName::Secp256k1 => &SECP256K1,
            CurveName::Prime256v1 => &PRIME256V1,
        }
    }

    /// Encryption configuration bound to this curve.
    pub fn encryption_config(&self) -> &'static EncryptionConfig {
        match self {
            CurveName::Secp256k1 => &SECP256K1_CONFIG,
            CurveName::Prime256v1 => &PRIME256V1_CONFIG,
        }
    }

    /// Decompress (or re-encode) a SEC1 point into `0x04 || X || Y`.
    ///
    /// Returns `None` when the bytes are not a point on this curve.
    pub fn decompress(&self, sec1: &[u8]) -> Option<Vec<u8>> {
        match self {
            CurveName::Secp256k1 => k256::PublicKey::from_sec1_bytes(sec1)
                .ok()
                .map(|pk| pk.to_encoded_point(false).as_bytes().to_vec()),
            CurveName::Prime256v1 => p256::PublicKey::from_sec1_bytes(sec1)
                .ok()
                .map(|pk| pk.to_encoded_point(false).as_bytes().to_vec()),
        }
    }

    /// Compress a SEC1 point into its 33-byte form.
    pub fn compress(&self, sec1: &[u8]) -> Option<Vec<u8>> {
        match self {
            CurveName::Secp256k1 => k256::PublicKey::from_sec1_bytes(sec1)
                .ok()
                .map(|pk| pk.to_encoded_point(true).as_bytes().to_vec()),
            CurveName::Prime256v1 => p256::PublicKey::from_sec1_bytes(sec1)
                .ok()
                .map(|pk| pk.to_encoded_point(true).as_bytes().to_vec()),
        }
    }
}

impl fmt::Display for CurveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurveName {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" | "k256" => Ok(CurveName::Secp256k1),
            "prime256v1" | "p256" | "p-256" | "secp256r1" => Ok(CurveName::Prime256v1),
            other => Err(CryptoError::UnsupportedCurve(other.to_string())),
        }
    }
}

/// X9.62 explicit curve parameters, as big-endian hex.
#[derive(Debug)]
pub struct CurveParameters {
    /// Field prime `p`
    pub prime: &'static str,
    /// Coefficient `a` (field element width)
    pub a: &'static str,
    /// Coefficient `b` (field element width)
    pub b: &'static str,
    /// Seed used to generate the curve, if published
    pub seed: Option<&'static str>,
    /// Uncompressed base point `G`
    pub generator: &'static str,
    /// Order `n` of `G`
    pub order: &'static str,
    /// Cofactor `h`
    pub cofactor: &'static str,
}

pub static SECP256K1: CurveParameters = CurveParameters {
    prime: "fffffffffffffffffffffffffffffffffffffffffffffffffffffffefffffc2f",
    a: "0000000000000000000000000000000000000000000000000000000000000000",
    b: "0000000000000000000000000000000000000000000000000000000000000007",
    seed: None,
    generator: "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798\
                483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8",
    order: "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141",
    cofactor: "01",
};

pub static PRIME256V1: CurveParameters = CurveParameters {
    prime: "ffffffff00000001000000000000000000000000ffffffffffffffffffffffff",
    a: "ffffffff00000001000000000000000000000000fffffffffffffffffffffffc",
    b: "5ac635d8aa3a93e7b3ebbd55769886bc651d06b0cc53b0f63bce3c3e27d2604b",
    seed: Some("c49d360886e704936a6678e1139d26b7819f7e90"),
    generator: "046b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c296\
                4fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5",
    order: "ffffffff00000000ffffffffffffffffbce6faada7179e84f3b9cac2fc632551",
    cofactor: "01",
};

/// When the team public key is bound into the AEAD as additional data.
///
/// The two curves disagree here, so the rule is data rather than code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AadPolicy {
    pub without_metadata: bool,
    pub with_metadata: bool,
}

impl AadPolicy {
    /// Whether the team key is bound as AAD.
    pub fn applies(&self, has_metadata: bool) -> bool {
        if has_metadata {
            self.with_metadata
        } else {
            self.without_metadata
        }
    }
}

/// Immutable per-curve encryption settings.
#[derive(Debug)]
pub struct EncryptionConfig {
    pub curve: CurveName,
    pub cipher_algorithm: &'static str,
    pub key_length: usize,
    pub iv_length: usize,
    pub auth_tag_length: usize,
    pub key_rotation_interval: Duration,
    /// Version tag for envelopes without a metadata preamble
    pub version: &'static str,
    /// Version tag for envelopes carrying a metadata preamble
    pub version_with_metadata: &'static str,
    pub aad: AadPolicy,
    /// Version byte written into the encrypted file container
    pub file_version: u8,
    pub max_file_size: usize,
}

impl EncryptionConfig {
    /// Version tag for an envelope, depending on whether metadata is embedded.
    pub fn version_tag(&self, has_metadata: bool) -> &'static str {
        if has_metadata {
            self.version_with_metadata
        } else {
            self.version
        }
    }

    /// Look up the configuration that produced a given version tag.
    pub fn from_version_tag(tag: &str) -> Option<(&'static EncryptionConfig, bool)> {
        [&SECP256K1_CONFIG, &PRIME256V1_CONFIG]
            .into_iter()
            .find_map(|config| {
                if tag == config.version {
                    Some((config, false))
                } else if tag == config.version_with_metadata {
                    Some((config, true))
                } else {
                    None
                }
            })
    }

    /// Look up the configuration for a file container version byte.
    pub fn from_file_version(version: u8) -> Option<&'static EncryptionConfig> {
        [&SECP256K1_CONFIG, &PRIME256V1_CONFIG]
            .into_iter()
            .find(|config| config.file_version == version)
    }
}

static SECP256K1_CONFIG: EncryptionConfig = EncryptionConfig {
    curve: CurveName::Secp256k1,
    cipher_algorithm: "aes-256-gcm",
    key_length: KEY_LENGTH,
    iv_length: IV_LENGTH,
    auth_tag_length: AUTH_TAG_LENGTH,
    key_rotation_interval: KEY_ROTATION_INTERVAL,
    version: "DUB",
    version_with_metadata: "LCY",
    aad: AadPolicy {
        without_metadata: false,
        with_metadata: true,
    },
    file_version: 0x02,
    max_file_size: DEFAULT_MAX_FILE_SIZE,
};

static PRIME256V1_CONFIG: EncryptionConfig = EncryptionConfig {
    curve: CurveName::Prime256v1,
    cipher_algorithm: "aes-256-gcm",
    key_length: KEY_LENGTH,
    iv_length: IV_LENGTH,
    auth_tag_length: AUTH_TAG_LENGTH,
    key_rotation_interval: KEY_ROTATION_INTERVAL,
    version: "NOC",
    version_with_metadata: "BRU",
    aad: AadPolicy {
        without_metadata: true,
        with_metadata: true,
    },
    file_version: 0x03,
    max_file_size: DEFAULT_MAX_FILE_SIZE,
};
