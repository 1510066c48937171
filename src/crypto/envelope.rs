// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! `ev:` envelope string format.
//!
//! ```text
//! ev:<version>[:<datatype>]:<iv>:<ephemeral public key>:<ciphertext>:$
//! ```
//!
//! Every binary segment (and the version tag) is base64url without padding.
//! The datatype segment is present only for non-string leaves.

use std::fmt;
use std::str::FromStr;

use base64ct::{Base64UrlUnpadded, Encoding};

use super::error::CryptoError;

const PREFIX: &str = "ev";
const TERMINATOR: &str = "$";

/// Original JSON type of an encrypted leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Number,
    Boolean,
    Array,
    Object,
}

impl Datatype {
    /// Tag as written in the envelope.
    pub fn as_str(&self) -> &'static str {
        match self {
            Datatype::Number => "number",
            Datatype::Boolean => "boolean",
            Datatype::Array => "array",
            Datatype::Object => "object",
        }
    }
}

impl FromStr for Datatype {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "number" => Ok(Datatype::Number),
            "boolean" => Ok(Datatype::Boolean),
            "array" => Ok(Datatype::Array),
            "object" => Ok(Datatype::Object),
            other => Err(CryptoError::MalformedEnvelope(format!(
                "unknown datatype {other}"
            ))),
        }
    }
}

/// One encrypted value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Plain version tag, e.g. `NOC`
    pub version: String,
    pub datatype: Option<Datatype>,
    pub iv: Vec<u8>,
    pub ephemeral_public_key: Vec<u8>,
    /// Ciphertext with the authentication tag appended
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Cheap check for strings that look like envelopes.
    pub fn is_envelope(value: &str) -> bool {
        value.starts_with("ev:") && value.ends_with(":$")
    }

    /// Serialise as an `ev:` string.
    pub fn encode(&self) -> String {
        let mut segments = vec![
            PREFIX.to_string(),
            Base64UrlUnpadded::encode_string(self.version.as_bytes()),
        ];
        if let Some(datatype) = self.datatype {
            segments.push(datatype.as_str().to_string());
        }
        segments.push(Base64UrlUnpadded::encode_string(&self.iv));
        segments.push(Base64UrlUnpadded::encode_string(&self.ephemeral_public_key));
        segments.push(Base64UrlUnpadded::encode_string(&self.ciphertext));
        segments.push(TERMINATOR.to_string());
        segments.join(":")
    }

    /// Parse an `ev:` string.
    pub fn parse(value: &str) -> Result<Self, CryptoError> {
        let segments: Vec<&str> = value.split(':').collect();

        let (version, datatype, rest) = match segments.as_slice() {
            [PREFIX, version, iv, key, ciphertext, TERMINATOR] => {
                (*version, None, [*iv, *key, *ciphertext])
            }
            [PREFIX, version, datatype, iv, key, ciphertext, TERMINATOR] => {
                (*version, Some(datatype.parse::<Datatype>()?), [*iv, *key, *ciphertext])
            }
            _ => {
                return Err(CryptoError::MalformedEnvelope(format!(
                    "unexpected segment count {}",
                    segments.len()
                )))
            }
        };

        let version = String::from_utf8(decode_segment(version)?)
            .map_err(|_| CryptoError::MalformedEnvelope("version is not UTF-8".to_string()))?;
        let [iv, key, ciphertext] = rest;

        Ok(Self {
            version,
            datatype,
            iv: decode_segment(iv)?,
            ephemeral_public_key: decode_segment(key)?,
            ciphertext: decode_segment(ciphertext)?,
        })
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, CryptoError> {
    // Tolerate padded input from older encoders.
    Base64UrlUnpadded::decode_vec(segment.trim_end_matches('='))
        .map_err(|e| CryptoError::MalformedEnvelope(format!("invalid base64url: {e}")))
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Envelope {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
