// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Metadata preamble prepended to plaintext when a data role is supplied.
//!
//! Layout: `u16 LE length || record`, where the record is a MessagePack map
//! `{ "dr": role, "eo": origin, "et": unix seconds }`. Only the subset of
//! MessagePack needed for this record is implemented.

use super::error::CryptoError;

/// Origin tag identifying this SDK as the encrypting party.
pub const ENCRYPTION_ORIGIN: u64 = 5;

const KEY_ROLE: &str = "dr";
const KEY_ORIGIN: &str = "eo";
const KEY_TIMESTAMP: &str = "et";

/// Metadata bound into an envelope's plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionMetadata {
    pub role: String,
    pub origin: u64,
    pub encrypted_at: u64,
}

impl EncryptionMetadata {
    /// Metadata for `role`, stamped with the current time.
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            origin: ENCRYPTION_ORIGIN,
            encrypted_at: chrono::Utc::now().timestamp().max(0) as u64,
        }
    }

    /// Encode the packed record (without the length prefix).
    pub fn to_record(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.role.len());
        out.push(0x83); // fixmap, 3 entries
        write_str(&mut out, KEY_ROLE);
        write_str(&mut out, &self.role);
        write_str(&mut out, KEY_ORIGIN);
        write_uint(&mut out, self.origin);
        write_str(&mut out, KEY_TIMESTAMP);
        write_uint(&mut out, self.encrypted_at);
        out
    }

    /// Prepend the preamble to `plaintext`.
    pub fn prepend_to(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let record = self.to_record();
        let length = u16::try_from(record.len())
            .map_err(|_| CryptoError::MalformedMetadata("record too long".to_string()))?;

        let mut out = Vec::with_capacity(2 + record.len() + plaintext.len());
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&record);
        out.extend_from_slice(plaintext);
        Ok(out)
    }

    /// Split a decrypted plaintext into its metadata and the original data.
    pub fn split_preamble(bytes: &[u8]) -> Result<(Self, &[u8]), CryptoError> {
        if bytes.len() < 2 {
            return Err(CryptoError::MalformedMetadata("missing length".to_string()));
        }
        let length = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        let record = bytes
            .get(2..2 + length)
            .ok_or_else(|| CryptoError::MalformedMetadata("truncated record".to_string()))?;
        let metadata = Self::from_record(record)?;
        Ok((metadata, &bytes[2 + length..]))
    }

    fn from_record(record: &[u8]) -> Result<Self, CryptoError> {
        let mut reader = Reader { bytes: record, pos: 0 };
        let entries = match reader.byte()? {
            b @ 0x80..=0x8f => (b & 0x0f) as usize,
            other => {
                return Err(CryptoError::MalformedMetadata(format!(
                    "expected map, found 0x{other:02x}"
                )))
            }
        };

        let mut role = None;
        let mut origin = None;
        let mut encrypted_at = None;
        for _ in 0..entries {
            let key = reader.str()?;
            match key.as_str() {
                KEY_ROLE => role = Some(reader.str()?),
                KEY_ORIGIN => origin = Some(reader.uint()?),
                KEY_TIMESTAMP => encrypted_at = Some(reader.uint()?),
                other => {
                    return Err(CryptoError::MalformedMetadata(format!("unknown key {other}")))
                }
            }
        }

        match (role, origin, encrypted_at) {
            (Some(role), Some(origin), Some(encrypted_at)) => Ok(Self {
                role,
                origin,
                encrypted_at,
            }),
            _ => Err(CryptoError::MalformedMetadata("missing field".to_string())),
        }
    }
}

fn write_str(out: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    match bytes.len() {
        len if len < 32 => out.push(0xa0 | len as u8),
        len if len <= u8::MAX as usize => {
            out.push(0xd9);
            out.push(len as u8);
        }
        len if len <= u16::MAX as usize => {
            out.push(0xda);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(0xdb);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        }
    }
    out.extend_from_slice(bytes);
}

fn write_uint(out: &mut Vec<u8>, value: u64) {
    match value {
        v if v < 0x80 => out.push(v as u8),
        v if v <= u8::MAX as u64 => {
            out.push(0xcc);
            out.push(v as u8);
        }
        v if v <= u16::MAX as u64 => {
            out.push(0xcd);
            out.extend_from_slice(&(v as u16).to_be_bytes());
        }
        v if v <= u32::MAX as u64 => {
            out.push(0xce);
            out.extend_from_slice(&(v as u32).to_be_bytes());
        }
        v => {
            out.push(0xcf);
            out.extend_from_slice(&v.to_be_bytes());
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CryptoError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + n)
            .ok_or_else(|| CryptoError::MalformedMetadata("unexpected end of record".to_string()))?;
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, CryptoError> {
        Ok(self.take(1)?[0])
    }

    fn be(&mut self, n: usize) -> Result<u64, CryptoError> {
        Ok(self
            .take(n)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    fn str(&mut self) -> Result<String, CryptoError> {
        let len = match self.byte()? {
            b @ 0xa0..=0xbf => (b & 0x1f) as usize,
            0xd9 => self.be(1)? as usize,
            0xda => self.be(2)? as usize,
            0xdb => self.be(4)? as usize,
            other => {
                return Err(CryptoError::MalformedMetadata(format!(
                    "expected string, found 0x{other:02x}"
                )))
            }
        };
        String::from_utf8(self.take(len)?.to_vec())
            .map_err(|e| CryptoError::MalformedMetadata(e.to_string()))
    }

    fn uint(&mut self) -> Result<u64, CryptoError> {
        match self.byte()? {
            b @ 0x00..=0x7f => Ok(u64::from(b)),
            0xcc => self.be(1),
            0xcd => self.be(2),
            0xce => self.be(4),
            0xcf => self.be(8),
            other => Err(CryptoError::MalformedMetadata(format!(
                "expected unsigned integer, found 0x{other:02x}"
            ))),
        }
    }
}
