// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encrypted file container.
//!
//! ```text
//! +--------+---------+--------+------------+----+-------+-----------------+-------+
//! | magic  | version | offset | public key | IV | flags | ciphertext+tag  | CRC32 |
//! | 6      | 1       | 2 (LE) | 33         | 12 | 1     | n               | 4 (LE)|
//! +--------+---------+--------+------------+----+-------+-----------------+-------+
//! ```
//!
//! The offset is the distance from the start of the container to the
//! ciphertext. The CRC-32 covers every byte before it.

use super::curves::{EncryptionConfig, IV_LENGTH};
use super::error::CryptoError;

/// `%EVENC`
pub const FILE_MAGIC: [u8; 6] = [0x25, 0x45, 0x56, 0x45, 0x4e, 0x43];

/// Reserved flags byte; always zero at this protocol version.
const FLAGS: u8 = 0x00;

const HEADER_FIXED_LENGTH: usize = FILE_MAGIC.len() + 1 + 2;
const CRC_LENGTH: usize = 4;

const CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                0xedb8_8320 ^ (crc >> 1)
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Reflected CRC-32 (polynomial 0xEDB88320), as used by zip and PNG.
pub fn crc32(bytes: &[u8]) -> u32 {
    let crc = bytes.iter().fold(0xffff_ffffu32, |crc, byte| {
        CRC32_TABLE[((crc ^ u32::from(*byte)) & 0xff) as usize] ^ (crc >> 8)
    });
    crc ^ 0xffff_ffff
}

/// Fields recovered from a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFile {
    pub version: u8,
    pub ephemeral_public_key: Vec<u8>,
    pub iv: Vec<u8>,
    pub flags: u8,
    pub ciphertext: Vec<u8>,
}

/// Assemble a container for `ciphertext` under `config`'s version byte.
pub fn encode_file(
    config: &EncryptionConfig,
    iv: &[u8],
    ephemeral_public_key: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let offset = HEADER_FIXED_LENGTH + ephemeral_public_key.len() + iv.len() + 1;
    let offset_field = u16::try_from(offset)
        .map_err(|_| CryptoError::MalformedFile("header too long".to_string()))?;

    let mut out = Vec::with_capacity(offset + ciphertext.len() + CRC_LENGTH);
    out.extend_from_slice(&FILE_MAGIC);
    out.push(config.file_version);
    out.extend_from_slice(&offset_field.to_le_bytes());
    out.extend_from_slice(ephemeral_public_key);
    out.extend_from_slice(iv);
    out.push(FLAGS);
    out.extend_from_slice(ciphertext);

    let checksum = crc32(&out);
    out.extend_from_slice(&checksum.to_le_bytes());
    Ok(out)
}

/// Parse and integrity-check a container.
pub fn decode_file(bytes: &[u8]) -> Result<DecodedFile, CryptoError> {
    if bytes.len() < HEADER_FIXED_LENGTH + IV_LENGTH + 1 + CRC_LENGTH {
        return Err(CryptoError::MalformedFile("container too short".to_string()));
    }
    if bytes[..FILE_MAGIC.len()] != FILE_MAGIC {
        return Err(CryptoError::MalformedFile("bad magic".to_string()));
    }

    let version = bytes[FILE_MAGIC.len()];
    if EncryptionConfig::from_file_version(version).is_none() {
        return Err(CryptoError::MalformedFile(format!(
            "unsupported version 0x{version:02x}"
        )));
    }

    let (body, trailer) = bytes.split_at(bytes.len() - CRC_LENGTH);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if crc32(body) != expected {
        return Err(CryptoError::MalformedFile("CRC32 mismatch".to_string()));
    }

    let offset = u16::from_le_bytes([bytes[7], bytes[8]]) as usize;
    let key_length = offset
        .checked_sub(HEADER_FIXED_LENGTH + IV_LENGTH + 1)
        .filter(|len| *len > 0)
        .ok_or_else(|| CryptoError::MalformedFile(format!("invalid offset {offset}")))?;
    if offset > body.len() {
        return Err(CryptoError::MalformedFile(format!("invalid offset {offset}")));
    }

    let key_start = HEADER_FIXED_LENGTH;
    let iv_start = key_start + key_length;
    let flags_at = iv_start + IV_LENGTH;

    Ok(DecodedFile {
        version,
        ephemeral_public_key: body[key_start..iv_start].to_vec(),
        iv: body[iv_start..flags_at].to_vec(),
        flags: body[flags_at],
        ciphertext: body[offset..].to_vec(),
    })
}
