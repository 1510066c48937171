// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Minimal DER encoder for X9.62 `SubjectPublicKeyInfo`.
//!
//! Only what the key derivation needs: TLV framing, INTEGER, BIT STRING,
//! OCTET STRING, OBJECT IDENTIFIER and SEQUENCE. The curve is spelled out
//! with explicit parameters rather than a named-curve OID so the encoding
//! matches what the decrypting service hashes.
//!
//! ```text
//! SubjectPublicKeyInfo ::= SEQUENCE {
//!   algorithm SEQUENCE {
//!     id-ecPublicKey,
//!     ECParameters SEQUENCE {
//!       version INTEGER (1),
//!       fieldID SEQUENCE { prime-field, p },
//!       curve SEQUENCE { a OCTET STRING, b OCTET STRING, seed BIT STRING OPTIONAL },
//!       base OCTET STRING,
//!       order INTEGER,
//!       cofactor INTEGER
//!     }
//!   },
//!   subjectPublicKey BIT STRING
//! }
//! ```

use super::curves::CurveName;

const TAG_INTEGER: u8 = 0x02;
const TAG_BIT_STRING: u8 = 0x03;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_OBJECT_IDENTIFIER: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;

/// id-ecPublicKey (1.2.840.10045.2.1)
const OID_EC_PUBLIC_KEY: &[u64] = &[1, 2, 840, 10045, 2, 1];

/// prime-field (1.2.840.10045.1.1)
const OID_PRIME_FIELD: &[u64] = &[1, 2, 840, 10045, 1, 1];

/// Errors raised while building DER structures.
#[derive(Debug, thiserror::Error)]
pub enum DerError {
    #[error("invalid hex input: {0}")]
    InvalidHex(String),

    #[error("point is not on curve {0}")]
    InvalidPoint(CurveName),
}

fn decode_hex(input: &str) -> Result<Vec<u8>, DerError> {
    hex::decode(input).map_err(|e| DerError::InvalidHex(e.to_string()))
}

/// Encode a DER length (short form below 128, long form otherwise).
pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let significant = &bytes[first..];

    let mut out = Vec::with_capacity(1 + significant.len());
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
    out
}

/// Wrap `value` in a type-length-value triple.
pub fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let length = encode_length(value.len());
    let mut out = Vec::with_capacity(1 + length.len() + value.len());
    out.push(tag);
    out.extend_from_slice(&length);
    out.extend_from_slice(value);
    out
}

/// INTEGER from big-endian magnitude bytes.
///
/// A zero byte is prepended when the high bit is set so the value stays
/// positive.
pub fn integer(magnitude: &[u8]) -> Vec<u8> {
    match magnitude.first() {
        Some(first) if first & 0x80 != 0 => {
            let mut padded = Vec::with_capacity(magnitude.len() + 1);
            padded.push(0x00);
            padded.extend_from_slice(magnitude);
            tlv(TAG_INTEGER, &padded)
        }
        _ => tlv(TAG_INTEGER, magnitude),
    }
}

/// BIT STRING with zero unused trailing bits.
pub fn bit_string(bits: &[u8]) -> Vec<u8> {
    let mut value = Vec::with_capacity(bits.len() + 1);
    value.push(0x00);
    value.extend_from_slice(bits);
    tlv(TAG_BIT_STRING, &value)
}

/// OCTET STRING.
pub fn octet_string(bytes: &[u8]) -> Vec<u8> {
    tlv(TAG_OCTET_STRING, bytes)
}

/// OBJECT IDENTIFIER from its arcs.
pub fn object_identifier(arcs: &[u64]) -> Vec<u8> {
    let mut value = Vec::new();
    if arcs.len() >= 2 {
        push_base128(&mut value, arcs[0] * 40 + arcs[1]);
        for arc in &arcs[2..] {
            push_base128(&mut value, *arc);
        }
    }
    tlv(TAG_OBJECT_IDENTIFIER, &value)
}

fn push_base128(out: &mut Vec<u8>, mut arc: u64) {
    let mut groups = vec![(arc & 0x7f) as u8];
    arc >>= 7;
    while arc > 0 {
        groups.push(((arc & 0x7f) as u8) | 0x80);
        arc >>= 7;
    }
    groups.reverse();
    out.extend_from_slice(&groups);
}

/// SEQUENCE of already-encoded elements.
pub fn sequence(elements: &[Vec<u8>]) -> Vec<u8> {
    tlv(TAG_SEQUENCE, &elements.concat())
}

/// Encode a compressed public key (hex) as a `SubjectPublicKeyInfo`.
///
/// The point is decompressed first; odd-length or non-hex input and points
/// off the curve are hard errors.
pub fn encode_compressed_public_key(
    curve: CurveName,
    compressed_hex: &str,
) -> Result<Vec<u8>, DerError> {
    let compressed = decode_hex(compressed_hex)?;
    let uncompressed = curve
        .decompress(&compressed)
        .ok_or(DerError::InvalidPoint(curve))?;
    encode_public_key(curve, &uncompressed)
}

/// Encode an uncompressed (`0x04 || X || Y`) public key as a
/// `SubjectPublicKeyInfo` with explicit curve parameters.
pub fn encode_public_key(curve: CurveName, uncompressed: &[u8]) -> Result<Vec<u8>, DerError> {
    let params = curve.parameters();

    let mut curve_elements = vec![
        octet_string(&decode_hex(params.a)?),
        octet_string(&decode_hex(params.b)?),
    ];
    if let Some(seed) = params.seed {
        curve_elements.push(bit_string(&decode_hex(seed)?));
    }

    let ec_parameters = sequence(&[
        integer(&[0x01]),
        sequence(&[
            object_identifier(OID_PRIME_FIELD),
            integer(&decode_hex(params.prime)?),
        ]),
        sequence(&curve_elements),
        octet_string(&decode_hex(params.generator)?),
        integer(&decode_hex(params.order)?),
        integer(&decode_hex(params.cofactor)?),
    ]);

    Ok(sequence(&[
        sequence(&[object_identifier(OID_EC_PUBLIC_KEY), ec_parameters]),
        bit_string(uncompressed),
    ]))
}
