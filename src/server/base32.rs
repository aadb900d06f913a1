//! RFC 3548 base32 using the lowercase alphabet and no padding.
//!
//! This is the encoding storage servers use for permutation seeds and key
//! material in announcements.

use crate::error::{BrokerError, Result};

const ENCODE_MAP: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

fn decode_char(v: u8) -> Option<u8> {
    match v {
        b'a'..=b'z' => Some(v - b'a'),
        b'2'..=b'7' => Some(v - b'2' + 26),
        _ => None,
    }
}

/// Encode bytes as lowercase base32 without padding
pub fn b2a(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8 + 4) / 5);

    let mut buffer: u32 = 0;
    let mut bits = 0;
    for byte in data {
        buffer = (buffer << 8) | *byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let code = (buffer >> bits) & 0b11111;
            out.push(ENCODE_MAP[code as usize] as char);
        }
    }

    if bits > 0 {
        let code = (buffer << (5 - bits)) & 0b11111;
        out.push(ENCODE_MAP[code as usize] as char);
    }

    out
}

/// Decode lowercase base32 without padding.
///
/// Trailing bits that do not fill a whole byte must be zero, so every
/// accepted string has exactly one byte sequence it can come from.
pub fn a2b<T: AsRef<[u8]>>(data: T) -> Result<Vec<u8>> {
    let data = data.as_ref();
    let invalid = || BrokerError::InvalidBase32(String::from_utf8_lossy(data).into_owned());

    // Lengths 1, 3 and 6 (mod 8) cannot be produced by the encoder.
    if matches!(data.len() % 8, 1 | 3 | 6) {
        return Err(invalid());
    }

    let mut out = Vec::with_capacity(data.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for c in data {
        let code = decode_char(*c).ok_or_else(invalid)?;
        buffer = (buffer << 5) | code as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }

    if buffer & ((1 << bits) - 1) != 0 {
        return Err(invalid());
    }

    Ok(out)
}
