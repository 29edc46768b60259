//! Web Bundle IDs.

use ed25519_dalek::VerifyingKey;

const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Type suffix appended to an Ed25519 public key before encoding
const ED25519_ID_SUFFIX: [u8; 3] = [0x00, 0x01, 0x02];

/// Stable bundle identifier for an Ed25519 signing key: lowercase, unpadded
/// base32 of the public key followed by the Ed25519 type suffix.
pub fn web_bundle_id(public_key: &VerifyingKey) -> String {
    let mut input = Vec::with_capacity(32 + ED25519_ID_SUFFIX.len());
    input.extend_from_slice(public_key.as_bytes());
    input.extend_from_slice(&ED25519_ID_SUFFIX);
    base32_lower(&input)
}

/// RFC 4648 base32, lowercase, no padding
fn base32_lower(input: &[u8]) -> String {
    let mut out = String::with_capacity((input.len() * 8).div_ceil(5));
    let mut buffer: u16 = 0;
    let mut bits = 0;
    for &byte in input {
        buffer = (buffer << 8) | u16::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(char::from(ALPHABET[usize::from((buffer >> bits) & 0x1f)]));
        }
    }
    if bits > 0 {
        out.push(char::from(ALPHABET[usize::from((buffer << (5 - bits)) & 0x1f)]));
    }
    out
}
