//! HMAC-SHA256 challenge/response signatures.
//!
//! The HMAC key is the agent's `secret_hash` (hex SHA-256 of the raw secret), never the raw
//! secret itself. Agents holding the raw secret derive the same key with [`hash_secret`].

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SECRET_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const SECRET_LEN: usize = 48;

/// Hex-encoded `HMAC-SHA256(key, nonce)`.
pub fn sign(key: &str, nonce: &str) -> String {
    match hmac_hex(key.as_bytes(), nonce.as_bytes()) {
        Some(signature) => signature,
        None => String::new(),
    }
}

/// Checks `provided` against the expected signature in constant time.
///
/// Key import or signing failures are reported as `false`.
pub fn verify(secret_hash: &str, nonce: &str, provided: &str) -> bool {
    let Some(expected) = hmac_hex(secret_hash.as_bytes(), nonce.as_bytes()) else {
        return false;
    };
    constant_time_eq(expected.as_bytes(), provided.as_bytes())
}

/// `hex(sha256(raw_secret))`, the stored form of an agent secret.
pub fn hash_secret(raw_secret: &str) -> String {
    hex::encode(Sha256::digest(raw_secret.as_bytes()))
}

/// Client-side helper: sign a nonce starting from the raw agent secret.
pub fn sign_with_agent_secret(raw_secret: &str, nonce: &str) -> String {
    sign(&hash_secret(raw_secret), nonce)
}

pub fn generate_secret() -> String {
    let mut rng = rand::thread_rng();
    (0..SECRET_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..SECRET_CHARSET.len());
            SECRET_CHARSET[idx] as char
        })
        .collect()
}

pub(crate) fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    // Pad both sides so a length mismatch still walks a full-width comparison.
    let width = left.len().max(right.len());
    let mut padded_left = vec![0u8; width];
    let mut padded_right = vec![0xffu8; width];
    padded_left[..left.len()].copy_from_slice(left);
    padded_right[..right.len()].copy_from_slice(right);

    let same_len = (left.len() as u64).ct_eq(&(right.len() as u64));
    let same_bytes = padded_left.ct_eq(&padded_right);
    bool::from(same_len & same_bytes)
}

fn hmac_hex(key: &[u8], payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}
