//! Verification and disclosure code generation.
//!
//! Verification codes (ping responses) are UUIDv4 strings. Disclosure
//! access codes are generated from an alphabet without the lookalike
//! characters 0/O/1/l/I, since recipients may have to type them by hand.
//! Only the sha256 hex digest of an access code is ever persisted.

use rand::Rng;
use sha2::{Digest, Sha256};

pub const ACCESS_CODE_LEN: usize = 32;

const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";

/// Fresh single-use code for a ping verification.
pub fn generate_verification_code() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Fresh plaintext disclosure code.
pub fn generate_access_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ACCESS_CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// One-way hash stored in place of the plaintext code.
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}
