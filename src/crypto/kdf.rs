use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::CryptoError;

type HmacSha256 = Hmac<Sha256>;

pub const SHA256_LENGTH: usize = 32;

/// Length of the authentication tag, a prefix of the full HMAC-SHA256 output
pub const HMAC_TAG_LENGTH: usize = 16;

#[must_use]
pub fn sha256(data: &[u8]) -> [u8; SHA256_LENGTH] {
    Sha256::digest(data).into()
}

/// KDF2 of IEEE 1363a with SHA-256.
///
/// Output is `SHA256(shared || be32(counter) || extra)` for counter = 1, 2, ...
/// concatenated until at least `desired_len` bytes are available. The output is
/// always a whole number of hash blocks; callers truncate.
#[must_use]
pub fn kdf2_sha256(shared: &[u8], extra: &[u8], desired_len: usize) -> Zeroizing<Vec<u8>> {
    let blocks = desired_len.div_ceil(SHA256_LENGTH);
    let mut output = Zeroizing::new(Vec::with_capacity(blocks * SHA256_LENGTH));
    for counter in 1..=blocks {
        let counter = u32::try_from(counter).unwrap_or(u32::MAX);
        let mut hasher = Sha256::new();
        hasher.update(shared);
        hasher.update(counter.to_be_bytes());
        hasher.update(extra);
        output.extend_from_slice(&hasher.finalize());
    }
    output
}

pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<[u8; SHA256_LENGTH], CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::InvalidLength {
        field: "hmac key",
        expected: SHA256_LENGTH,
        found: key.len(),
    })?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Truncated HMAC-SHA256 authentication tag
pub fn hmac_tag(key: &[u8], message: &[u8]) -> Result<[u8; HMAC_TAG_LENGTH], CryptoError> {
    let full = hmac_sha256(key, message)?;
    let mut tag = [0u8; HMAC_TAG_LENGTH];
    tag.copy_from_slice(&full[..HMAC_TAG_LENGTH]);
    Ok(tag)
}

/// Recomputes the tag and compares it in constant time
pub fn verify_hmac_tag(key: &[u8], message: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
    if tag.len() != HMAC_TAG_LENGTH {
        return Err(CryptoError::AuthenticationMismatch);
    }
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::InvalidLength {
        field: "hmac key",
        expected: SHA256_LENGTH,
        found: key.len(),
    })?;
    mac.update(message);
    mac.verify_truncated_left(tag)
        .map_err(|_| CryptoError::AuthenticationMismatch)
}
