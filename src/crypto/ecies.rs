use zeroize::Zeroizing;

use super::{
    ecdh,
    kdf::{hmac_tag, kdf2_sha256, verify_hmac_tag, HMAC_TAG_LENGTH},
    CryptoError, PrivateKey, PublicKey,
};

/// Length of the wrapped symmetric (AES-128) key
pub const ECIES_ENC_LENGTH: usize = 16;
/// Length of the HMAC key taken from the KDF stream
pub const ECIES_MAC_KEY_LENGTH: usize = 32;
pub const ECIES_TAG_LENGTH: usize = HMAC_TAG_LENGTH;

/// Output of an ECIES key encapsulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EciesCiphertext {
    /// ephemeral public key `V`
    pub ephemeral: PublicKey,
    /// `C = K XOR K1`
    pub ciphertext: [u8; ECIES_ENC_LENGTH],
    /// `T = HMAC(K2, C)` truncated
    pub tag: [u8; ECIES_TAG_LENGTH],
}

/// Encrypts a symmetric key for `recipient`.
///
/// `kdf_context` is the KDF2 shared information, typically the hash of the
/// recipient's certificate or encryption key.
pub fn encrypt(
    ephemeral: &PrivateKey,
    symmetric_key: &[u8; ECIES_ENC_LENGTH],
    kdf_context: &[u8],
    recipient: &PublicKey,
) -> Result<EciesCiphertext, CryptoError> {
    let shared = ecdh(ephemeral, recipient);
    let stream = kdf2_sha256(
        &shared[..],
        kdf_context,
        ECIES_ENC_LENGTH + ECIES_MAC_KEY_LENGTH,
    );

    let mut ciphertext = [0u8; ECIES_ENC_LENGTH];
    for (out, (key, pad)) in ciphertext
        .iter_mut()
        .zip(symmetric_key.iter().zip(stream.iter()))
    {
        *out = key ^ pad;
    }
    let tag = hmac_tag(
        &stream[ECIES_ENC_LENGTH..ECIES_ENC_LENGTH + ECIES_MAC_KEY_LENGTH],
        &ciphertext,
    )?;

    Ok(EciesCiphertext {
        ephemeral: ephemeral.public_key(),
        ciphertext,
        tag,
    })
}

/// Recovers the symmetric key. The tag is checked before any key byte is produced.
pub fn decrypt(
    ephemeral: &PublicKey,
    ciphertext: &[u8; ECIES_ENC_LENGTH],
    tag: &[u8; ECIES_TAG_LENGTH],
    recipient: &PrivateKey,
    kdf_context: &[u8],
) -> Result<Zeroizing<[u8; ECIES_ENC_LENGTH]>, CryptoError> {
    let shared = ecdh(recipient, ephemeral);
    let stream = kdf2_sha256(
        &shared[..],
        kdf_context,
        ECIES_ENC_LENGTH + ECIES_MAC_KEY_LENGTH,
    );

    verify_hmac_tag(
        &stream[ECIES_ENC_LENGTH..ECIES_ENC_LENGTH + ECIES_MAC_KEY_LENGTH],
        ciphertext,
        tag,
    )?;

    let mut key = Zeroizing::new([0u8; ECIES_ENC_LENGTH]);
    for (out, (c, pad)) in key.iter_mut().zip(ciphertext.iter().zip(stream.iter())) {
        *out = c ^ pad;
    }
    Ok(key)
}
