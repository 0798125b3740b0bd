//! Elliptic curve primitives on NIST P-256: key objects, point encodings, ECDH,
//! KDF2, HMAC, ECIES and the 1609.2 signature scheme.

use core::fmt::Debug;

use p256::{
    elliptic_curve::{
        point::{AffineCoordinates, DecompressPoint},
        sec1::{FromEncodedPoint, ToEncodedPoint},
        subtle::Choice,
    },
    AffinePoint, EncodedPoint, FieldBytes, NonZeroScalar, SecretKey,
};
use rand::{CryptoRng, RngCore};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::error::ErrorKind;

mod ecies;
mod kdf;
pub mod precompute;
mod sign;

pub use ecies::{
    decrypt, encrypt, EciesCiphertext, ECIES_ENC_LENGTH, ECIES_MAC_KEY_LENGTH, ECIES_TAG_LENGTH,
};
pub use kdf::{
    hmac_sha256, hmac_tag, kdf2_sha256, sha256, verify_hmac_tag, HMAC_TAG_LENGTH, SHA256_LENGTH,
};
pub use sign::{sign, sign_with_nonce, signing_digest, verify, EcdsaSignature, SigningNonce};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("private key is not a scalar in [1, n-1]")]
    InvalidPrivateKey,
    #[error("bytes do not decode to a point on P-256")]
    InvalidPoint,
    #[error("invalid length for {field}: expected {expected}, found {found}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("signature components out of range")]
    MalformedSignature,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("authentication tag mismatch")]
    AuthenticationMismatch,
    #[error("signing nonce produced a degenerate signature")]
    DegenerateNonce,
}

impl CryptoError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::CryptoFailure
    }
}

/// Encoding of `R` (or of a public key) on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointForm {
    XOnly,
    Compressed,
    Uncompressed,
}

/// Specifies a point on NIST P-256 in one of the encodings of IEEE 1609.2.
///
/// The x-coordinate is encoded as an unsigned integer of length 32 octets in network
/// byte order for all variants; the y-coordinate is either omitted, replaced by its
/// parity, or given in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccP256CurvePoint {
    XOnly([u8; 32]),
    CompressedY0([u8; 32]),
    CompressedY1([u8; 32]),
    Uncompressed { x: [u8; 32], y: [u8; 32] },
}

impl EccP256CurvePoint {
    pub fn from_affine(point: &AffinePoint, form: PointForm) -> Result<Self, CryptoError> {
        let encoded = point.to_encoded_point(false);
        let x: [u8; 32] = (*encoded.x().ok_or(CryptoError::InvalidPoint)?).into();
        Ok(match form {
            PointForm::XOnly => Self::XOnly(x),
            PointForm::Compressed if bool::from(point.y_is_odd()) => Self::CompressedY1(x),
            PointForm::Compressed => Self::CompressedY0(x),
            PointForm::Uncompressed => Self::Uncompressed {
                x,
                y: (*encoded.y().ok_or(CryptoError::InvalidPoint)?).into(),
            },
        })
    }

    #[must_use]
    pub fn x(&self) -> &[u8; 32] {
        match self {
            Self::XOnly(x) | Self::CompressedY0(x) | Self::CompressedY1(x) => x,
            Self::Uncompressed { x, .. } => x,
        }
    }

    #[must_use]
    pub fn form(&self) -> PointForm {
        match self {
            Self::XOnly(_) => PointForm::XOnly,
            Self::CompressedY0(_) | Self::CompressedY1(_) => PointForm::Compressed,
            Self::Uncompressed { .. } => PointForm::Uncompressed,
        }
    }

    /// Recovers the affine point. For the x-only form the point with even `y` is returned,
    /// which is only determined up to sign.
    pub fn to_affine(&self) -> Result<AffinePoint, CryptoError> {
        let point = match self {
            Self::XOnly(x) | Self::CompressedY0(x) => {
                AffinePoint::decompress(&FieldBytes::from(*x), Choice::from(0))
            }
            Self::CompressedY1(x) => AffinePoint::decompress(&FieldBytes::from(*x), Choice::from(1)),
            Self::Uncompressed { x, y } => {
                let encoded = EncodedPoint::from_affine_coordinates(
                    &FieldBytes::from(*x),
                    &FieldBytes::from(*y),
                    false,
                );
                AffinePoint::from_encoded_point(&encoded)
            }
        };
        Option::from(point).ok_or(CryptoError::InvalidPoint)
    }

    /// SEC1 style octets: `x`, `02|03 || x` or `04 || x || y`
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::XOnly(x) => x.to_vec(),
            Self::CompressedY0(x) => [vec![0x02], x.to_vec()].concat(),
            Self::CompressedY1(x) => [vec![0x03], x.to_vec()].concat(),
            Self::Uncompressed { x, y } => [vec![0x04], x.to_vec(), y.to_vec()].concat(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let coordinate = |slice: &[u8]| -> [u8; 32] {
            let mut out = [0u8; 32];
            out.copy_from_slice(slice);
            out
        };
        match (bytes.len(), bytes.first()) {
            (32, _) => Ok(Self::XOnly(coordinate(bytes))),
            (33, Some(0x02)) => Ok(Self::CompressedY0(coordinate(&bytes[1..]))),
            (33, Some(0x03)) => Ok(Self::CompressedY1(coordinate(&bytes[1..]))),
            (65, Some(0x04)) => Ok(Self::Uncompressed {
                x: coordinate(&bytes[1..33]),
                y: coordinate(&bytes[33..]),
            }),
            _ => Err(CryptoError::InvalidPoint),
        }
    }
}

/// A P-256 private key. The scalar is zeroized when the key is dropped.
#[derive(Clone)]
pub struct PrivateKey(SecretKey);

impl Debug for PrivateKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl PrivateKey {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(SecretKey::random(rng))
    }

    /// Reconstructs a key object from a raw big-endian scalar
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        SecretKey::from_bytes(&FieldBytes::from(*bytes))
            .map(Self)
            .map_err(|_| CryptoError::InvalidPrivateKey)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: &[u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
            field: "private key",
            expected: 32,
            found: bytes.len(),
        })?;
        Self::from_bytes(bytes)
    }

    #[must_use]
    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.0.to_bytes().into())
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }

    pub(crate) fn scalar(&self) -> NonZeroScalar {
        self.0.to_nonzero_scalar()
    }
}

/// A P-256 public key, always a valid non-identity curve point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

impl PublicKey {
    pub fn from_point(point: &EccP256CurvePoint) -> Result<Self, CryptoError> {
        if let EccP256CurvePoint::XOnly(_) = point {
            return Err(CryptoError::InvalidPoint);
        }
        p256::PublicKey::from_affine(point.to_affine()?)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPoint)
    }

    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        p256::PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidPoint)
    }

    pub fn to_point(&self, form: PointForm) -> Result<EccP256CurvePoint, CryptoError> {
        EccP256CurvePoint::from_affine(self.0.as_affine(), form)
    }

    #[must_use]
    pub fn to_sec1_bytes(&self, compress: bool) -> Vec<u8> {
        self.0.to_encoded_point(compress).as_bytes().to_vec()
    }

    pub(crate) fn as_affine(&self) -> &AffinePoint {
        self.0.as_affine()
    }
}

/// Freshly generated key pair
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private: PrivateKey,
    pub public: PublicKey,
}

impl KeyPair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let private = PrivateKey::generate(rng);
        let public = private.public_key();
        Self { private, public }
    }

    /// Raw scalar and uncompressed public key octets
    #[must_use]
    pub fn to_raw(&self) -> (Zeroizing<[u8; 32]>, Vec<u8>) {
        (self.private.to_bytes(), self.public.to_sec1_bytes(false))
    }
}

/// Elliptic curve Diffie-Hellman, returning the x-coordinate of the shared point
#[must_use]
pub fn ecdh(private: &PrivateKey, public: &PublicKey) -> Zeroizing<[u8; 32]> {
    let shared = p256::ecdh::diffie_hellman(private.scalar(), public.as_affine());
    let mut x = Zeroizing::new([0u8; 32]);
    x.copy_from_slice(shared.raw_secret_bytes());
    x
}

/// ECDH with a peer key given as an encoded point
pub fn ecdh_with_point(
    private: &PrivateKey,
    public: &EccP256CurvePoint,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    Ok(ecdh(private, &PublicKey::from_point(public)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn ecdh_agrees_on_both_sides() {
        let alice = KeyPair::generate(&mut OsRng);
        let bob = KeyPair::generate(&mut OsRng);
        assert_eq!(
            *ecdh(&alice.private, &bob.public),
            *ecdh(&bob.private, &alice.public)
        );
    }

    #[test]
    fn ecdh_rejects_point_off_curve() {
        let alice = KeyPair::generate(&mut OsRng);
        let bogus = EccP256CurvePoint::Uncompressed {
            x: [0x01; 32],
            y: [0x02; 32],
        };
        assert_eq!(
            ecdh_with_point(&alice.private, &bogus).unwrap_err(),
            CryptoError::InvalidPoint
        );
    }

    #[test]
    fn point_forms_decode_to_same_key() {
        let pair = KeyPair::generate(&mut OsRng);
        let compressed = pair.public.to_point(PointForm::Compressed).unwrap();
        let uncompressed = pair.public.to_point(PointForm::Uncompressed).unwrap();
        assert_eq!(compressed.x(), uncompressed.x());
        assert_eq!(PublicKey::from_point(&compressed).unwrap(), pair.public);
        assert_eq!(PublicKey::from_point(&uncompressed).unwrap(), pair.public);
        assert_eq!(
            PublicKey::from_point(&EccP256CurvePoint::XOnly(*compressed.x())).unwrap_err(),
            CryptoError::InvalidPoint
        );
    }

    #[test]
    fn point_octets_are_sec1() {
        let pair = KeyPair::generate(&mut OsRng);
        let compressed = pair.public.to_point(PointForm::Compressed).unwrap();
        let bytes = compressed.to_bytes();
        assert_eq!(bytes, pair.public.to_sec1_bytes(true));
        assert_eq!(EccP256CurvePoint::from_bytes(&bytes).unwrap(), compressed);
        assert_eq!(
            EccP256CurvePoint::from_bytes(&[0x05; 33]).unwrap_err(),
            CryptoError::InvalidPoint
        );
    }

    #[test]
    fn rejects_out_of_range_private_scalars() {
        assert_eq!(
            PrivateKey::from_bytes(&[0u8; 32]).unwrap_err(),
            CryptoError::InvalidPrivateKey
        );
        assert_eq!(
            PrivateKey::from_bytes(&[0xff; 32]).unwrap_err(),
            CryptoError::InvalidPrivateKey
        );
        assert!(matches!(
            PrivateKey::from_slice(&[1u8; 31]).unwrap_err(),
            CryptoError::InvalidLength { expected: 32, found: 31, .. }
        ));
    }

    #[test]
    fn private_key_survives_raw_round_trip() {
        let pair = KeyPair::generate(&mut OsRng);
        let (raw, public) = pair.to_raw();
        let restored = PrivateKey::from_bytes(&raw).unwrap();
        assert_eq!(restored, pair.private);
        assert_eq!(restored.public_key().to_sec1_bytes(false), public);
        assert_eq!(format!("{restored:?}"), "PrivateKey(..)");
    }
}
