use ecdsa::signature::hazmat::PrehashVerifier;
use p256::{
    ecdsa::VerifyingKey,
    elliptic_curve::{
        group::Group,
        ops::Reduce,
        point::AffineCoordinates,
        subtle::ConstantTimeEq,
        Field, PrimeField,
    },
    AffinePoint, FieldBytes, NistP256, NonZeroScalar, ProjectivePoint, Scalar, U256,
};
use rand::{rngs::OsRng, CryptoRng, RngCore};
use zeroize::Zeroize;

use super::{kdf::sha256, CryptoError, EccP256CurvePoint, PointForm, PrivateKey, PublicKey};

/// A signing nonce `k` together with `R = k*G`.
/// The scalar is wiped when the nonce is dropped, used or not.
pub struct SigningNonce {
    k: NonZeroScalar,
    r_point: AffinePoint,
}

impl SigningNonce {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let k = NonZeroScalar::random(rng);
        let r_point = (ProjectivePoint::GENERATOR * *k).to_affine();
        Self { k, r_point }
    }
}

impl Drop for SigningNonce {
    fn drop(&mut self) {
        self.k.zeroize();
    }
}

impl core::fmt::Debug for SigningNonce {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SigningNonce(..)")
    }
}

/// 1609.2 ECDSA signature with `R` carried in one of three point encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcdsaSignature {
    pub r: EccP256CurvePoint,
    pub s: [u8; 32],
}

impl EcdsaSignature {
    /// The plain `(r, s)` pair as used by generic ECDSA implementations
    pub fn to_scalars(&self) -> Result<([u8; 32], [u8; 32]), CryptoError> {
        let r = reduce(&FieldBytes::from(*self.r.x()));
        if bool::from(r.is_zero()) {
            return Err(CryptoError::MalformedSignature);
        }
        Ok((r.to_repr().into(), self.s))
    }
}

/// Digest that is signed: `SHA256(SHA256(message) || signer_hash)`, where
/// `signer_hash` is the SHA-256 of the signer certificate, or of the empty
/// string for self-signed data.
#[must_use]
pub fn signing_digest(message: &[u8], signer_hash: &[u8; 32]) -> [u8; 32] {
    sha256(&[sha256(message).to_vec(), signer_hash.to_vec()].concat())
}

fn reduce(bytes: &FieldBytes) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(bytes)
}

/// Signs with a fresh random nonce
pub fn sign(
    form: PointForm,
    message: &[u8],
    signer_hash: &[u8; 32],
    key: &PrivateKey,
) -> Result<EcdsaSignature, CryptoError> {
    loop {
        match sign_with_nonce(
            form,
            message,
            signer_hash,
            key,
            SigningNonce::generate(&mut OsRng),
        ) {
            Err(CryptoError::DegenerateNonce) => continue,
            result => return result,
        }
    }
}

/// Signs with a caller supplied nonce, e.g. one taken from the precompute cache.
/// The nonce is consumed and wiped.
pub fn sign_with_nonce(
    form: PointForm,
    message: &[u8],
    signer_hash: &[u8; 32],
    key: &PrivateKey,
    nonce: SigningNonce,
) -> Result<EcdsaSignature, CryptoError> {
    let digest = signing_digest(message, signer_hash);
    let e = reduce(&FieldBytes::from(digest));
    let r = reduce(&nonce.r_point.x());
    if bool::from(r.is_zero()) {
        return Err(CryptoError::DegenerateNonce);
    }
    let d = key.scalar();
    let k_inv =
        Option::<Scalar>::from(Field::invert(&*nonce.k)).ok_or(CryptoError::DegenerateNonce)?;
    let s = k_inv * (e + r * *d);
    if bool::from(s.is_zero()) {
        return Err(CryptoError::DegenerateNonce);
    }
    Ok(EcdsaSignature {
        r: EccP256CurvePoint::from_affine(&nonce.r_point, form)?,
        s: s.to_repr().into(),
    })
}

/// Verifies `signature` over `message` and `signer_hash`.
///
/// When `R` is given as a full point the verifier checks `u1*G + u2*Q == R`;
/// for the x-only form only the x-coordinate can be compared.
pub fn verify(
    message: &[u8],
    signer_hash: &[u8; 32],
    key: &PublicKey,
    signature: &EcdsaSignature,
) -> Result<(), CryptoError> {
    let digest = signing_digest(message, signer_hash);
    let s = Option::<Scalar>::from(Scalar::from_repr(FieldBytes::from(signature.s)))
        .filter(|s| !bool::from(s.is_zero()))
        .ok_or(CryptoError::MalformedSignature)?;

    let r_point = match signature.r {
        EccP256CurvePoint::XOnly(_) => {
            let (r, s) = signature.to_scalars()?;
            let generic = ecdsa::Signature::<NistP256>::from_scalars(r, s)
                .map_err(|_| CryptoError::MalformedSignature)?;
            let verifying_key =
                VerifyingKey::from_affine(*key.as_affine()).map_err(|_| CryptoError::InvalidPoint)?;
            return verifying_key
                .verify_prehash(&digest, &generic)
                .map_err(|_| CryptoError::InvalidSignature);
        }
        point => point.to_affine()?,
    };

    let e = reduce(&FieldBytes::from(digest));
    let r = reduce(&r_point.x());
    if bool::from(r.is_zero()) {
        return Err(CryptoError::MalformedSignature);
    }
    let w = Option::<Scalar>::from(Field::invert(&s)).ok_or(CryptoError::MalformedSignature)?;
    let candidate = ProjectivePoint::GENERATOR * (e * w)
        + ProjectivePoint::from(*key.as_affine()) * (r * w);
    if bool::from(candidate.is_identity()) {
        return Err(CryptoError::InvalidSignature);
    }
    if bool::from(candidate.ct_eq(&ProjectivePoint::from(r_point))) {
        Ok(())
    } else {
        Err(CryptoError::InvalidSignature)
    }
}
