use thiserror::Error;

use crate::{
    cmh::PoolError, cmhf::CmhfError, crypto::CryptoError, decode::DecodeError,
    revocation::RevocationError, transport::TransportError, trust::TrustError,
};

/// Coarse classification of every failure the engine reports.
/// Callers branch on the kind, not on individual error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// no time-valid credential, no issuer
    NotFound,
    /// pool or table at capacity
    Exhausted,
    /// category mismatch, duplicate
    Conflict,
    /// binary parse failures
    Malformed,
    /// key handling, sign/verify, authentication tag mismatch
    CryptoFailure,
    /// network fetch failure or timeout
    Transport,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Revocation(#[from] RevocationError),
    #[error(transparent)]
    Cmhf(#[from] CmhfError),
    #[error(transparent)]
    Trust(#[from] TrustError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Crypto(e) => e.kind(),
            Error::Pool(e) => e.kind(),
            Error::Revocation(e) => e.kind(),
            Error::Cmhf(e) => e.kind(),
            Error::Trust(e) => e.kind(),
            Error::Transport(e) => e.kind(),
            Error::Decode(e) => e.kind(),
            Error::Config(_) => ErrorKind::Malformed,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
