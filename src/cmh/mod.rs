//! Certificate material holders: credentials (private key plus certificate) and
//! the pools that select one of them for signing.

use bytes::Bytes;
use thiserror::Error;

use crate::{
    cert::DecodedCertificate, crypto::PrivateKey, error::ErrorKind, CertificateId, GeographicRegion,
    HashedId10, HashedId3, HashedId8, Psid, ValidityWindow,
};

mod rotating;
mod sequential;
mod store;

pub use rotating::{CredentialSet, RotatingPool, RotatingSelection};
pub use sequential::{SequentialEntry, SequentialPool};
pub use store::CmhStore;

/// Kind of credentials a pool holds.
///
/// Application, Identification and Pseudonym credentials exclude each other;
/// Enrollment credentials never conflict with anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertCategory {
    Application,
    Identification,
    Pseudonym,
    Enrollment,
}

impl CertCategory {
    #[must_use]
    pub fn conflicts_with(self, other: CertCategory) -> bool {
        self != other && self != CertCategory::Enrollment && other != CertCategory::Enrollment
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("no valid credential with permission for {0:?}")]
    NoAvailableCredential(Psid),
    #[error("pool is full ({capacity} entries)")]
    PoolFull { capacity: usize },
    #[error("pool holds {locked:?} credentials, cannot insert {requested:?}")]
    ConflictingCategory {
        locked: CertCategory,
        requested: CertCategory,
    },
    #[error("{0:?} credentials cannot be held by this pool")]
    UnsupportedCategory(CertCategory),
    #[error("credential set has no members")]
    EmptySet,
}

impl PoolError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::NoAvailableCredential(_) => ErrorKind::NotFound,
            PoolError::PoolFull { .. } => ErrorKind::Exhausted,
            PoolError::ConflictingCategory { .. } | PoolError::UnsupportedCategory(_) => {
                ErrorKind::Conflict
            }
            PoolError::EmptySet => ErrorKind::Malformed,
        }
    }
}

/// PSIDs (and optionally the region) a credential may sign for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    pub psids: Vec<Psid>,
    pub region: Option<GeographicRegion>,
}

impl PermissionSet {
    #[must_use]
    pub fn new(psids: Vec<Psid>) -> Self {
        Self {
            psids,
            region: None,
        }
    }

    #[must_use]
    pub fn permits(&self, psid: Psid) -> bool {
        self.psids.contains(&psid)
    }
}

/// Fields shared by every credential loaded from one credential file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope {
    pub issuer: HashedId8,
    pub craca_id: HashedId3,
    pub crl_series: u16,
    pub validity: ValidityWindow,
    pub permissions: PermissionSet,
}

/// A private key together with the certificate it belongs to
#[derive(Debug, Clone)]
pub struct Credential {
    pub certificate: DecodedCertificate,
    pub key: PrivateKey,
    /// Identifier as provisioned, used for revocation matching
    pub id: CertificateId,
}

impl Credential {
    /// Takes the identifier from the certificate itself
    #[must_use]
    pub fn new(certificate: DecodedCertificate, key: PrivateKey) -> Self {
        let id = certificate.header.id.clone();
        Self {
            certificate,
            key,
            id,
        }
    }

    /// Copy handed out to signers, independent of later pool mutation
    #[must_use]
    pub fn to_signing(&self) -> SigningCredential {
        SigningCredential {
            key: self.key.clone(),
            cert_hash: *self.certificate.digest(),
            certificate: self.certificate.raw().clone(),
        }
    }
}

/// Material needed to produce one signature
#[derive(Debug, Clone, PartialEq)]
pub struct SigningCredential {
    pub key: PrivateKey,
    /// SHA-256 of the certificate, bound into every signature
    pub cert_hash: [u8; 32],
    pub certificate: Bytes,
}

impl SigningCredential {
    #[must_use]
    pub fn signer_id(&self) -> HashedId8 {
        HashedId8::from_digest(&self.cert_hash)
    }

    #[must_use]
    pub fn hashed_id10(&self) -> HashedId10 {
        HashedId10::from_digest(&self.cert_hash)
    }
}

/// Stable identity of a pool entry, used for the non-owning "active" reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryId(u64);

#[derive(Debug, Default)]
pub(crate) struct EntryIds(u64);

impl EntryIds {
    pub(crate) fn next(&mut self) -> EntryId {
        self.0 += 1;
        EntryId(self.0)
    }
}

/// Category lock of one pool: set on first insert, cleared when the pool empties
pub(crate) fn check_category(
    locked: Option<CertCategory>,
    requested: CertCategory,
) -> Result<(), PoolError> {
    match locked {
        Some(locked) if locked != requested => Err(PoolError::ConflictingCategory {
            locked,
            requested,
        }),
        _ => Ok(()),
    }
}
