//! Trust chain: validated issuer and root certificates keyed by their HashedId8.

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    cert::DecodedCertificate,
    decode::{uint16, DecodeError},
    error::ErrorKind,
    revocation::RevocationTable,
    HashedId8, Time64,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrustError {
    #[error("issuer {0:?} is not in the trust chain")]
    UnknownIssuer(HashedId8),
    #[error("self-signed certificate {0:?} is not a configured root")]
    UntrustedRoot(HashedId8),
    #[error("validity of {0:?} is not within its issuer's validity")]
    InvalidValidity(HashedId8),
    #[error("certificate {0:?} has expired")]
    Expired(HashedId8),
    #[error("certificate {0:?} is revoked")]
    Revoked(HashedId8),
    #[error("malformed chain file: {0}")]
    Malformed(#[from] DecodeError),
}

impl TrustError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrustError::UnknownIssuer(_)
            | TrustError::UntrustedRoot(_)
            | TrustError::Expired(_) => ErrorKind::NotFound,
            TrustError::InvalidValidity(_) | TrustError::Malformed(_) => ErrorKind::Malformed,
            TrustError::Revoked(_) => ErrorKind::Conflict,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustEntry {
    pub certificate: DecodedCertificate,
}

impl TrustEntry {
    #[must_use]
    pub fn id(&self) -> HashedId8 {
        self.certificate.hashed_id8()
    }
}

/// Previously validated certificates used to resolve issuers
#[derive(Debug, Default)]
pub struct TrustChain {
    entries: HashMap<HashedId8, TrustEntry>,
}

impl TrustChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &HashedId8) -> Option<&TrustEntry> {
        self.entries.get(id)
    }

    /// Finds the issuer of `certificate`; self-signed certificates are their own issuer
    pub fn resolve_issuer(
        &self,
        certificate: &DecodedCertificate,
    ) -> Result<&TrustEntry, TrustError> {
        let id = certificate
            .header
            .issuer
            .digest()
            .unwrap_or_else(|| certificate.hashed_id8());
        self.entries.get(&id).ok_or(TrustError::UnknownIssuer(id))
    }

    /// Installs a root certificate from local provisioning
    pub fn add_root(&mut self, certificate: DecodedCertificate, now: Time64) -> Result<bool, TrustError> {
        let id = certificate.hashed_id8();
        if !certificate.is_self_signed() {
            return Err(TrustError::UntrustedRoot(id));
        }
        if certificate.is_expired(now) {
            return Err(TrustError::Expired(id));
        }
        Ok(self.store(certificate))
    }

    /// Validates `certificate` against its issuer and the CRLs, then inserts it.
    /// Returns `Ok(false)` if it is already present.
    pub fn insert(
        &mut self,
        certificate: DecodedCertificate,
        revocation: &RevocationTable,
        now: Time64,
    ) -> Result<bool, TrustError> {
        let id = certificate.hashed_id8();
        if self.entries.contains_key(&id) {
            return Ok(false);
        }
        if certificate.is_self_signed() {
            return Err(TrustError::UntrustedRoot(id));
        }
        if certificate.is_expired(now) {
            return Err(TrustError::Expired(id));
        }
        let issuer = self.resolve_issuer(&certificate)?;
        if !issuer.certificate.validity().encloses(&certificate.validity()) {
            return Err(TrustError::InvalidValidity(id));
        }
        if revocation.check_revoked(&certificate.header.id, Some(&certificate.hashed_id10())) {
            return Err(TrustError::Revoked(id));
        }
        Ok(self.store(certificate))
    }

    fn store(&mut self, certificate: DecodedCertificate) -> bool {
        let id = certificate.hashed_id8();
        if self.entries.contains_key(&id) {
            return false;
        }
        debug!(?id, issuer = ?certificate.header.issuer, "trust chain entry added");
        self.entries.insert(id, TrustEntry { certificate });
        true
    }

    /// Installs every certificate of a chain file, issuers first, or none of them.
    ///
    /// A self-signed first certificate is accepted as root only while the chain is
    /// still empty.
    pub fn install_chain_file(
        &mut self,
        file: &Bytes,
        revocation: &RevocationTable,
        now: Time64,
    ) -> Result<usize, TrustError> {
        let certificates = parse_chain_file(file)?;
        let mut added = Vec::new();
        let bootstrap = self.entries.is_empty();
        for (index, certificate) in certificates.into_iter().enumerate() {
            let id = certificate.hashed_id8();
            let result = if bootstrap && index == 0 && certificate.is_self_signed() {
                self.add_root(certificate, now)
            } else {
                self.insert(certificate, revocation, now)
            };
            match result {
                Ok(true) => added.push(id),
                Ok(false) => {}
                Err(e) => {
                    for id in &added {
                        self.entries.remove(id);
                    }
                    return Err(e);
                }
            }
        }
        info!(added = added.len(), total = self.entries.len(), "chain file installed");
        Ok(added.len())
    }

    /// Drops every entry that expired at or before `now`
    pub fn sweep(&mut self, now: Time64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.certificate.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "expired trust chain entries swept");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Splits a chain file (repeated two byte size followed by a certificate) and
/// decodes every certificate
pub fn parse_chain_file(file: &Bytes) -> Result<Vec<DecodedCertificate>, DecodeError> {
    let mut certificates = Vec::new();
    let mut input: &[u8] = file;
    while !input.is_empty() {
        let (rest, size) = uint16(input)?;
        let size = usize::from(size);
        if rest.len() < size {
            return Err(DecodeError::TooShort {
                needed: Some(size - rest.len()),
            });
        }
        let offset = file.len() - rest.len();
        certificates.push(DecodedCertificate::decode(
            file.slice(offset..offset + size),
        )?);
        input = &rest[size..];
    }
    Ok(certificates)
}
