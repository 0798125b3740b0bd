//! Credential files (CMHF): the compact provisioning format that carries one
//! sequential credential or one rotating credential set together with the
//! private keys.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! issuer HashedId8 | craca id (3) | crl series (2) | start Time32 | end Time32
//! region type (1) | psid count (1) | region | psid count * psid (4)
//! [rotating only] i-period (4) | member count (1)
//! per member: cert size (2) | cert hash (32) | id type (1) | id | private key (32) | cert
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::{
    cert::DecodedCertificate,
    cmh::{
        CertCategory, Credential, CredentialScope, CredentialSet, PermissionSet, SequentialEntry,
    },
    config::EngineConfig,
    crypto::{sha256, CryptoError, PrivateKey},
    decode::{array, complete, fail, short_octets, uint16, uint32, uint8, DecodeError, IResult},
    encode::{put_count, put_size, Encode, EncodeError},
    error::ErrorKind,
    trust::TrustChain,
    CertificateId, CircularRegion, GeographicRegion, GroupLinkageValue, HashedId3, HashedId8,
    LinkageData, LinkageValue, Psid, Time32, TwoDLocation, ValidityWindow,
};

const REGION_NONE: u8 = 0;
const REGION_CIRCULAR: u8 = 1;
const REGION_IDENTIFIED: u8 = 2;

const ID_NONE: u8 = 0;
const ID_LINKAGE_DATA: u8 = 1;
const ID_NAME: u8 = 2;
const ID_BINARY: u8 = 3;

#[derive(Debug, Error)]
pub enum CmhfError {
    #[error("malformed credential file: {0}")]
    Malformed(#[from] DecodeError),
    #[error("issuer {0:?} is not in the trust chain")]
    NoIssuer(HashedId8),
    #[error("validity of {0:?} is not within the issuer's validity")]
    InvalidCertValidTime(HashedId8),
    #[error("certificate is issued by {found:?}, file declares {expected:?}")]
    IssuerMismatch {
        expected: HashedId8,
        found: Option<HashedId8>,
    },
    #[error("declared certificate hash does not match the certificate")]
    CertHashMismatch,
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(#[from] CryptoError),
}

impl CmhfError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            CmhfError::Malformed(_)
            | CmhfError::IssuerMismatch { .. }
            | CmhfError::CertHashMismatch
            | CmhfError::InvalidCertValidTime(_) => ErrorKind::Malformed,
            CmhfError::NoIssuer(_) => ErrorKind::NotFound,
            CmhfError::InvalidPrivateKey(_) => ErrorKind::CryptoFailure,
        }
    }
}

/// What a credential file is expected to hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmhfKind {
    /// one long-lived credential for the sequential (or enrollment) pool
    Sequential(CertCategory),
    /// one credential set for the rotating pool
    Rotating(CertCategory),
}

impl CmhfKind {
    #[must_use]
    pub fn category(&self) -> CertCategory {
        match self {
            CmhfKind::Sequential(category) | CmhfKind::Rotating(category) => *category,
        }
    }

    fn max_members(&self, config: &EngineConfig) -> usize {
        match self {
            CmhfKind::Sequential(_) => 1,
            CmhfKind::Rotating(CertCategory::Pseudonym) => config.max_pseudonym_members,
            CmhfKind::Rotating(_) => config.max_identification_members,
        }
    }
}

/// Decoded content of a credential file, ready for insertion into a pool
#[derive(Debug, Clone)]
pub enum CmhfBundle {
    Sequential(SequentialEntry),
    Rotating(CredentialSet),
}

/// Common header of a credential file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmhfHeader {
    pub issuer: HashedId8,
    pub craca_id: HashedId3,
    pub crl_series: u16,
    pub start: Time32,
    pub end: Time32,
    pub permissions: PermissionSet,
}

impl CmhfHeader {
    #[must_use]
    pub fn scope(&self) -> CredentialScope {
        CredentialScope {
            issuer: self.issuer,
            craca_id: self.craca_id,
            crl_series: self.crl_series,
            validity: ValidityWindow::new(self.start.to_time64(), self.end.to_time64()),
            permissions: self.permissions.clone(),
        }
    }
}

/// One member as laid out in the file, before its key and certificate are checked
struct RawMember<'a> {
    cert_hash: [u8; 32],
    id: CertificateId,
    private_key: Zeroizing<[u8; 32]>,
    certificate: &'a [u8],
}

struct RawFile<'a> {
    header: CmhfHeader,
    i_period: Option<u32>,
    members: Vec<RawMember<'a>>,
}

fn region(input: &[u8], region_type: u8) -> IResult<'_, Option<GeographicRegion>> {
    match region_type {
        REGION_NONE => Ok((input, None)),
        REGION_CIRCULAR => {
            let (input, latitude) = uint32(input)?;
            let (input, longitude) = uint32(input)?;
            let (input, radius) = uint16(input)?;
            Ok((
                input,
                Some(GeographicRegion::Circular(CircularRegion {
                    center: TwoDLocation {
                        latitude: latitude as i32,
                        longitude: longitude as i32,
                    },
                    radius,
                })),
            ))
        }
        REGION_IDENTIFIED => {
            let (mut input, count) = uint8(input)?;
            let mut countries = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                let (rest, country) = uint16(input)?;
                countries.push(country);
                input = rest;
            }
            Ok((input, Some(GeographicRegion::Identified(countries))))
        }
        other => fail(DecodeError::InvalidRegionType(other)),
    }
}

fn header(input: &[u8]) -> IResult<'_, CmhfHeader> {
    let (input, issuer) = array::<8>(input)?;
    let (input, craca_id) = array::<3>(input)?;
    let (input, crl_series) = uint16(input)?;
    let (input, start) = uint32(input)?;
    let (input, end) = uint32(input)?;
    let (input, region_type) = uint8(input)?;
    let (input, psid_count) = uint8(input)?;
    let (mut input, region) = region(input, region_type)?;
    let mut psids = Vec::with_capacity(usize::from(psid_count));
    for _ in 0..psid_count {
        let (rest, psid) = uint32(input)?;
        psids.push(Psid(psid));
        input = rest;
    }
    Ok((
        input,
        CmhfHeader {
            issuer: HashedId8(issuer),
            craca_id: HashedId3(craca_id),
            crl_series,
            start: Time32(start),
            end: Time32(end),
            permissions: PermissionSet { psids, region },
        },
    ))
}

fn member_id(input: &[u8]) -> IResult<'_, CertificateId> {
    let (input, id_type) = uint8(input)?;
    match id_type {
        ID_NONE => Ok((input, CertificateId::None)),
        ID_LINKAGE_DATA => {
            let (input, i_cert) = uint16(input)?;
            let (input, linkage_value) = array(input)?;
            let (input, group_present) = uint8(input)?;
            let (input, group_linkage_value) = if group_present != 0 {
                let (input, j_value) = array::<4>(input)?;
                let (input, value) = array(input)?;
                (input, Some(GroupLinkageValue { j_value, value }))
            } else {
                (input, None)
            };
            Ok((
                input,
                CertificateId::LinkageData(LinkageData {
                    i_cert,
                    linkage_value: LinkageValue(linkage_value),
                    group_linkage_value,
                }),
            ))
        }
        ID_NAME => {
            let (input, name) = short_octets(input)?;
            match core::str::from_utf8(name) {
                Ok(name) => Ok((input, CertificateId::Name(name.to_owned()))),
                Err(e) => fail(DecodeError::InvalidValue {
                    field: "certificate name",
                    reason: e.to_string(),
                }),
            }
        }
        ID_BINARY => {
            let (input, id) = short_octets(input)?;
            Ok((input, CertificateId::BinaryId(id.to_vec())))
        }
        other => fail(DecodeError::InvalidCertIdType(other)),
    }
}

fn member(input: &[u8]) -> IResult<'_, RawMember<'_>> {
    let (input, cert_size) = uint16(input)?;
    let (input, cert_hash) = array::<32>(input)?;
    let (input, id) = member_id(input)?;
    let (input, private_key) = array::<32>(input)?;
    let private_key = Zeroizing::new(private_key);
    let (input, certificate) = nom::bytes::streaming::take(cert_size)(input)?;
    Ok((
        input,
        RawMember {
            cert_hash,
            id,
            private_key,
            certificate,
        },
    ))
}

fn file(kind: CmhfKind, max_members: usize) -> impl FnOnce(&[u8]) -> IResult<'_, RawFile<'_>> {
    move |input| {
        let (input, header) = header(input)?;
        let (mut input, i_period, count) = match kind {
            CmhfKind::Sequential(_) => (input, None, 1),
            CmhfKind::Rotating(_) => {
                let (input, i_period) = uint32(input)?;
                let (input, count) = uint8(input)?;
                let count = usize::from(count);
                if count > max_members {
                    return fail(DecodeError::TooManyCert {
                        count,
                        max: max_members,
                    });
                }
                if count == 0 {
                    return fail(DecodeError::InvalidValue {
                        field: "member count",
                        reason: "a credential set needs at least one member".into(),
                    });
                }
                (input, Some(i_period), count)
            }
        };
        let mut members = Vec::with_capacity(count);
        for _ in 0..count {
            let (rest, member) = member(input)?;
            members.push(member);
            input = rest;
        }
        Ok((
            input,
            RawFile {
                header,
                i_period,
                members,
            },
        ))
    }
}

/// Decodes a credential file and checks it against the trust chain.
///
/// Nothing is returned unless every member decodes, carries a valid private key and
/// is issued by the declared issuer, and the issuer is known with a validity that
/// encloses the file's.
pub fn decode(
    input: &Bytes,
    kind: CmhfKind,
    config: &EngineConfig,
    trust: &TrustChain,
) -> Result<CmhfBundle, CmhfError> {
    let raw = complete(input, file(kind, kind.max_members(config)))?;
    let scope = raw.header.scope();

    let issuer = trust
        .get(&scope.issuer)
        .ok_or(CmhfError::NoIssuer(scope.issuer))?;
    let issuer_validity = issuer.certificate.validity();
    if !issuer_validity.encloses(&scope.validity) {
        return Err(CmhfError::InvalidCertValidTime(scope.issuer));
    }

    let mut members = Vec::with_capacity(raw.members.len());
    for member in raw.members {
        if sha256(member.certificate) != member.cert_hash {
            return Err(CmhfError::CertHashMismatch);
        }
        let certificate = DecodedCertificate::decode(input.slice_ref(member.certificate))?;
        let found = certificate.header.issuer.digest();
        if found != Some(scope.issuer) {
            return Err(CmhfError::IssuerMismatch {
                expected: scope.issuer,
                found,
            });
        }
        if !issuer_validity.encloses(&certificate.validity()) {
            return Err(CmhfError::InvalidCertValidTime(certificate.hashed_id8()));
        }
        let key = PrivateKey::from_bytes(&member.private_key)?;
        members.push(Credential {
            certificate,
            key,
            id: member.id,
        });
    }

    debug!(
        ?kind,
        issuer = ?scope.issuer,
        members = members.len(),
        "credential file decoded"
    );
    match (kind, raw.i_period) {
        (CmhfKind::Rotating(category), Some(i_period)) => Ok(CmhfBundle::Rotating(CredentialSet {
            category,
            scope,
            i_period,
            members,
        })),
        (CmhfKind::Sequential(category), _) => match members.pop() {
            Some(credential) => Ok(CmhfBundle::Sequential(SequentialEntry {
                category,
                scope,
                credential,
            })),
            None => {
                warn!("sequential credential file without member");
                Err(DecodeError::TooShort { needed: None }.into())
            }
        },
        (CmhfKind::Rotating(_), None) => Err(DecodeError::InvalidValue {
            field: "i-period",
            reason: "missing for credential set".into(),
        }
        .into()),
    }
}

/// One member to be written into a credential file
#[derive(Debug, Clone)]
pub struct CmhfMember {
    pub certificate: Bytes,
    pub id: CertificateId,
    pub key: PrivateKey,
}

/// Writes credential files, e.g. for provisioning tools
#[derive(Debug, Clone)]
pub struct CmhfWriter {
    header: CmhfHeader,
    i_period: Option<u32>,
    members: Vec<CmhfMember>,
}

impl CmhfWriter {
    /// Writer for a single sequential credential
    #[must_use]
    pub fn sequential(header: CmhfHeader, member: CmhfMember) -> Self {
        Self {
            header,
            i_period: None,
            members: vec![member],
        }
    }

    /// Writer for a credential set
    #[must_use]
    pub fn rotating(header: CmhfHeader, i_period: u32) -> Self {
        Self {
            header,
            i_period: Some(i_period),
            members: Vec::new(),
        }
    }

    #[must_use]
    pub fn member(mut self, member: CmhfMember) -> Self {
        self.members.push(member);
        self
    }
}

impl Encode for GeographicRegion {
    fn encode(&self, output: &mut BytesMut) -> Result<(), EncodeError> {
        match self {
            GeographicRegion::Circular(region) => {
                output.put_i32(region.center.latitude);
                output.put_i32(region.center.longitude);
                output.put_u16(region.radius);
            }
            GeographicRegion::Identified(countries) => {
                put_count(output, "countries", countries.len())?;
                for country in countries {
                    output.put_u16(*country);
                }
            }
        }
        Ok(())
    }
}

fn encode_member_id(id: &CertificateId, output: &mut BytesMut) -> Result<(), EncodeError> {
    match id {
        CertificateId::None => output.put_u8(ID_NONE),
        CertificateId::LinkageData(data) => {
            output.put_u8(ID_LINKAGE_DATA);
            output.put_u16(data.i_cert);
            output.put_slice(&data.linkage_value.0);
            match &data.group_linkage_value {
                Some(group) => {
                    output.put_u8(1);
                    output.put_slice(&group.j_value);
                    output.put_slice(&group.value);
                }
                None => output.put_u8(0),
            }
        }
        CertificateId::Name(name) => {
            output.put_u8(ID_NAME);
            put_count(output, "certificate name", name.len())?;
            output.put_slice(name.as_bytes());
        }
        CertificateId::BinaryId(id) => {
            output.put_u8(ID_BINARY);
            put_count(output, "binary id", id.len())?;
            output.put_slice(id);
        }
    }
    Ok(())
}

impl Encode for CmhfWriter {
    fn encode(&self, output: &mut BytesMut) -> Result<(), EncodeError> {
        let header = &self.header;
        output.put_slice(&header.issuer.0);
        output.put_slice(&header.craca_id.0);
        output.put_u16(header.crl_series);
        output.put_u32(header.start.0);
        output.put_u32(header.end.0);
        output.put_u8(match header.permissions.region {
            None => REGION_NONE,
            Some(GeographicRegion::Circular(_)) => REGION_CIRCULAR,
            Some(GeographicRegion::Identified(_)) => REGION_IDENTIFIED,
        });
        put_count(output, "psids", header.permissions.psids.len())?;
        if let Some(region) = &header.permissions.region {
            region.encode(output)?;
        }
        for psid in &header.permissions.psids {
            output.put_u32(psid.0);
        }
        match self.i_period {
            Some(i_period) => {
                output.put_u32(i_period);
                put_count(output, "members", self.members.len())?;
            }
            None if self.members.len() != 1 => {
                return Err(EncodeError::Unsupported(format!(
                    "sequential credential file with {} members",
                    self.members.len()
                )))
            }
            None => {}
        }
        for member in &self.members {
            put_size(output, "certificate", member.certificate.len())?;
            output.put_slice(&sha256(&member.certificate));
            encode_member_id(&member.id, output)?;
            output.put_slice(&*member.key.to_bytes());
            output.put_slice(&member.certificate);
        }
        Ok(())
    }
}
