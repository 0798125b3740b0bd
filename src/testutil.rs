//! Fixtures shared by the unit tests: certificate and credential builders and a
//! scripted transport.

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

use bytes::{BufMut, Bytes, BytesMut};
use rand::{rngs::OsRng, RngCore};

use crate::{
    cert::{CertificateHeader, CertificateType, DecodedCertificate, Duration, HashAlgorithm},
    cmh::{CertCategory, Credential, CredentialScope, CredentialSet, PermissionSet, SequentialEntry},
    cmhf::CmhfMember,
    crypto::PrivateKey,
    encode::Encode,
    transport::{FetchSource, Fetched, Transport, TransportError},
    CertificateId, HashedId3, HashedId8, IssuerIdentifier, Psid, Time32, Time64, ValidityWindow,
    MICROS_PER_SECOND,
};

pub(crate) fn root_header(id: CertificateId, start: Time32, duration: Duration) -> CertificateHeader {
    CertificateHeader {
        cert_type: CertificateType::Explicit,
        issuer: IssuerIdentifier::RsSelf(HashAlgorithm::Sha256),
        tbs_presence: 0x30,
        id,
        craca_id: HashedId3::default(),
        crl_series: 0,
        start,
        duration,
    }
}

pub(crate) fn issued_header(
    issuer: HashedId8,
    id: CertificateId,
    start: Time32,
    duration: Duration,
) -> CertificateHeader {
    CertificateHeader {
        issuer: IssuerIdentifier::Sha256AndDigest(issuer),
        ..root_header(id, start, duration)
    }
}

/// Encodes a certificate whose fields past the validity period are filler
pub(crate) struct CertificateBuilder {
    header: CertificateHeader,
}

impl CertificateBuilder {
    /// appPermissions and verification key indicator of a captured certificate
    const TAIL: [u8; 12] = [
        0xe0, 0x01, 0x07, 0x80, 0x01, 0x24, 0x81, 0x04, 0x03, 0x01, 0xff, 0xfc,
    ];

    pub(crate) fn new(header: CertificateHeader) -> Self {
        Self { header }
    }

    pub(crate) fn build(&self) -> DecodedCertificate {
        let mut raw = BytesMut::new();
        raw.put_u8(0x80);
        self.header.encode(&mut raw).unwrap();
        raw.put_slice(&Self::TAIL);
        // makes every certificate unique
        let mut filler = [0u8; 16];
        OsRng.fill_bytes(&mut filler);
        raw.put_slice(&filler);
        DecodedCertificate::decode(raw.freeze()).unwrap()
    }
}

pub(crate) fn root_certificate(start: Time32, duration: Duration) -> DecodedCertificate {
    CertificateBuilder::new(root_header(CertificateId::None, start, duration)).build()
}

pub(crate) fn issued_certificate(
    issuer: &DecodedCertificate,
    start: Time32,
    duration: Duration,
) -> DecodedCertificate {
    CertificateBuilder::new(issued_header(
        issuer.hashed_id8(),
        CertificateId::None,
        start,
        duration,
    ))
    .build()
}

pub(crate) fn chain_file(certificates: &[&DecodedCertificate]) -> Bytes {
    let mut file = BytesMut::new();
    for certificate in certificates {
        file.put_u16(certificate.raw().len() as u16);
        file.put_slice(certificate.raw());
    }
    file.freeze()
}

fn seconds(time: Time64) -> Time32 {
    Time32((time.0 / MICROS_PER_SECOND) as u32)
}

/// Certificate covering `[start, end)`, rounded to whole seconds
fn pool_certificate(start: Time64, end: Time64) -> DecodedCertificate {
    let duration = (end.0.saturating_sub(start.0) / MICROS_PER_SECOND).min(u64::from(u16::MAX));
    CertificateBuilder::new(issued_header(
        HashedId8([0x11; 8]),
        CertificateId::None,
        seconds(start),
        Duration::Seconds(duration as u16),
    ))
    .build()
}

fn scope(start: Time64, end: Time64, psids: &[Psid]) -> CredentialScope {
    CredentialScope {
        issuer: HashedId8([0x11; 8]),
        craca_id: HashedId3::default(),
        crl_series: 0,
        validity: ValidityWindow::new(start, end),
        permissions: PermissionSet::new(psids.to_vec()),
    }
}

fn credential(start: Time64, end: Time64) -> Credential {
    Credential::new(pool_certificate(start, end), PrivateKey::generate(&mut OsRng))
}

pub(crate) fn sequential_entry(
    category: CertCategory,
    start: Time64,
    end: Time64,
    psids: &[Psid],
) -> SequentialEntry {
    SequentialEntry {
        category,
        scope: scope(start, end, psids),
        credential: credential(start, end),
    }
}

pub(crate) fn credential_set(
    category: CertCategory,
    start: Time64,
    end: Time64,
    members: usize,
    psids: &[Psid],
) -> CredentialSet {
    CredentialSet {
        category,
        scope: scope(start, end, psids),
        i_period: 0,
        members: (0..members).map(|_| credential(start, end)).collect(),
    }
}

/// Credential file member with a one week certificate issued by `issuer`
pub(crate) fn cmhf_member(
    issuer: &DecodedCertificate,
    start: Time32,
    id: CertificateId,
) -> CmhfMember {
    let certificate = CertificateBuilder::new(issued_header(
        issuer.hashed_id8(),
        id.clone(),
        start,
        Duration::Hours(168),
    ))
    .build();
    CmhfMember {
        certificate: certificate.raw().clone(),
        id,
        key: PrivateKey::generate(&mut OsRng),
    }
}

/// Transport answering with scripted responses, in order
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    responses: Mutex<VecDeque<Result<Fetched, TransportError>>>,
    requests: Mutex<Vec<String>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, body: Result<Bytes, TransportError>, filename: Option<&str>) {
        let response = body.map(|body| Fetched {
            body,
            filename: filename.map(str::to_owned),
        });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for MockTransport {
    fn fetch(&self, source: &FetchSource) -> Result<Fetched, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(source.url.clone());
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request("no scripted response".into())))
    }
}
