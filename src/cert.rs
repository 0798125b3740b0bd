//! Partial COER decoding of IEEE 1609.2 certificates.
//!
//! Certificates are opaque to the engine past their fixed prefix: only the fields
//! needed to resolve issuers, check validity and match revocation entries are
//! decoded. Everything from the optional `region` onwards is kept as raw bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    crypto::sha256,
    decode::{
        array, choice_tag, fail, length_determinant, uint16, uint32, uint8, DecodeError, IResult,
    },
    encode::{put_length_determinant, Encode, EncodeError},
    CertificateId, GroupLinkageValue, HashedId10, HashedId3, HashedId8, LinkageData, LinkageValue,
    Time32, Time64, ValidityWindow, MICROS_PER_SECOND,
};

/// Certificate format version of IEEE 1609.2-2016
pub const CERTIFICATE_VERSION: u8 = 3;

/// Explicit certificates carry a verification key, implicit ones a reconstruction value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateType {
    Explicit = 0,
    Implicit = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256 = 0,
    Sha384 = 1,
}

/// Identifies the issuer of a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuerIdentifier {
    Sha256AndDigest(HashedId8),
    /// self-signed root
    RsSelf(HashAlgorithm),
    Sha384AndDigest(HashedId8),
}

impl IssuerIdentifier {
    #[must_use]
    pub fn digest(&self) -> Option<HashedId8> {
        match self {
            IssuerIdentifier::Sha256AndDigest(id) | IssuerIdentifier::Sha384AndDigest(id) => {
                Some(*id)
            }
            IssuerIdentifier::RsSelf(_) => None,
        }
    }
}

/// Validity duration. The `SixtyHours` and `Years` choices allow long lived roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duration {
    Microseconds(u16),
    Milliseconds(u16),
    Seconds(u16),
    Minutes(u16),
    Hours(u16),
    SixtyHours(u16),
    Years(u16),
}

impl Duration {
    #[must_use]
    pub fn as_micros(&self) -> u64 {
        match *self {
            Duration::Microseconds(v) => u64::from(v),
            Duration::Milliseconds(v) => u64::from(v) * 1_000,
            Duration::Seconds(v) => u64::from(v) * MICROS_PER_SECOND,
            Duration::Minutes(v) => u64::from(v) * 60 * MICROS_PER_SECOND,
            Duration::Hours(v) => u64::from(v) * 3_600 * MICROS_PER_SECOND,
            Duration::SixtyHours(v) => u64::from(v) * 216_000 * MICROS_PER_SECOND,
            // 1 year is 31556952 seconds
            Duration::Years(v) => u64::from(v) * 31_556_952 * MICROS_PER_SECOND,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Duration::Microseconds(_) => 0,
            Duration::Milliseconds(_) => 1,
            Duration::Seconds(_) => 2,
            Duration::Minutes(_) => 3,
            Duration::Hours(_) => 4,
            Duration::SixtyHours(_) => 5,
            Duration::Years(_) => 6,
        }
    }

    fn value(&self) -> u16 {
        match *self {
            Duration::Microseconds(v)
            | Duration::Milliseconds(v)
            | Duration::Seconds(v)
            | Duration::Minutes(v)
            | Duration::Hours(v)
            | Duration::SixtyHours(v)
            | Duration::Years(v) => v,
        }
    }
}

/// Decoded prefix of a certificate up to and including its validity period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateHeader {
    pub cert_type: CertificateType,
    pub issuer: IssuerIdentifier,
    /// Presence bits of the `ToBeSignedCertificate` optional fields
    pub tbs_presence: u8,
    pub id: CertificateId,
    pub craca_id: HashedId3,
    pub crl_series: u16,
    pub start: Time32,
    pub duration: Duration,
}

impl CertificateHeader {
    #[must_use]
    pub fn validity(&self) -> ValidityWindow {
        let start = self.start.to_time64();
        ValidityWindow::new(start, start.saturating_add_micros(self.duration.as_micros()))
    }
}

/// A certificate as stored in pools and the trust chain: the decoded prefix,
/// the raw COER encoding and its SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCertificate {
    pub header: CertificateHeader,
    pub signature_present: bool,
    raw: Bytes,
    digest: [u8; 32],
}

impl DecodedCertificate {
    pub fn decode(raw: Bytes) -> Result<Self, DecodeError> {
        let (_, (signature_present, header)) = certificate_prefix(&raw)?;
        let digest = sha256(&raw);
        Ok(Self {
            header,
            signature_present,
            raw,
            digest,
        })
    }

    #[must_use]
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// SHA-256 over the whole COER encoding
    #[must_use]
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    #[must_use]
    pub fn hashed_id8(&self) -> HashedId8 {
        HashedId8::from_digest(&self.digest)
    }

    #[must_use]
    pub fn hashed_id10(&self) -> HashedId10 {
        HashedId10::from_digest(&self.digest)
    }

    #[must_use]
    pub fn validity(&self) -> ValidityWindow {
        self.header.validity()
    }

    #[must_use]
    pub fn is_self_signed(&self) -> bool {
        matches!(self.header.issuer, IssuerIdentifier::RsSelf(_))
    }

    #[must_use]
    pub fn is_expired(&self, now: Time64) -> bool {
        self.validity().is_expired(now)
    }
}

fn certificate_prefix(input: &[u8]) -> IResult<'_, (bool, CertificateHeader)> {
    let (input, preamble) = uint8(input)?;
    let (input, version) = uint8(input)?;
    if version != CERTIFICATE_VERSION {
        return fail(DecodeError::InvalidValue {
            field: "certificate version",
            reason: format!("expected {CERTIFICATE_VERSION}, found {version}"),
        });
    }
    let (input, cert_type) = certificate_type(input)?;
    let (input, issuer) = issuer_identifier(input)?;
    let (input, tbs_presence) = uint8(input)?;
    let (input, id) = certificate_id(input)?;
    let (input, craca_id) = array::<3>(input)?;
    let (input, crl_series) = uint16(input)?;
    let (input, start) = uint32(input)?;
    let (input, duration) = duration(input)?;
    Ok((
        input,
        (
            preamble & 0x80 != 0,
            CertificateHeader {
                cert_type,
                issuer,
                tbs_presence,
                id,
                craca_id: HashedId3(craca_id),
                crl_series,
                start: Time32(start),
                duration,
            },
        ),
    ))
}

fn certificate_type(input: &[u8]) -> IResult<'_, CertificateType> {
    let (input, value) = uint8(input)?;
    match value {
        0 => Ok((input, CertificateType::Explicit)),
        1 => Ok((input, CertificateType::Implicit)),
        other => fail(DecodeError::InvalidValue {
            field: "certificate type",
            reason: format!("unknown enumeration value {other}"),
        }),
    }
}

fn issuer_identifier(input: &[u8]) -> IResult<'_, IssuerIdentifier> {
    let (input, tag) = choice_tag("issuer")(input)?;
    match tag {
        0 => {
            let (input, id) = array::<8>(input)?;
            Ok((input, IssuerIdentifier::Sha256AndDigest(HashedId8(id))))
        }
        1 => {
            let (input, algorithm) = uint8(input)?;
            match algorithm {
                0 => Ok((input, IssuerIdentifier::RsSelf(HashAlgorithm::Sha256))),
                1 => Ok((input, IssuerIdentifier::RsSelf(HashAlgorithm::Sha384))),
                other => fail(DecodeError::InvalidValue {
                    field: "hash algorithm",
                    reason: format!("unknown enumeration value {other}"),
                }),
            }
        }
        2 => {
            let (input, id) = array::<8>(input)?;
            Ok((input, IssuerIdentifier::Sha384AndDigest(HashedId8(id))))
        }
        other => fail(DecodeError::InvalidChoice {
            field: "issuer",
            tag: 0x80 | other,
        }),
    }
}

pub(crate) fn linkage_data(input: &[u8]) -> IResult<'_, LinkageData> {
    let (input, preamble) = uint8(input)?;
    let (input, i_cert) = uint16(input)?;
    let (input, linkage_value) = array(input)?;
    let (input, group_linkage_value) = if preamble & 0x80 != 0 {
        let (input, j_value) = array::<4>(input)?;
        let (input, value) = array(input)?;
        (input, Some(GroupLinkageValue { j_value, value }))
    } else {
        (input, None)
    };
    Ok((
        input,
        LinkageData {
            i_cert,
            linkage_value: LinkageValue(linkage_value),
            group_linkage_value,
        },
    ))
}

fn certificate_id(input: &[u8]) -> IResult<'_, CertificateId> {
    let (input, tag) = choice_tag("certificate id")(input)?;
    match tag {
        0 => {
            let (input, data) = linkage_data(input)?;
            Ok((input, CertificateId::LinkageData(data)))
        }
        1 => {
            let (input, length) = length_determinant(input)?;
            let (input, name) = nom::bytes::streaming::take(length)(input)?;
            match String::from_utf8(name.to_vec()) {
                Ok(name) => Ok((input, CertificateId::Name(name))),
                Err(e) => fail(DecodeError::InvalidValue {
                    field: "hostname",
                    reason: e.to_string(),
                }),
            }
        }
        2 => {
            let (input, length) = length_determinant(input)?;
            let (input, id) = nom::bytes::streaming::take(length)(input)?;
            Ok((input, CertificateId::BinaryId(id.to_vec())))
        }
        3 => Ok((input, CertificateId::None)),
        other => fail(DecodeError::InvalidCertIdType(other)),
    }
}

fn duration(input: &[u8]) -> IResult<'_, Duration> {
    let (input, tag) = choice_tag("duration")(input)?;
    let (input, value) = uint16(input)?;
    match tag {
        0 => Ok((input, Duration::Microseconds(value))),
        1 => Ok((input, Duration::Milliseconds(value))),
        2 => Ok((input, Duration::Seconds(value))),
        3 => Ok((input, Duration::Minutes(value))),
        4 => Ok((input, Duration::Hours(value))),
        5 => Ok((input, Duration::SixtyHours(value))),
        6 => Ok((input, Duration::Years(value))),
        other => fail(DecodeError::InvalidChoice {
            field: "duration",
            tag: 0x80 | other,
        }),
    }
}

impl Encode for LinkageData {
    fn encode(&self, output: &mut BytesMut) -> Result<(), EncodeError> {
        output.put_u8(if self.group_linkage_value.is_some() { 0x80 } else { 0 });
        output.put_u16(self.i_cert);
        output.put_slice(&self.linkage_value.0);
        if let Some(group) = &self.group_linkage_value {
            output.put_slice(&group.j_value);
            output.put_slice(&group.value);
        }
        Ok(())
    }
}

impl Encode for CertificateId {
    fn encode(&self, output: &mut BytesMut) -> Result<(), EncodeError> {
        match self {
            CertificateId::LinkageData(data) => {
                output.put_u8(0x80);
                data.encode(output)
            }
            CertificateId::Name(name) => {
                output.put_u8(0x81);
                put_length_determinant(output, name.len());
                output.put_slice(name.as_bytes());
                Ok(())
            }
            CertificateId::BinaryId(id) => {
                output.put_u8(0x82);
                put_length_determinant(output, id.len());
                output.put_slice(id);
                Ok(())
            }
            CertificateId::None => {
                output.put_u8(0x83);
                Ok(())
            }
        }
    }
}

impl Encode for IssuerIdentifier {
    fn encode(&self, output: &mut BytesMut) -> Result<(), EncodeError> {
        match self {
            IssuerIdentifier::Sha256AndDigest(id) => {
                output.put_u8(0x80);
                output.put_slice(&id.0);
            }
            IssuerIdentifier::RsSelf(algorithm) => {
                output.put_u8(0x81);
                output.put_u8(*algorithm as u8);
            }
            IssuerIdentifier::Sha384AndDigest(id) => {
                output.put_u8(0x82);
                output.put_slice(&id.0);
            }
        }
        Ok(())
    }
}

impl Encode for CertificateHeader {
    /// Writes the certificate prefix. The caller appends the remaining
    /// `ToBeSignedCertificate` fields and the signature.
    fn encode(&self, output: &mut BytesMut) -> Result<(), EncodeError> {
        output.put_u8(CERTIFICATE_VERSION);
        output.put_u8(self.cert_type as u8);
        self.issuer.encode(output)?;
        output.put_u8(self.tbs_presence);
        self.id.encode(output)?;
        output.put_slice(&self.craca_id.0);
        output.put_u16(self.crl_series);
        output.put_u32(self.start.0);
        output.put_u8(0x80 | self.duration.tag());
        output.put_u16(self.duration.value());
        Ok(())
    }
}
