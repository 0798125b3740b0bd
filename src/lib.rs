#![doc = include_str!("../README.md")]
#![cfg(not(doctest))]

use serde::{Deserialize, Serialize};

pub mod cert;
pub mod cmh;
pub mod cmhf;
pub mod config;
pub mod crypto;
mod decode;
mod encode;
mod engine;
mod error;
pub mod lifecycle;
pub mod revocation;
#[cfg(test)]
pub(crate) mod testutil;
pub mod transport;
pub mod trust;

pub use cert::{CertificateType, DecodedCertificate, IssuerIdentifier};
pub use cmh::{
    CertCategory, CmhStore, Credential, CredentialScope, CredentialSet, PermissionSet,
    PoolError, RotatingPool, RotatingSelection, SequentialEntry, SequentialPool,
    SigningCredential,
};
pub use cmhf::{CmhfBundle, CmhfError, CmhfHeader, CmhfKind, CmhfMember, CmhfWriter};
pub use config::EngineConfig;
pub use crypto::{
    EccP256CurvePoint, EcdsaSignature, EciesCiphertext, KeyPair, PointForm, PrivateKey, PublicKey,
};
pub use decode::DecodeError;
pub use encode::{Encode, EncodeError};
pub use engine::{
    RotationStatus, SecurityEngine, SignedMessage, SweepSummary, VerificationOutcome,
};
pub use error::{Error, ErrorKind, Result};
pub use lifecycle::{load_credential_file, LifecycleClient, Refresh};
pub use revocation::{RevocationError, RevocationRecord, RevocationTable};
#[cfg(feature = "fetch")]
pub use transport::HttpsTransport;
pub use transport::{FetchSource, Fetched, Transport, TransportError};
pub use trust::{TrustChain, TrustEntry, TrustError};

/// Number of microseconds in one second
pub const MICROS_PER_SECOND: u64 = 1_000_000;

/// Seconds between the Unix epoch and the IEEE 1609.2 epoch 2004-01-01 00:00:00 UTC
pub const UNIX_TO_1609_EPOCH_SECONDS: u64 = 1_072_915_200;

/// Number of (TAI) seconds since 00:00:00 UTC, 1 January, 2004
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Time32(pub u32);

impl Time32 {
    /// Widens the seconds into the engine's microsecond time base
    #[must_use]
    pub fn to_time64(self) -> Time64 {
        Time64(u64::from(self.0) * MICROS_PER_SECOND)
    }
}

/// Number of (TAI) microseconds since 00:00:00 UTC, 1 January, 2004.
/// All validity comparisons inside the engine are done in this time base.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Time64(pub u64);

impl Time64 {
    #[must_use]
    pub fn from_secs(seconds: u64) -> Self {
        Self(seconds.saturating_mul(MICROS_PER_SECOND))
    }

    /// Converts a Unix timestamp in microseconds. Leap seconds are not accounted for.
    #[must_use]
    pub fn from_unix_micros(micros: u64) -> Self {
        Self(micros.saturating_sub(UNIX_TO_1609_EPOCH_SECONDS * MICROS_PER_SECOND))
    }

    /// Current system time in the 1609.2 time base
    #[must_use]
    pub fn now() -> Self {
        let unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self::from_unix_micros(unix)
    }

    #[must_use]
    pub fn saturating_add_micros(self, micros: u64) -> Self {
        Self(self.0.saturating_add(micros))
    }

    #[must_use]
    pub fn saturating_add_secs(self, seconds: u64) -> Self {
        self.saturating_add_micros(seconds.saturating_mul(MICROS_PER_SECOND))
    }
}

/// Half-open validity window `[start, end)` of a certificate or credential set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub start: Time64,
    pub end: Time64,
}

impl ValidityWindow {
    #[must_use]
    pub fn new(start: Time64, end: Time64) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn contains(&self, now: Time64) -> bool {
        self.start <= now && now < self.end
    }

    /// True if `other` lies completely within this window
    #[must_use]
    pub fn encloses(&self, other: &ValidityWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    #[must_use]
    pub fn is_expired(&self, now: Time64) -> bool {
        self.end <= now
    }
}

/// Provider Service Identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Psid(pub u32);

/// Low-order three bytes of the SHA-256 hash of a CRACA certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HashedId3(pub [u8; 3]);

/// Low-order eight bytes of the SHA-256 hash of a COER-encoded certificate.
/// Identifies issuers in certificates, credential files and the trust chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HashedId8(pub [u8; 8]);

/// Low-order ten bytes of the SHA-256 hash of a COER-encoded certificate.
/// Used as the certificate identifier on hash-based CRLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HashedId10(pub [u8; 10]);

macro_rules! hashed_id {
    ($typ:ident, $len:expr) => {
        impl $typ {
            /// Truncates a full SHA-256 digest to its low-order bytes
            #[must_use]
            pub fn from_digest(digest: &[u8; 32]) -> Self {
                let mut id = [0u8; $len];
                id.copy_from_slice(&digest[32 - $len..]);
                Self(id)
            }

            #[must_use]
            pub fn last_byte(&self) -> u8 {
                self.0[$len - 1]
            }
        }

        impl From<[u8; $len]> for $typ {
            fn from(value: [u8; $len]) -> Self {
                Self(value)
            }
        }
    };
}

hashed_id!(HashedId8, 8);
hashed_id!(HashedId10, 10);

/// Length of a linkage value in bytes
pub const LINKAGE_VALUE_LENGTH: usize = 9;

/// Pseudo-random value that is matched against a linkage ID-based CRL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LinkageValue(pub [u8; LINKAGE_VALUE_LENGTH]);

impl LinkageValue {
    #[must_use]
    pub fn last_byte(&self) -> u8 {
        self.0[LINKAGE_VALUE_LENGTH - 1]
    }
}

/// Group linkage value for certificates that are revoked as a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupLinkageValue {
    pub j_value: [u8; 4],
    pub value: [u8; LINKAGE_VALUE_LENGTH],
}

/// Information that is matched against a linkage ID-based CRL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkageData {
    /// i-period the linkage value was generated for
    pub i_cert: u16,
    pub linkage_value: LinkageValue,
    pub group_linkage_value: Option<GroupLinkageValue>,
}

/// Identifies a certificate holder, or the certificate itself for revocation purposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateId {
    /// used to identify the certificate for revocation purposes in the case of
    /// certificates that appear on linked certificate CRLs
    LinkageData(LinkageData),
    /// identifies the certificate holder in the case of non-anonymous certificates
    Name(String),
    /// identifiers that are not human-readable
    BinaryId(Vec<u8>),
    /// the certificate does not include an identifier
    None,
}

impl CertificateId {
    #[must_use]
    pub fn linkage_data(&self) -> Option<&LinkageData> {
        match self {
            CertificateId::LinkageData(data) => Some(data),
            _ => None,
        }
    }
}

/// WGS84 location in 1/10 micro degree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwoDLocation {
    pub latitude: i32,
    pub longitude: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircularRegion {
    pub center: TwoDLocation,
    /// radius in meters
    pub radius: u16,
}

/// Region in which a credential is valid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeographicRegion {
    Circular(CircularRegion),
    /// UN Stats M49 country codes
    Identified(Vec<u16>),
}
