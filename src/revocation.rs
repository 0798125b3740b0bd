//! Revocation tables for hash-based and linkage ID-based CRLs.
//!
//! Both tables spread their records over 256 buckets keyed by the last byte of the
//! hash or linkage value, so a lookup scans a single bucket only.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    decode::{array, fail, uint16, uint8, DecodeError, IResult},
    error::ErrorKind,
    transport::{FetchSource, Transport, TransportError},
    CertificateId, HashedId10, LinkageValue,
};

const BUCKETS: usize = 256;

const HASH_RECORD_TAG: u8 = 0x00;
const LINKAGE_RECORD_TAG: u8 = 0x01;

/// One revoked certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevocationRecord {
    Hash(HashedId10),
    Linkage {
        i_period: u16,
        value: LinkageValue,
    },
}

#[derive(Debug, Error)]
pub enum RevocationError {
    #[error("revocation bucket {bucket:#04x} is full ({capacity} records)")]
    BucketFull { bucket: u8, capacity: usize },
    #[error("malformed revocation blob: {0}")]
    Malformed(#[from] DecodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RevocationError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            RevocationError::BucketFull { .. } => ErrorKind::Exhausted,
            RevocationError::Malformed(_) => ErrorKind::Malformed,
            RevocationError::Transport(_) => ErrorKind::Transport,
        }
    }
}

#[derive(Debug)]
struct Buckets<T> {
    buckets: Vec<Vec<T>>,
}

impl<T: PartialEq> Buckets<T> {
    fn new() -> Self {
        Self {
            buckets: (0..BUCKETS).map(|_| Vec::new()).collect(),
        }
    }

    fn contains(&self, key: u8, value: &T) -> bool {
        self.buckets[usize::from(key)].contains(value)
    }

    /// Returns `Ok(false)` for records that are already present
    fn insert(&mut self, key: u8, value: T, capacity: usize) -> Result<bool, RevocationError> {
        let bucket = &mut self.buckets[usize::from(key)];
        if bucket.contains(&value) {
            return Ok(false);
        }
        if bucket.len() >= capacity {
            return Err(RevocationError::BucketFull {
                bucket: key,
                capacity,
            });
        }
        bucket.push(value);
        Ok(true)
    }

    fn remove(&mut self, key: u8, value: &T) {
        self.buckets[usize::from(key)].retain(|v| v != value);
    }

    fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }
}

/// Hash CRL plus one linkage CRL per i-period
#[derive(Debug)]
pub struct RevocationTable {
    hashes: Buckets<HashedId10>,
    linkage: BTreeMap<u16, Buckets<LinkageValue>>,
    bucket_capacity: usize,
}

impl RevocationTable {
    #[must_use]
    pub fn new(bucket_capacity: usize) -> Self {
        Self {
            hashes: Buckets::new(),
            linkage: BTreeMap::new(),
            bucket_capacity,
        }
    }

    /// Total number of revocation records
    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len() + self.linkage.values().map(Buckets::len).sum::<usize>()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, record: &RevocationRecord) -> bool {
        match record {
            RevocationRecord::Hash(hash) => self.hashes.contains(hash.last_byte(), hash),
            RevocationRecord::Linkage { i_period, value } => self
                .linkage
                .get(i_period)
                .is_some_and(|buckets| buckets.contains(value.last_byte(), value)),
        }
    }

    /// True if the certificate identified by `id` (or, lacking linkage data, by
    /// `hash`) is on one of the CRLs
    #[must_use]
    pub fn check_revoked(&self, id: &CertificateId, hash: Option<&HashedId10>) -> bool {
        match (id.linkage_data(), hash) {
            (Some(data), _) => self.contains(&RevocationRecord::Linkage {
                i_period: data.i_cert,
                value: data.linkage_value,
            }),
            (None, Some(hash)) => self.contains(&RevocationRecord::Hash(*hash)),
            (None, None) => false,
        }
    }

    /// Adds one record. Adding a record twice is a no-op that returns `Ok(false)`.
    pub fn add_revocation(&mut self, record: RevocationRecord) -> Result<bool, RevocationError> {
        match record {
            RevocationRecord::Hash(hash) => {
                self.hashes
                    .insert(hash.last_byte(), hash, self.bucket_capacity)
            }
            RevocationRecord::Linkage { i_period, value } => {
                let buckets = self.linkage.entry(i_period).or_insert_with(Buckets::new);
                let result = buckets.insert(value.last_byte(), value, self.bucket_capacity);
                if buckets.len() == 0 {
                    self.linkage.remove(&i_period);
                }
                result
            }
        }
    }

    fn remove(&mut self, record: &RevocationRecord) {
        match record {
            RevocationRecord::Hash(hash) => self.hashes.remove(hash.last_byte(), hash),
            RevocationRecord::Linkage { i_period, value } => {
                if let Some(buckets) = self.linkage.get_mut(i_period) {
                    buckets.remove(value.last_byte(), value);
                    if buckets.len() == 0 {
                        self.linkage.remove(i_period);
                    }
                }
            }
        }
    }

    /// Adds all `records` or none of them. Returns the number of new records.
    pub fn merge(&mut self, records: &[RevocationRecord]) -> Result<usize, RevocationError> {
        let mut added = Vec::new();
        for record in records {
            match self.add_revocation(*record) {
                Ok(true) => added.push(*record),
                Ok(false) => {}
                Err(e) => {
                    for record in &added {
                        self.remove(record);
                    }
                    warn!(error = %e, rolled_back = added.len(), "revocation merge aborted");
                    return Err(e);
                }
            }
        }
        Ok(added.len())
    }

    /// Parses a revocation blob and merges it. A malformed blob changes nothing.
    pub fn merge_blob(&mut self, blob: &[u8]) -> Result<usize, RevocationError> {
        let records = parse_revocation_blob(blob)?;
        let added = self.merge(&records)?;
        info!(
            records = records.len(),
            added,
            total = self.len(),
            "revocation list merged"
        );
        Ok(added)
    }

    /// Fetches the current revocation blob and merges it. Any transport or parse
    /// failure leaves the table untouched.
    pub fn download_and_merge(
        &mut self,
        transport: &dyn Transport,
        source: &FetchSource,
    ) -> Result<usize, RevocationError> {
        let fetched = transport.fetch(source)?;
        debug!(length = fetched.body.len(), filename = ?fetched.filename, "revocation blob fetched");
        self.merge_blob(&fetched.body)
    }

    /// Drops the linkage CRLs of all i-periods before `i_period`
    pub fn sweep_linkage_before(&mut self, i_period: u16) -> usize {
        let kept = self.linkage.split_off(&i_period);
        let removed = core::mem::replace(&mut self.linkage, kept);
        let count = removed.values().map(Buckets::len).sum();
        if count > 0 {
            debug!(i_period, removed = count, "linkage revocations swept");
        }
        count
    }

    pub fn clear(&mut self) {
        self.hashes = Buckets::new();
        self.linkage.clear();
    }
}

fn revocation_record(input: &[u8]) -> IResult<'_, RevocationRecord> {
    let (input, tag) = uint8(input)?;
    match tag {
        HASH_RECORD_TAG => {
            let (input, hash) = array::<10>(input)?;
            Ok((input, RevocationRecord::Hash(HashedId10(hash))))
        }
        LINKAGE_RECORD_TAG => {
            let (input, i_period) = uint16(input)?;
            let (input, value) = array(input)?;
            Ok((
                input,
                RevocationRecord::Linkage {
                    i_period,
                    value: LinkageValue(value),
                },
            ))
        }
        other => fail(DecodeError::InvalidValue {
            field: "revocation record tag",
            reason: format!("unknown tag {other:#04x}"),
        }),
    }
}

/// Splits a revocation blob into its records: a hash record is `0x00` followed by a
/// HashedId10, a linkage record is `0x01`, a two byte i-period and a linkage value.
pub fn parse_revocation_blob(mut input: &[u8]) -> Result<Vec<RevocationRecord>, DecodeError> {
    let mut records = Vec::new();
    while !input.is_empty() {
        let (rest, record) = revocation_record(input)?;
        records.push(record);
        input = rest;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testutil::MockTransport, LinkageData};
    use bytes::Bytes;

    fn hash(last: u8, first: u8) -> HashedId10 {
        let mut id = [0u8; 10];
        id[0] = first;
        id[9] = last;
        HashedId10(id)
    }

    fn lv(last: u8, first: u8) -> LinkageValue {
        let mut value = [0u8; 9];
        value[0] = first;
        value[8] = last;
        LinkageValue(value)
    }

    fn linkage_id(i_cert: u16, value: LinkageValue) -> CertificateId {
        CertificateId::LinkageData(LinkageData {
            i_cert,
            linkage_value: value,
            group_linkage_value: None,
        })
    }

    #[test]
    fn adding_twice_is_a_no_op() {
        let mut table = RevocationTable::new(8);
        assert!(table.add_revocation(RevocationRecord::Hash(hash(1, 1))).unwrap());
        assert!(!table.add_revocation(RevocationRecord::Hash(hash(1, 1))).unwrap());
        let record = RevocationRecord::Linkage {
            i_period: 3,
            value: lv(9, 9),
        };
        assert!(table.add_revocation(record).unwrap());
        assert!(!table.add_revocation(record).unwrap());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn failed_merge_leaves_no_empty_linkage_container() {
        let mut table = RevocationTable::new(0);
        let err = table
            .merge(&[RevocationRecord::Linkage {
                i_period: 9,
                value: lv(1, 1),
            }])
            .unwrap_err();
        assert!(matches!(err, RevocationError::BucketFull { bucket: 1, capacity: 0 }));
        assert!(table.linkage.is_empty());
        assert!(table.is_empty());

        let mut table = RevocationTable::new(1);
        table
            .add_revocation(RevocationRecord::Linkage {
                i_period: 4,
                value: lv(7, 1),
            })
            .unwrap();
        let err = table
            .merge(&[
                RevocationRecord::Linkage {
                    i_period: 5,
                    value: lv(2, 1),
                },
                RevocationRecord::Linkage {
                    i_period: 4,
                    value: lv(7, 2),
                },
            ])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exhausted);
        assert_eq!(table.linkage.keys().copied().collect::<Vec<_>>(), vec![4]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn hash_lookup_does_not_confuse_bucket_neighbours() {
        let mut table = RevocationTable::new(8);
        table
            .add_revocation(RevocationRecord::Hash(hash(0x42, 1)))
            .unwrap();
        assert!(table.check_revoked(&CertificateId::None, Some(&hash(0x42, 1))));
        assert!(!table.check_revoked(&CertificateId::None, Some(&hash(0x42, 2))));
        assert!(!table.check_revoked(&CertificateId::None, Some(&hash(0x43, 1))));
        assert!(!table.check_revoked(&CertificateId::None, None));
    }

    #[test]
    fn linkage_lookup_uses_period_and_value() {
        let mut table = RevocationTable::new(8);
        table
            .add_revocation(RevocationRecord::Linkage {
                i_period: 7,
                value: lv(0x10, 1),
            })
            .unwrap();
        assert!(table.check_revoked(&linkage_id(7, lv(0x10, 1)), None));
        assert!(!table.check_revoked(&linkage_id(7, lv(0x10, 2)), None));
        assert!(!table.check_revoked(&linkage_id(8, lv(0x10, 1)), None));
        // linkage data takes precedence over the hash
        table
            .add_revocation(RevocationRecord::Hash(hash(5, 5)))
            .unwrap();
        assert!(!table.check_revoked(&linkage_id(8, lv(0x10, 1)), Some(&hash(5, 5))));
    }

    #[test]
    fn full_bucket_is_exhausted() {
        let mut table = RevocationTable::new(2);
        table.add_revocation(RevocationRecord::Hash(hash(0, 1))).unwrap();
        table.add_revocation(RevocationRecord::Hash(hash(0, 2))).unwrap();
        let err = table
            .add_revocation(RevocationRecord::Hash(hash(0, 3)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exhausted);
        // other buckets still have room
        table.add_revocation(RevocationRecord::Hash(hash(1, 3))).unwrap();
    }

    #[test]
    fn failed_merge_rolls_back() {
        let mut table = RevocationTable::new(2);
        table.add_revocation(RevocationRecord::Hash(hash(0, 1))).unwrap();
        let records = [
            RevocationRecord::Hash(hash(0, 1)),
            RevocationRecord::Hash(hash(7, 1)),
            RevocationRecord::Hash(hash(0, 2)),
            RevocationRecord::Hash(hash(0, 3)),
        ];
        assert!(table.merge(&records).is_err());
        assert_eq!(table.len(), 1);
        assert!(table.contains(&RevocationRecord::Hash(hash(0, 1))));
        assert!(!table.contains(&RevocationRecord::Hash(hash(7, 1))));
    }

    #[test]
    fn parses_tagged_blob() {
        let mut blob = vec![HASH_RECORD_TAG];
        blob.extend_from_slice(&hash(3, 4).0);
        blob.push(LINKAGE_RECORD_TAG);
        blob.extend_from_slice(&12u16.to_be_bytes());
        blob.extend_from_slice(&lv(6, 7).0);
        assert_eq!(
            parse_revocation_blob(&blob).unwrap(),
            vec![
                RevocationRecord::Hash(hash(3, 4)),
                RevocationRecord::Linkage {
                    i_period: 12,
                    value: lv(6, 7)
                }
            ]
        );
        for cut in 1..blob.len() {
            if cut == 11 {
                continue;
            }
            assert!(matches!(
                parse_revocation_blob(&blob[..cut]),
                Err(DecodeError::TooShort { .. })
            ));
        }
        assert!(matches!(
            parse_revocation_blob(&[0x02, 0, 0]),
            Err(DecodeError::InvalidValue { .. })
        ));
    }

    #[test]
    fn download_and_merge_is_all_or_nothing() {
        let source = FetchSource {
            url: "https://ra.example/crl".into(),
            pinned_root: Vec::new(),
            timeout: std::time::Duration::from_secs(1),
        };
        let mut good = vec![HASH_RECORD_TAG];
        good.extend_from_slice(&hash(1, 1).0);
        let mut truncated = good.clone();
        truncated.extend_from_slice(&[LINKAGE_RECORD_TAG, 0]);

        let mut table = RevocationTable::new(8);
        let transport = MockTransport::new();
        transport.respond(Ok(Bytes::from(truncated)), None);
        let err = table.download_and_merge(&transport, &source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert!(table.is_empty());

        transport.respond(Err(TransportError::Timeout), None);
        let err = table.download_and_merge(&transport, &source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);

        transport.respond(Ok(Bytes::from(good)), Some("crl_1.oer"));
        assert_eq!(table.download_and_merge(&transport, &source).unwrap(), 1);
        assert!(table.check_revoked(&CertificateId::None, Some(&hash(1, 1))));
    }

    #[test]
    fn sweeps_old_periods() {
        let mut table = RevocationTable::new(8);
        for i_period in [1, 2, 3] {
            table
                .add_revocation(RevocationRecord::Linkage {
                    i_period,
                    value: lv(1, 1),
                })
                .unwrap();
        }
        table.add_revocation(RevocationRecord::Hash(hash(1, 1))).unwrap();
        assert_eq!(table.sweep_linkage_before(3), 2);
        assert_eq!(table.len(), 2);
        assert!(table.check_revoked(&linkage_id(3, lv(1, 1)), None));
        assert!(!table.check_revoked(&linkage_id(2, lv(1, 1)), None));
    }
}
