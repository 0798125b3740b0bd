use tracing::debug;

use super::{
    check_category, CertCategory, Credential, CredentialScope, EntryId, EntryIds, PoolError,
    SigningCredential,
};
use crate::{Psid, Time64};

/// One long-lived credential
#[derive(Debug, Clone)]
pub struct SequentialEntry {
    pub category: CertCategory,
    pub scope: CredentialScope,
    pub credential: Credential,
}

#[derive(Debug)]
struct Slot {
    id: EntryId,
    entry: SequentialEntry,
}

/// Credentials ordered by validity start, of which at most one is active at a time
#[derive(Debug)]
pub struct SequentialPool {
    slots: Vec<Slot>,
    capacity: usize,
    category: Option<CertCategory>,
    active: Option<EntryId>,
    ids: EntryIds,
}

impl SequentialPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
            category: None,
            active: None,
            ids: EntryIds::default(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Category of the held credentials, `None` while the pool is empty
    #[must_use]
    pub fn category(&self) -> Option<CertCategory> {
        self.category
    }

    pub fn entries(&self) -> impl Iterator<Item = &SequentialEntry> {
        self.slots.iter().map(|slot| &slot.entry)
    }

    pub fn insert(&mut self, entry: SequentialEntry) -> Result<(), PoolError> {
        if entry.category == CertCategory::Pseudonym {
            return Err(PoolError::UnsupportedCategory(entry.category));
        }
        check_category(self.category, entry.category)?;
        if self.slots.len() >= self.capacity {
            return Err(PoolError::PoolFull {
                capacity: self.capacity,
            });
        }
        let start = entry.scope.validity.start;
        let position = self
            .slots
            .partition_point(|slot| slot.entry.scope.validity.start <= start);
        debug!(
            category = ?entry.category,
            issuer = ?entry.scope.issuer,
            position,
            "sequential credential inserted"
        );
        self.category = Some(entry.category);
        let id = self.ids.next();
        self.slots.insert(position, Slot { id, entry });
        Ok(())
    }

    fn active_slot(&self) -> Option<&Slot> {
        let active = self.active?;
        self.slots.iter().find(|slot| slot.id == active)
    }

    /// Returns a copy of the credential that is valid at `now`.
    ///
    /// A PSID the active entry does not permit fails the request but leaves the
    /// entry active.
    pub fn get_available(
        &mut self,
        psid: Psid,
        now: Time64,
    ) -> Result<SigningCredential, PoolError> {
        let cached = self
            .active_slot()
            .filter(|slot| slot.entry.scope.validity.contains(now))
            .map(|slot| slot.id);
        let id = match cached {
            Some(id) => id,
            None => {
                let slot = self
                    .slots
                    .iter()
                    .find(|slot| slot.entry.scope.validity.contains(now))
                    .ok_or(PoolError::NoAvailableCredential(psid))?;
                debug!(issuer = ?slot.entry.scope.issuer, "sequential credential activated");
                self.active = Some(slot.id);
                slot.id
            }
        };
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.id == id)
            .ok_or(PoolError::NoAvailableCredential(psid))?;
        if !slot.entry.scope.permissions.permits(psid) {
            return Err(PoolError::NoAvailableCredential(psid));
        }
        Ok(slot.entry.credential.to_signing())
    }

    /// Removes every entry whose validity ended at or before `now`
    pub fn sweep(&mut self, now: Time64) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|slot| !slot.entry.scope.validity.is_expired(now));
        if self.active_slot().is_none() {
            self.active = None;
        }
        let removed = before - self.slots.len();
        if removed > 0 {
            debug!(removed, remaining = self.slots.len(), "expired sequential credentials swept");
        }
        self.release_if_empty();
        removed
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.active = None;
        self.category = None;
    }

    fn release_if_empty(&mut self) {
        if self.slots.is_empty() {
            self.category = None;
            self.active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testutil::sequential_entry, MICROS_PER_SECOND};
    use proptest::prelude::*;

    const HOUR: u64 = 3_600 * MICROS_PER_SECOND;

    fn window_entry(category: CertCategory, start: u64, end: u64) -> SequentialEntry {
        sequential_entry(category, Time64(start), Time64(end), &[Psid(32)])
    }

    #[test]
    fn selects_entry_valid_now() {
        let mut pool = SequentialPool::new(8);
        let first = window_entry(CertCategory::Application, 0, 10 * HOUR);
        let second = window_entry(CertCategory::Application, 10 * HOUR, 20 * HOUR);
        let second_hash = *second.credential.certificate.digest();
        pool.insert(second).unwrap();
        pool.insert(first.clone()).unwrap();

        let credential = pool.get_available(Psid(32), Time64(HOUR)).unwrap();
        assert_eq!(&credential.cert_hash, first.credential.certificate.digest());
        assert_eq!(credential.certificate, *first.credential.certificate.raw());

        let credential = pool.get_available(Psid(32), Time64(15 * HOUR)).unwrap();
        assert_eq!(credential.cert_hash, second_hash);

        assert_eq!(
            pool.get_available(Psid(32), Time64(20 * HOUR)),
            Err(PoolError::NoAvailableCredential(Psid(32)))
        );
    }

    #[test]
    fn psid_miss_keeps_entry_active() {
        let mut pool = SequentialPool::new(8);
        pool.insert(window_entry(CertCategory::Application, 0, 10 * HOUR))
            .unwrap();
        assert_eq!(
            pool.get_available(Psid(0x20_40_95), Time64(HOUR)),
            Err(PoolError::NoAvailableCredential(Psid(0x20_40_95)))
        );
        assert!(pool.active.is_some());
        assert!(pool.get_available(Psid(32), Time64(HOUR)).is_ok());
    }

    #[test]
    fn category_is_locked_until_empty() {
        let mut pool = SequentialPool::new(8);
        pool.insert(window_entry(CertCategory::Application, 0, HOUR))
            .unwrap();
        let err = pool
            .insert(window_entry(CertCategory::Identification, 0, HOUR))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conflict);

        assert_eq!(pool.sweep(Time64(HOUR)), 1);
        assert_eq!(pool.category(), None);
        pool.insert(window_entry(CertCategory::Identification, HOUR, 2 * HOUR))
            .unwrap();
        assert_eq!(pool.category(), Some(CertCategory::Identification));
    }

    #[test]
    fn rejects_pseudonyms() {
        let mut pool = SequentialPool::new(8);
        assert_eq!(
            pool.insert(window_entry(CertCategory::Pseudonym, 0, HOUR)),
            Err(PoolError::UnsupportedCategory(CertCategory::Pseudonym))
        );
    }

    #[test]
    fn overflow_is_an_error() {
        let mut pool = SequentialPool::new(2);
        for i in 0..2 {
            pool.insert(window_entry(CertCategory::Application, i * HOUR, (i + 1) * HOUR))
                .unwrap();
        }
        assert_eq!(
            pool.insert(window_entry(CertCategory::Application, 5 * HOUR, 6 * HOUR)),
            Err(PoolError::PoolFull { capacity: 2 })
        );
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn sweep_drops_expired_active_entry() {
        let mut pool = SequentialPool::new(8);
        pool.insert(window_entry(CertCategory::Application, 0, HOUR))
            .unwrap();
        pool.insert(window_entry(CertCategory::Application, 0, 3 * HOUR))
            .unwrap();
        let early = pool.get_available(Psid(32), Time64(0)).unwrap();

        let later = pool.get_available(Psid(32), Time64(2 * HOUR)).unwrap();
        assert_ne!(later.cert_hash, early.cert_hash);

        assert_eq!(pool.sweep(Time64(2 * HOUR)), 1);
        assert_eq!(pool.len(), 1);
        assert_eq!(
            pool.get_available(Psid(32), Time64(2 * HOUR)).unwrap().cert_hash,
            later.cert_hash
        );
        assert_eq!(pool.sweep(Time64(3 * HOUR)), 1);
        assert!(pool.active.is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn handed_out_credential_outlives_the_pool() {
        let mut pool = SequentialPool::new(8);
        let entry = window_entry(CertCategory::Application, 0, HOUR);
        let public = entry.credential.key.public_key();
        let raw = entry.credential.certificate.raw().clone();
        pool.insert(entry).unwrap();
        let credential = pool.get_available(Psid(32), Time64(0)).unwrap();

        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.sweep(Time64(2 * HOUR)), 0);

        assert_eq!(credential.certificate, raw);
        let signature = crate::crypto::sign(
            crate::PointForm::Compressed,
            b"after flush",
            &credential.cert_hash,
            &credential.key,
        )
        .unwrap();
        assert!(crate::crypto::verify(b"after flush", &credential.cert_hash, &public, &signature).is_ok());
    }

    proptest! {
        #[test]
        fn order_follows_validity_start(starts in prop::collection::vec(0u64..1_000, 1..16)) {
            let mut pool = SequentialPool::new(16);
            for start in &starts {
                pool.insert(window_entry(CertCategory::Application, *start * HOUR, (*start + 1) * HOUR))
                    .unwrap();
            }
            let ordered: Vec<_> = pool.entries().map(|e| e.scope.validity.start).collect();
            prop_assert!(ordered.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(ordered.len(), starts.len());
        }
    }
}
