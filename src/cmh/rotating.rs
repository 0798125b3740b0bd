use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use super::{
    check_category, CertCategory, Credential, CredentialScope, EntryId, EntryIds, PoolError,
    SigningCredential,
};
use crate::{Psid, Time64};

/// Interchangeable credentials sharing one validity window and permission set
#[derive(Debug, Clone)]
pub struct CredentialSet {
    pub category: CertCategory,
    pub scope: CredentialScope,
    /// i-period the linkage values of the members belong to
    pub i_period: u32,
    pub members: Vec<Credential>,
}

/// Result of [`RotatingPool::get_available`]
#[derive(Debug, Clone)]
pub struct RotatingSelection {
    pub credential: SigningCredential,
    /// A member was (re)selected on this call. After a set change or with a
    /// single member set it can be the same member as before.
    pub member_changed: bool,
    /// The active set changed since the previous call
    pub set_changed: bool,
    /// The set will not cover the next signing interval
    pub expires_soon: bool,
}

#[derive(Debug)]
struct Slot {
    id: EntryId,
    set: CredentialSet,
    selected: Option<usize>,
}

/// Credential sets ordered by validity start. Within the active set a member is
/// chosen at random and kept until the set changes or rotation is forced.
#[derive(Debug)]
pub struct RotatingPool {
    slots: Vec<Slot>,
    capacity: usize,
    signing_interval: u64,
    category: Option<CertCategory>,
    active: Option<EntryId>,
    ids: EntryIds,
    rng: StdRng,
}

impl RotatingPool {
    /// `signing_interval` is in microseconds; 0 disables `expires_soon`
    #[must_use]
    pub fn new(capacity: usize, signing_interval: u64) -> Self {
        Self::with_rng(capacity, signing_interval, StdRng::from_entropy())
    }

    #[must_use]
    pub fn with_rng(capacity: usize, signing_interval: u64, rng: StdRng) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
            signing_interval,
            category: None,
            active: None,
            ids: EntryIds::default(),
            rng,
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

    #[must_use]
    pub fn category(&self) -> Option<CertCategory> {
        self.category
    }

    pub fn sets(&self) -> impl Iterator<Item = &CredentialSet> {
        self.slots.iter().map(|slot| &slot.set)
    }

    pub fn insert(&mut self, set: CredentialSet) -> Result<(), PoolError> {
        if !matches!(
            set.category,
            CertCategory::Pseudonym | CertCategory::Identification
        ) {
            return Err(PoolError::UnsupportedCategory(set.category));
        }
        if set.members.is_empty() {
            return Err(PoolError::EmptySet);
        }
        check_category(self.category, set.category)?;
        if self.slots.len() >= self.capacity {
            return Err(PoolError::PoolFull {
                capacity: self.capacity,
            });
        }
        let start = set.scope.validity.start;
        let position = self
            .slots
            .partition_point(|slot| slot.set.scope.validity.start <= start);
        debug!(
            category = ?set.category,
            members = set.members.len(),
            i_period = set.i_period,
            position,
            "credential set inserted"
        );
        self.category = Some(set.category);
        let id = self.ids.next();
        self.slots.insert(
            position,
            Slot {
                id,
                set,
                selected: None,
            },
        );
        Ok(())
    }

    fn position_of(&self, id: EntryId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.id == id)
    }

    /// Selects a member of the set that is valid at `now`.
    ///
    /// `force_rotate` picks a new member from the current set even if it is still
    /// valid. A set that does not permit `psid` fails the request and drops the
    /// active set, without looking at other sets.
    pub fn get_available(
        &mut self,
        psid: Psid,
        now: Time64,
        force_rotate: bool,
    ) -> Result<RotatingSelection, PoolError> {
        let cached = self
            .active
            .and_then(|id| self.position_of(id))
            .filter(|index| self.slots[*index].set.scope.validity.contains(now));

        let (index, set_changed) = match cached {
            Some(index) => (index, false),
            None => {
                if let Some(previous) = self.active.take().and_then(|id| self.position_of(id)) {
                    self.slots[previous].selected = None;
                }
                let index = self
                    .slots
                    .iter()
                    .position(|slot| slot.set.scope.validity.contains(now))
                    .ok_or(PoolError::NoAvailableCredential(psid))?;
                self.active = Some(self.slots[index].id);
                (index, true)
            }
        };

        if !self.slots[index].set.scope.permissions.permits(psid) {
            self.slots[index].selected = None;
            self.active = None;
            return Err(PoolError::NoAvailableCredential(psid));
        }

        let slot = &mut self.slots[index];
        let member_count = slot.set.members.len();
        let member_changed = set_changed || force_rotate || slot.selected.is_none();
        if member_changed {
            let next = match slot.selected {
                Some(current) if member_count > 1 => {
                    // uniform over every member except the current one
                    let pick = self.rng.gen_range(0..member_count - 1);
                    if pick >= current {
                        pick + 1
                    } else {
                        pick
                    }
                }
                _ => self.rng.gen_range(0..member_count),
            };
            debug!(
                set_changed,
                force_rotate,
                members = member_count,
                "credential set member rotated"
            );
            slot.selected = Some(next);
        }

        let selected = slot.selected.unwrap_or_default();
        let validity = slot.set.scope.validity;
        let expires_soon =
            self.signing_interval > 0 && now.saturating_add_micros(self.signing_interval) > validity.end;
        let credential = slot
            .set
            .members
            .get(selected)
            .ok_or(PoolError::NoAvailableCredential(psid))?
            .to_signing();
        Ok(RotatingSelection {
            credential,
            member_changed,
            set_changed,
            expires_soon,
        })
    }

    /// Removes every set whose validity ended at or before `now`
    pub fn sweep(&mut self, now: Time64) -> usize {
        let before = self.slots.len();
        self.slots.retain(|slot| !slot.set.scope.validity.is_expired(now));
        if self.active.and_then(|id| self.position_of(id)).is_none() {
            self.active = None;
        }
        let removed = before - self.slots.len();
        if removed > 0 {
            debug!(removed, remaining = self.slots.len(), "expired credential sets swept");
        }
        if self.slots.is_empty() {
            self.category = None;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.active = None;
        self.category = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testutil::credential_set, MICROS_PER_SECOND};

    const HOUR: u64 = 3_600 * MICROS_PER_SECOND;
    const DAY: u64 = 24 * HOUR;

    fn pool(signing_interval: u64) -> RotatingPool {
        RotatingPool::with_rng(8, signing_interval, StdRng::seed_from_u64(7))
    }

    fn pseudonyms(start: u64, end: u64, members: usize, psids: &[Psid]) -> CredentialSet {
        credential_set(
            CertCategory::Pseudonym,
            Time64(start),
            Time64(end),
            members,
            psids,
        )
    }

    #[test]
    fn keeps_member_until_rotation_is_forced() {
        let t0 = 100 * DAY;
        let mut pool = pool(0);
        pool.insert(pseudonyms(t0, t0 + 7 * DAY, 5, &[Psid(32)]))
            .unwrap();

        let now = Time64(t0 + HOUR);
        let first = pool.get_available(Psid(32), now, false).unwrap();
        assert!(first.member_changed);
        assert!(first.set_changed);
        for _ in 0..50 {
            let next = pool.get_available(Psid(32), now, false).unwrap();
            assert_eq!(next.credential, first.credential);
            assert!(!next.member_changed);
            assert!(!next.set_changed);
            assert!(!next.expires_soon);
        }

        let rotated = pool.get_available(Psid(32), now, true).unwrap();
        assert!(rotated.member_changed);
        assert!(!rotated.set_changed);
        assert_ne!(rotated.credential.cert_hash, first.credential.cert_hash);
    }

    #[test]
    fn forced_rotation_never_repeats() {
        let mut pool = pool(0);
        pool.insert(pseudonyms(0, DAY, 2, &[Psid(32)])).unwrap();
        let mut previous = pool
            .get_available(Psid(32), Time64(1), false)
            .unwrap()
            .credential
            .cert_hash;
        for _ in 0..1000 {
            let next = pool
                .get_available(Psid(32), Time64(1), true)
                .unwrap()
                .credential
                .cert_hash;
            assert_ne!(next, previous);
            previous = next;
        }
    }

    #[test]
    fn rotation_reaches_every_member() {
        let mut pool = pool(0);
        let set = pseudonyms(0, DAY, 4, &[Psid(32)]);
        let hashes: Vec<_> = set
            .members
            .iter()
            .map(|member| *member.certificate.digest())
            .collect();
        pool.insert(set).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let selection = pool.get_available(Psid(32), Time64(1), true).unwrap();
            seen.insert(selection.credential.cert_hash);
        }
        assert_eq!(seen.len(), hashes.len());
        assert!(hashes.iter().all(|hash| seen.contains(hash)));
    }

    #[test]
    fn single_member_set_is_reused() {
        let mut pool = pool(0);
        pool.insert(pseudonyms(0, DAY, 1, &[Psid(32)])).unwrap();
        let first = pool.get_available(Psid(32), Time64(1), false).unwrap();
        let forced = pool.get_available(Psid(32), Time64(1), true).unwrap();
        assert!(forced.member_changed);
        assert_eq!(forced.credential, first.credential);
    }

    #[test]
    fn psid_is_checked_on_the_time_valid_set_only() {
        let mut pool = pool(0);
        pool.insert(pseudonyms(0, DAY, 3, &[Psid(32)])).unwrap();
        pool.insert(pseudonyms(DAY, 2 * DAY, 3, &[Psid(32), Psid(35)]))
            .unwrap();
        let err = pool
            .get_available(Psid(35), Time64(HOUR), false)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        assert!(pool.active.is_none());

        // the active set was dropped, so the next success reports a set change
        let selection = pool.get_available(Psid(32), Time64(HOUR), false).unwrap();
        assert!(selection.set_changed);
        assert!(pool
            .get_available(Psid(35), Time64(DAY + HOUR), false)
            .is_ok());
    }

    #[test]
    fn moving_to_the_next_set_reports_set_change() {
        let mut pool = pool(0);
        let first = pseudonyms(0, DAY, 2, &[Psid(32)]);
        let second = pseudonyms(DAY, 2 * DAY, 2, &[Psid(32)]);
        let second_hashes: Vec<_> = second
            .members
            .iter()
            .map(|member| *member.certificate.digest())
            .collect();
        pool.insert(second).unwrap();
        pool.insert(first).unwrap();

        assert!(pool.get_available(Psid(32), Time64(1), false).unwrap().set_changed);
        let next = pool
            .get_available(Psid(32), Time64(DAY), false)
            .unwrap();
        assert!(next.set_changed);
        assert!(next.member_changed);
        assert!(second_hashes.contains(&next.credential.cert_hash));
        assert!(pool.slots[0].selected.is_none());
    }

    #[test]
    fn expires_soon_follows_signing_interval() {
        let mut pool = pool(2 * HOUR);
        pool.insert(pseudonyms(0, DAY, 2, &[Psid(32)])).unwrap();
        assert!(!pool
            .get_available(Psid(32), Time64(HOUR), false)
            .unwrap()
            .expires_soon);
        assert!(!pool
            .get_available(Psid(32), Time64(DAY - 2 * HOUR), false)
            .unwrap()
            .expires_soon);
        assert!(pool
            .get_available(Psid(32), Time64(DAY - HOUR), false)
            .unwrap()
            .expires_soon);
    }

    #[test]
    fn sweep_removes_expired_sets() {
        let mut pool = pool(0);
        pool.insert(pseudonyms(0, DAY, 2, &[Psid(32)])).unwrap();
        pool.insert(pseudonyms(0, 2 * DAY, 2, &[Psid(32)])).unwrap();
        pool.get_available(Psid(32), Time64(1), false).unwrap();

        let later = Time64(DAY + 1);
        let selection = pool.get_available(Psid(32), later, false).unwrap();
        assert!(selection.set_changed);
        assert_eq!(pool.sweep(later), 1);
        assert_eq!(pool.len(), 1);
        assert!(!pool
            .get_available(Psid(32), later, false)
            .unwrap()
            .set_changed);
        assert_eq!(pool.sweep(Time64(2 * DAY)), 1);
        assert_eq!(pool.category(), None);
        assert!(pool.get_available(Psid(32), Time64(2 * DAY), false).is_err());
    }

    #[test]
    fn rejects_empty_and_foreign_sets() {
        let mut pool = pool(0);
        let mut empty = pseudonyms(0, DAY, 1, &[Psid(32)]);
        empty.members.clear();
        assert_eq!(pool.insert(empty), Err(PoolError::EmptySet));
        assert_eq!(
            pool.insert(credential_set(
                CertCategory::Application,
                Time64(0),
                Time64(DAY),
                1,
                &[Psid(32)]
            )),
            Err(PoolError::UnsupportedCategory(CertCategory::Application))
        );
        pool.insert(pseudonyms(0, DAY, 1, &[Psid(32)])).unwrap();
        assert!(matches!(
            pool.insert(credential_set(
                CertCategory::Identification,
                Time64(0),
                Time64(DAY),
                1,
                &[Psid(32)]
            )),
            Err(PoolError::ConflictingCategory { .. })
        ));
    }
}
