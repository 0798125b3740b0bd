use rand::{rngs::StdRng, SeedableRng};
use tracing::info;

use super::{
    CertCategory, CredentialSet, PoolError, RotatingPool, RotatingSelection, SequentialEntry,
    SequentialPool, SigningCredential,
};
use crate::{config::EngineConfig, Psid, Time64};

/// The credential pools of one device.
///
/// Application, Identification and Pseudonym credentials exclude each other across
/// the sequential and the rotating pool. Enrollment credentials live in a pool of
/// their own and never take part in that check.
#[derive(Debug)]
pub struct CmhStore {
    sequential: SequentialPool,
    rotating: RotatingPool,
    enrollment: SequentialPool,
}

impl CmhStore {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Same as [`CmhStore::new`] with a caller-provided member selection RNG
    #[must_use]
    pub fn with_rng(config: &EngineConfig, rng: StdRng) -> Self {
        Self {
            sequential: SequentialPool::new(config.sequential_capacity),
            rotating: RotatingPool::with_rng(
                config.rotating_capacity,
                config.signing_interval_ms.saturating_mul(1_000),
                rng,
            ),
            enrollment: SequentialPool::new(config.sequential_capacity),
        }
    }

    #[must_use]
    pub fn sequential(&self) -> &SequentialPool {
        &self.sequential
    }

    #[must_use]
    pub fn rotating(&self) -> &RotatingPool {
        &self.rotating
    }

    #[must_use]
    pub fn enrollment(&self) -> &SequentialPool {
        &self.enrollment
    }

    /// Category locked in across the sequential and rotating pools
    #[must_use]
    pub fn category(&self) -> Option<CertCategory> {
        self.sequential.category().or(self.rotating.category())
    }

    fn check_conflict(&self, requested: CertCategory) -> Result<(), PoolError> {
        match self.category() {
            Some(locked) if locked.conflicts_with(requested) => {
                Err(PoolError::ConflictingCategory { locked, requested })
            }
            _ => Ok(()),
        }
    }

    pub fn insert_sequential(&mut self, entry: SequentialEntry) -> Result<(), PoolError> {
        if entry.category == CertCategory::Enrollment {
            return self.enrollment.insert(entry);
        }
        self.check_conflict(entry.category)?;
        self.sequential.insert(entry)
    }

    pub fn insert_rotating(&mut self, set: CredentialSet) -> Result<(), PoolError> {
        self.check_conflict(set.category)?;
        self.rotating.insert(set)
    }

    pub fn get_sequential(
        &mut self,
        psid: Psid,
        now: Time64,
    ) -> Result<SigningCredential, PoolError> {
        self.sequential.get_available(psid, now)
    }

    pub fn get_enrollment(
        &mut self,
        psid: Psid,
        now: Time64,
    ) -> Result<SigningCredential, PoolError> {
        self.enrollment.get_available(psid, now)
    }

    pub fn get_rotating(
        &mut self,
        psid: Psid,
        now: Time64,
        force_rotate: bool,
    ) -> Result<RotatingSelection, PoolError> {
        self.rotating.get_available(psid, now, force_rotate)
    }

    /// Drops every credential that expired at or before `now`
    pub fn sweep(&mut self, now: Time64) -> usize {
        self.sequential.sweep(now) + self.rotating.sweep(now) + self.enrollment.sweep(now)
    }

    pub fn flush(&mut self) {
        self.sequential.clear();
        self.rotating.clear();
        self.enrollment.clear();
        info!("credential store flushed");
    }
}
