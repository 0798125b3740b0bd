//! Process-wide security engine.
//!
//! The credential store, the revocation table and the trust chain are consulted
//! together ("find the issuer, check validity, check revocation"), so they share a
//! single lock. Cryptographic work and network I/O always happen outside of it.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use rand::rngs::{OsRng, StdRng};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::{
    cert::DecodedCertificate,
    cmh::{CmhStore, SigningCredential},
    cmhf::{self, CmhfBundle, CmhfKind},
    config::EngineConfig,
    crypto::{
        self, precompute::PrecomputeWorker, CryptoError, EcdsaSignature, EciesCiphertext,
        PointForm, PrivateKey, PublicKey, ECIES_ENC_LENGTH,
    },
    error::{Error, Result},
    revocation::{RevocationRecord, RevocationTable},
    transport::{FetchSource, Transport},
    trust::TrustChain,
    CertificateId, HashedId10, HashedId8, Psid, Time64,
};

#[derive(Debug)]
struct State {
    store: CmhStore,
    revocation: RevocationTable,
    trust: TrustChain,
}

/// A signature together with the certificate it has to be sent with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub signature: EcdsaSignature,
    pub certificate: Bytes,
    pub signer_id: HashedId8,
}

/// Flags reported when signing with a rotating credential. Whether a member change
/// should also change the link layer identity is left to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationStatus {
    pub member_changed: bool,
    pub set_changed: bool,
    pub expires_soon: bool,
}

/// Verdict on a received signed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    UnknownIssuer,
    /// the signer certificate is not valid at the time of verification
    OutsideValidity,
    /// the signer certificate outlives its issuer
    InconsistentValidity,
    Revoked,
    InvalidSignature,
}

impl VerificationOutcome {
    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationOutcome::Verified)
    }
}

/// Number of entries dropped by [`SecurityEngine::sweep_expired`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub credentials: usize,
    pub trust_entries: usize,
}

#[derive(Debug)]
pub struct SecurityEngine {
    config: EngineConfig,
    state: Mutex<State>,
    precompute: Option<PrecomputeWorker>,
}

impl SecurityEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let store = CmhStore::new(&config);
        Self::from_store(config, store)
    }

    /// Same as [`SecurityEngine::new`] with a fixed member selection RNG
    pub fn with_rng(config: EngineConfig, rng: StdRng) -> Result<Self> {
        let store = CmhStore::with_rng(&config, rng);
        Self::from_store(config, store)
    }

    fn from_store(config: EngineConfig, store: CmhStore) -> Result<Self> {
        config.check()?;
        let precompute = if config.precompute.enabled {
            let worker = PrecomputeWorker::spawn(
                config.precompute.target,
                Duration::from_millis(config.precompute.wake_interval_ms),
            )
            .map_err(|e| Error::Config(format!("cannot start precompute thread: {e}")))?;
            Some(worker)
        } else {
            None
        };
        let state = State {
            store,
            revocation: RevocationTable::new(config.revocation_bucket_capacity),
            trust: TrustChain::new(),
        };
        info!(precompute = precompute.is_some(), "security engine started");
        Ok(Self {
            config,
            state: Mutex::new(state),
            precompute,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs a locally provisioned root certificate
    pub fn add_root(&self, certificate: Bytes, now: Time64) -> Result<bool> {
        let certificate = DecodedCertificate::decode(certificate)?;
        Ok(self.state().trust.add_root(certificate, now)?)
    }

    pub fn install_chain_file(&self, file: &Bytes, now: Time64) -> Result<usize> {
        let mut state = self.state();
        let State {
            revocation, trust, ..
        } = &mut *state;
        Ok(trust.install_chain_file(file, revocation, now)?)
    }

    /// Decodes a credential file against the trust chain and adds its content to
    /// the matching pool. On any failure nothing is installed.
    pub fn install_credential_file(&self, file: &Bytes, kind: CmhfKind) -> Result<()> {
        let mut state = self.state();
        let bundle = cmhf::decode(file, kind, &self.config, &state.trust)?;
        match bundle {
            CmhfBundle::Sequential(entry) => state.store.insert_sequential(entry)?,
            CmhfBundle::Rotating(set) => state.store.insert_rotating(set)?,
        }
        info!(?kind, "credential file installed");
        Ok(())
    }

    /// Runs `f` on the credential store under the engine lock
    pub fn with_store<T>(&self, f: impl FnOnce(&mut CmhStore) -> T) -> T {
        f(&mut self.state().store)
    }

    fn sign_with(
        &self,
        form: PointForm,
        message: &[u8],
        credential: &SigningCredential,
    ) -> Result<SignedMessage> {
        let precomputed = self.precompute.as_ref().and_then(|worker| worker.cache().pop());
        let signature = match precomputed {
            Some(nonce) => {
                match crypto::sign_with_nonce(form, message, &credential.cert_hash, &credential.key, nonce)
                {
                    Err(CryptoError::DegenerateNonce) => {
                        crypto::sign(form, message, &credential.cert_hash, &credential.key)?
                    }
                    result => result?,
                }
            }
            None => crypto::sign(form, message, &credential.cert_hash, &credential.key)?,
        };
        Ok(SignedMessage {
            signature,
            certificate: credential.certificate.clone(),
            signer_id: credential.signer_id(),
        })
    }

    pub fn sign_with_sequential(
        &self,
        psid: Psid,
        message: &[u8],
        form: PointForm,
        now: Time64,
    ) -> Result<SignedMessage> {
        let credential = self.state().store.get_sequential(psid, now)?;
        self.sign_with(form, message, &credential)
    }

    pub fn sign_with_enrollment(
        &self,
        psid: Psid,
        message: &[u8],
        form: PointForm,
        now: Time64,
    ) -> Result<SignedMessage> {
        let credential = self.state().store.get_enrollment(psid, now)?;
        self.sign_with(form, message, &credential)
    }

    pub fn sign_with_rotating(
        &self,
        psid: Psid,
        message: &[u8],
        form: PointForm,
        now: Time64,
        force_rotate: bool,
    ) -> Result<(SignedMessage, RotationStatus)> {
        let selection = self.state().store.get_rotating(psid, now, force_rotate)?;
        let status = RotationStatus {
            member_changed: selection.member_changed,
            set_changed: selection.set_changed,
            expires_soon: selection.expires_soon,
        };
        if status.member_changed {
            debug!(set_changed = status.set_changed, "signing with a new pseudonym");
        }
        let signed = self.sign_with(form, message, &selection.credential)?;
        Ok((signed, status))
    }

    /// Checks a received signature: issuer known, signer valid at `now` and not
    /// revoked, then the signature itself. `verification_key` is the key taken from
    /// the signer certificate by the caller.
    pub fn verify_signed_data(
        &self,
        message: &[u8],
        signer: &Bytes,
        verification_key: &PublicKey,
        signature: &EcdsaSignature,
        now: Time64,
    ) -> Result<VerificationOutcome> {
        let certificate = DecodedCertificate::decode(signer.clone())?;
        let validity = certificate.validity();
        {
            let state = self.state();
            let Ok(issuer) = state.trust.resolve_issuer(&certificate) else {
                return Ok(VerificationOutcome::UnknownIssuer);
            };
            if !validity.contains(now) {
                return Ok(VerificationOutcome::OutsideValidity);
            }
            if !issuer.certificate.validity().encloses(&validity) {
                return Ok(VerificationOutcome::InconsistentValidity);
            }
            if state
                .revocation
                .check_revoked(&certificate.header.id, Some(&certificate.hashed_id10()))
            {
                return Ok(VerificationOutcome::Revoked);
            }
        }
        match crypto::verify(message, certificate.digest(), verification_key, signature) {
            Ok(()) => Ok(VerificationOutcome::Verified),
            Err(e) => {
                debug!(error = %e, signer = ?certificate.hashed_id8(), "signature rejected");
                Ok(VerificationOutcome::InvalidSignature)
            }
        }
    }

    /// Wraps `symmetric_key` for `recipient` with a fresh ephemeral key
    pub fn encrypt_key(
        &self,
        symmetric_key: &[u8; ECIES_ENC_LENGTH],
        kdf_context: &[u8],
        recipient: &PublicKey,
    ) -> Result<EciesCiphertext> {
        let ephemeral = PrivateKey::generate(&mut OsRng);
        Ok(crypto::encrypt(&ephemeral, symmetric_key, kdf_context, recipient)?)
    }

    pub fn decrypt_key(
        &self,
        ciphertext: &EciesCiphertext,
        recipient: &PrivateKey,
        kdf_context: &[u8],
    ) -> Result<Zeroizing<[u8; ECIES_ENC_LENGTH]>> {
        Ok(crypto::decrypt(
            &ciphertext.ephemeral,
            &ciphertext.ciphertext,
            &ciphertext.tag,
            recipient,
            kdf_context,
        )?)
    }

    pub fn add_revocations(&self, records: &[RevocationRecord]) -> Result<usize> {
        Ok(self.state().revocation.merge(records)?)
    }

    pub fn merge_revocation_blob(&self, blob: &[u8]) -> Result<usize> {
        Ok(self.state().revocation.merge_blob(blob)?)
    }

    /// Fetches the revocation blob without holding the lock, then merges it
    /// under the lock
    pub fn download_and_merge(&self, transport: &dyn Transport, source: &FetchSource) -> Result<usize> {
        let fetched = transport.fetch(source)?;
        self.merge_revocation_blob(&fetched.body)
    }

    #[must_use]
    pub fn check_revoked(&self, id: &CertificateId, hash: Option<&HashedId10>) -> bool {
        self.state().revocation.check_revoked(id, hash)
    }

    #[must_use]
    pub fn revocation_count(&self) -> usize {
        self.state().revocation.len()
    }

    #[must_use]
    pub fn trust_chain_len(&self) -> usize {
        self.state().trust.len()
    }

    /// Drops expired credentials and trust chain entries
    pub fn sweep_expired(&self, now: Time64) -> SweepSummary {
        let mut state = self.state();
        let summary = SweepSummary {
            credentials: state.store.sweep(now),
            trust_entries: state.trust.sweep(now),
        };
        if summary != SweepSummary::default() {
            info!(
                credentials = summary.credentials,
                trust_entries = summary.trust_entries,
                "expired entries swept"
            );
        }
        summary
    }

    /// Drops the linkage CRLs of every i-period before `i_period`
    pub fn sweep_linkage_before(&self, i_period: u16) -> usize {
        self.state().revocation.sweep_linkage_before(i_period)
    }

    /// Forgets every credential, revocation and trust chain entry
    pub fn flush(&self) {
        let mut state = self.state();
        state.store.flush();
        state.revocation.clear();
        state.trust.clear();
        info!("security engine flushed");
    }
}
