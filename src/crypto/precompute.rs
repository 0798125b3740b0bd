//! Background refill of signing nonces.
//!
//! A worker thread keeps a bounded list of `(k, R)` pairs topped up so that a
//! signature only costs the scalar arithmetic. The list lock is held for a push
//! or a pop only, never while a point multiplication runs.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use rand::rngs::OsRng;
use tracing::{debug, warn};

use super::SigningNonce;

#[derive(Debug)]
pub struct NonceCache {
    nonces: Mutex<Vec<SigningNonce>>,
    target: usize,
}

impl NonceCache {
    #[must_use]
    pub fn new(target: usize) -> Self {
        Self {
            nonces: Mutex::new(Vec::with_capacity(target)),
            target,
        }
    }

    /// Takes a precomputed nonce, if one is ready
    pub fn pop(&self) -> Option<SigningNonce> {
        self.nonces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nonces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn missing(&self) -> usize {
        self.target.saturating_sub(self.len())
    }

    /// Returns false if the cache is already full; the nonce is dropped (and wiped) then
    fn push(&self, nonce: SigningNonce) -> bool {
        let mut nonces = self.nonces.lock().unwrap_or_else(PoisonError::into_inner);
        if nonces.len() >= self.target {
            return false;
        }
        nonces.push(nonce);
        true
    }

    /// Discards every unused nonce. Each one is zeroized on drop.
    fn drain(&self) -> usize {
        let mut nonces = self.nonces.lock().unwrap_or_else(PoisonError::into_inner);
        let count = nonces.len();
        nonces.clear();
        count
    }
}

/// Owns the refill thread. Dropping the worker stops and joins it.
#[derive(Debug)]
pub struct PrecomputeWorker {
    cache: Arc<NonceCache>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PrecomputeWorker {
    pub fn spawn(target: usize, wake_interval: Duration) -> std::io::Result<Self> {
        let cache = Arc::new(NonceCache::new(target));
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let cache = Arc::clone(&cache);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("v2x-precompute".into())
                .spawn(move || refill_loop(&cache, &running, wake_interval))?
        };
        debug!(target, ?wake_interval, "signing nonce precompute started");
        Ok(Self {
            cache,
            running,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<NonceCache> {
        &self.cache
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("signing nonce precompute thread panicked");
            }
            let discarded = self.cache.drain();
            debug!(discarded, "signing nonce precompute stopped");
        }
    }
}

impl Drop for PrecomputeWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn refill_loop(cache: &NonceCache, running: &AtomicBool, wake_interval: Duration) {
    while running.load(Ordering::Acquire) {
        for _ in 0..cache.missing() {
            if !running.load(Ordering::Acquire) {
                break;
            }
            let nonce = SigningNonce::generate(&mut OsRng);
            if !cache.push(nonce) {
                break;
            }
        }
        thread::park_timeout(wake_interval);
    }
}
