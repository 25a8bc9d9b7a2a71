//! Credential rotation for rate-limited providers.
//!
//! A [`CredentialPool`] holds the credentials of one provider. Calls go through
//! [`CredentialPool::call`], which runs an operation with the current credential
//! and, when the provider signals a rate limit or exhausted quota, marks that
//! credential exhausted and retries with the next one.
//!
//! # Rotation rules
//!
//! - At most one credential is current at a time.
//! - Rotation is round-robin and monotonic: an exhausted credential is never
//!   handed out again until [`CredentialPool::reset`] is called.
//! - When every credential is exhausted the pool returns
//!   [`ProviderError::Exhausted`], which lets a caller fall back to a different
//!   provider with its own pool.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ProviderError, ProviderResult};

#[derive(Debug)]
struct PoolEntry<C> {
    credential: C,
    exhausted: bool,
}

#[derive(Debug)]
struct PoolState<C> {
    entries: Vec<PoolEntry<C>>,
    current: usize,
}

impl<C> PoolState<C> {
    fn current_available(&self) -> bool {
        self.entries
            .get(self.current)
            .map(|e| !e.exhausted)
            .unwrap_or(false)
    }
}

/// Status of one credential, for operational visibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub index: usize,
    pub exhausted: bool,
    pub current: bool,
}

/// Round-robin pool of credentials for a single provider.
#[derive(Debug)]
pub struct CredentialPool<C> {
    provider: String,
    state: Mutex<PoolState<C>>,
    rotations: AtomicU64,
}

impl<C: Clone> CredentialPool<C> {
    /// Create a pool. The first credential starts as current.
    pub fn new(provider: impl Into<String>, credentials: Vec<C>) -> Self {
        let entries = credentials
            .into_iter()
            .map(|credential| PoolEntry {
                credential,
                exhausted: false,
            })
            .collect();

        Self {
            provider: provider.into(),
            state: Mutex::new(PoolState {
                entries,
                current: 0,
            }),
            rotations: AtomicU64::new(0),
        }
    }

    /// Provider name used in errors and logs.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Number of credentials in the pool.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the pool holds no credentials at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current credential, or `None` once every credential is exhausted.
    pub fn current(&self) -> Option<C> {
        self.checkout().map(|(_, credential)| credential)
    }

    /// Index of the current credential, or `None` once exhausted.
    pub fn current_index(&self) -> Option<usize> {
        self.checkout().map(|(index, _)| index)
    }

    /// Number of credentials not yet exhausted.
    pub fn available(&self) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| !e.exhausted)
            .count()
    }

    /// Whether every credential has been exhausted.
    pub fn is_exhausted(&self) -> bool {
        !self.state.lock().current_available()
    }

    /// Total number of rotations performed since creation.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Mark the current credential exhausted and advance to the next one.
    ///
    /// Returns the new current credential, or [`ProviderError::Exhausted`]
    /// when none remain.
    pub fn mark_current_exhausted(&self) -> ProviderResult<C> {
        let index = self.current_index().ok_or_else(|| self.exhausted_error())?;
        self.exhaust(index);
        self.current().ok_or_else(|| self.exhausted_error())
    }

    /// Mark the credential at `index` exhausted.
    ///
    /// Only advances the current position when `index` is the current one, so a
    /// stale signal from a concurrent caller cannot burn a fresh credential.
    pub fn exhaust(&self, index: usize) {
        let mut state = self.state.lock();
        let len = state.entries.len();

        let Some(entry) = state.entries.get_mut(index) else {
            return;
        };
        if entry.exhausted {
            return;
        }
        entry.exhausted = true;
        self.rotations.fetch_add(1, Ordering::Relaxed);

        if index != state.current {
            return;
        }

        for offset in 1..len {
            let candidate = (index + offset) % len;
            if !state.entries[candidate].exhausted {
                state.current = candidate;
                info!(
                    provider = %self.provider,
                    from = index + 1,
                    to = candidate + 1,
                    "Rotated to next credential"
                );
                return;
            }
        }

        warn!(provider = %self.provider, credentials = len, "All credentials exhausted");
    }

    /// Clear every exhaustion flag and start again from the first credential.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        for entry in state.entries.iter_mut() {
            entry.exhausted = false;
        }
        state.current = 0;
        info!(provider = %self.provider, "Credential pool reset");
    }

    /// Per-credential status snapshot.
    pub fn status(&self) -> Vec<CredentialStatus> {
        let state = self.state.lock();
        let available = state.current_available();
        state
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| CredentialStatus {
                index,
                exhausted: entry.exhausted,
                current: available && index == state.current,
            })
            .collect()
    }

    /// Run `operation` with the current credential, rotating on rate limits.
    ///
    /// Non-rate-limit errors are returned unchanged; the caller decides whether
    /// to retry them.
    pub async fn call<T, F, Fut>(&self, mut operation: F) -> ProviderResult<T>
    where
        F: FnMut(C) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        loop {
            let (index, credential) = self.checkout().ok_or_else(|| self.exhausted_error())?;

            match operation(credential).await {
                Err(e) if e.is_rate_limit() => {
                    warn!(
                        provider = %self.provider,
                        credential = index + 1,
                        error = %e,
                        "Rate limit hit, rotating credential"
                    );
                    self.exhaust(index);
                }
                other => return other,
            }
        }
    }

    fn checkout(&self) -> Option<(usize, C)> {
        let state = self.state.lock();
        if !state.current_available() {
            return None;
        }
        Some((state.current, state.entries[state.current].credential.clone()))
    }

    fn exhausted_error(&self) -> ProviderError {
        ProviderError::Exhausted {
            provider: self.provider.clone(),
        }
    }
}
