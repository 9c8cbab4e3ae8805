// fed-core/src/store/memory.rs

//! In-process artifact store.
//!
//! Backs the same contract as [`super::LocalStore`] with plain maps behind
//! a mutex. Used for embedding the engine without a filesystem and as the
//! store double in engine tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::traits::ArtifactStore;
use crate::error::{FedError, Result};
use crate::model::{validate_provider_id, ModelState, Submission};

#[derive(Default)]
struct Inner {
    globals: BTreeMap<u64, ModelState>,
    submissions: BTreeMap<u64, BTreeMap<String, Submission>>,
    closed: BTreeSet<u64>,
}

/// Mutex-guarded in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a submission without duplicate or window checks.
    ///
    /// The regular [`ArtifactStore::put_submission`] enforces the protocol,
    /// which makes engine-side validation unreachable through it; this hook
    /// exists so tests can inject the protocol violations the engine must
    /// catch (and so listings can be seeded from stores with weaker
    /// guarantees).
    pub fn push_unchecked(&self, submission: Submission) {
        let mut inner = self.lock();
        // BTreeMap keys dedupe by provider; append a discriminator so a
        // second entry for the same provider is retained for listing.
        let key = format!("{}#{}", submission.provider, nonce(&inner));
        inner
            .submissions
            .entry(submission.round)
            .or_default()
            .insert(key, submission);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens if another thread panicked while
        // holding the guard; continuing with the inner data is fine here.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn nonce(inner: &Inner) -> usize {
    inner.submissions.values().map(BTreeMap::len).sum()
}

impl ArtifactStore for MemoryStore {
    fn load_global_state(&self, round: u64) -> Result<ModelState> {
        self.lock()
            .globals
            .get(&round)
            .cloned()
            .ok_or_else(|| FedError::not_found(round))
    }

    fn save_global_state(&self, round: u64, state: &ModelState) -> Result<()> {
        let mut inner = self.lock();
        if inner.globals.contains_key(&round) {
            return Err(FedError::StateExists { round });
        }
        inner.globals.insert(round, state.clone());
        Ok(())
    }

    fn has_global_state(&self, round: u64) -> Result<bool> {
        Ok(self.lock().globals.contains_key(&round))
    }

    fn latest_round(&self) -> Result<Option<u64>> {
        Ok(self.lock().globals.keys().next_back().copied())
    }

    fn put_submission(&self, submission: &Submission) -> Result<()> {
        validate_provider_id(&submission.provider)?;

        let mut inner = self.lock();
        if inner.closed.contains(&submission.round) {
            return Err(FedError::RoundClosed {
                round: submission.round,
            });
        }

        let slots = inner.submissions.entry(submission.round).or_default();
        if slots.contains_key(&submission.provider) {
            return Err(FedError::duplicate_submission(
                submission.round,
                &submission.provider,
            ));
        }
        slots.insert(submission.provider.clone(), submission.clone());
        Ok(())
    }

    fn list_submissions(&self, round: u64) -> Result<Vec<Submission>> {
        let inner = self.lock();
        let mut listed: Vec<_> = inner
            .submissions
            .get(&round)
            .map(|slots| slots.values().cloned().collect())
            .unwrap_or_default();
        listed.sort_by(|a: &Submission, b: &Submission| a.provider.cmp(&b.provider));
        Ok(listed)
    }

    fn providers_seen(&self, round: u64) -> Result<BTreeSet<String>> {
        Ok(self
            .list_submissions(round)?
            .into_iter()
            .map(|s| s.provider)
            .collect())
    }

    fn close_round(&self, round: u64) -> Result<()> {
        self.lock().closed.insert(round);
        Ok(())
    }

    fn is_round_closed(&self, round: u64) -> Result<bool> {
        Ok(self.lock().closed.contains(&round))
    }
}
