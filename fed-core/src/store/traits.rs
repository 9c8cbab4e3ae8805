// fed-core/src/store/traits.rs

//! The artifact store contract.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::model::{ModelState, Submission};

/// Round-indexed storage for global model states and provider submissions.
///
/// Implementations must uphold:
///
/// - **Write-once global states**: a round's global state, once persisted,
///   is never replaced. A second `save_global_state` for the same round
///   fails with [`crate::error::FedError::StateExists`].
/// - **One submission per provider per round**: the first write wins; a
///   second submission for the same (round, provider) key fails with
///   [`crate::error::FedError::DuplicateSubmission`] rather than silently
///   overwriting.
/// - **Snapshot listings**: `list_submissions` reflects the set of
///   submissions present at the moment of the call. A submission that
///   lands after the listing returns is not part of that snapshot.
/// - **Window cutoff**: after `close_round`, further submissions for that
///   round fail with [`crate::error::FedError::RoundClosed`]. Closing is
///   idempotent.
///
/// # Object Safety
///
/// This trait is object-safe and is used as `Arc<dyn ArtifactStore>`.
pub trait ArtifactStore: Send + Sync {
    /// Loads the global state persisted for `round`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::FedError::NotFound`] if no state exists for
    /// `round` (e.g. requesting round R before round R−1 was aggregated),
    /// or a storage error if the read fails.
    fn load_global_state(&self, round: u64) -> Result<ModelState>;

    /// Persists `state` as the authoritative global state for `round`.
    ///
    /// The write is atomic: either the full state becomes visible or
    /// nothing does.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::FedError::StateExists`] if a state is
    /// already persisted for `round`, or a storage error if the write
    /// fails.
    fn save_global_state(&self, round: u64, state: &ModelState) -> Result<()>;

    /// Whether a global state exists for `round`.
    fn has_global_state(&self, round: u64) -> Result<bool>;

    /// The highest round with a persisted global state, if any.
    fn latest_round(&self) -> Result<Option<u64>>;

    /// Records a provider's submission for its round.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::FedError::DuplicateSubmission`] if this
    /// provider already submitted for the round,
    /// [`crate::error::FedError::RoundClosed`] if the round's submission
    /// window has been closed, or
    /// [`crate::error::FedError::InvalidProvider`] if the provider identity
    /// cannot name an artifact.
    fn put_submission(&self, submission: &Submission) -> Result<()>;

    /// Returns all submissions currently tagged for `round`.
    ///
    /// May be empty. The result is a consistent snapshot ordered by
    /// provider identity.
    fn list_submissions(&self, round: u64) -> Result<Vec<Submission>>;

    /// Provider identities with a submission recorded for `round`.
    fn providers_seen(&self, round: u64) -> Result<BTreeSet<String>>;

    /// Closes the submission window for `round`. Idempotent.
    fn close_round(&self, round: u64) -> Result<()>;

    /// Whether the submission window for `round` has been closed.
    fn is_round_closed(&self, round: u64) -> Result<bool>;
}
