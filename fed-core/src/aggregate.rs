// fed-core/src/aggregate.rs

//! Round-based aggregation engine.
//!
//! For a target round R (R ≥ 1), the engine reads round R−1's global state
//! and every submission tagged for R, validates the submission set, and
//! persists round R's global state:
//!
//! 1. **Fetch** — take a snapshot of the round's submissions, sorted by
//!    provider identity so summation order is fixed across reruns.
//! 2. **Validate** — reject duplicate provider identities and any
//!    submission whose parameter set or shapes diverge from the prior
//!    state's schema. A validation failure aborts the round with no write.
//! 3. **Combine or carry forward** — with no submissions, the new state is
//!    the prior state unchanged (a zero-participation round stalls progress
//!    but never blocks or corrupts the lineage); otherwise the states are
//!    merged by element-wise arithmetic mean, every submitting provider
//!    weighted equally.
//! 4. **Persist** — exactly one write, atomic at the store layer.
//!
//! Combining is a pure fold over the snapshot: given the same prior state
//! and the same submission set, the result is bit-for-bit identical.
//! Sums accumulate in `f64` and round to `f32` once per element, so the
//! outcome does not depend on how the platform chains `f32` additions.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{FedError, Result};
use crate::model::{ModelState, Submission, Tensor};
use crate::store::ArtifactStore;

/// Per-provider weighting hook.
///
/// The default is uniform (every submitting provider counts equally);
/// a sample-size-weighted deployment supplies its own function.
pub type WeightFn = dyn Fn(&str) -> f64 + Send + Sync;

/// How a round reached its new global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Submissions were merged into a new state.
    Merged,
    /// No submissions arrived; the prior state was persisted unchanged.
    CarriedForward,
}

/// Result metadata for a completed round.
///
/// Callers distinguish real progress from a stalled round through
/// [`RoundReport::outcome`] rather than by comparing states.
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub round: u64,
    pub outcome: RoundOutcome,
    /// Providers whose submissions were merged, in summation order.
    /// Empty for a carried-forward round.
    pub providers: Vec<String>,
}

/// The aggregation engine.
pub struct Aggregator {
    store: Arc<dyn ArtifactStore>,
    weighting: Option<Box<WeightFn>>,
}

impl Aggregator {
    /// Creates an engine with uniform provider weighting (FedAvg-equal).
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            weighting: None,
        }
    }

    /// Creates an engine that weights each provider by `weight(provider)`.
    ///
    /// Weights are normalized over the submitting set each round. Every
    /// weight must be finite and positive.
    pub fn with_weighting(
        store: Arc<dyn ArtifactStore>,
        weight: impl Fn(&str) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            weighting: Some(Box::new(weight)),
        }
    }

    /// Computes and persists round `round`'s global state.
    ///
    /// # Errors
    ///
    /// - [`FedError::NotFound`] if round `round − 1` has no persisted state
    ///   (rounds aggregate strictly in increasing order).
    /// - [`FedError::DuplicateSubmission`] if two submissions share a
    ///   provider identity.
    /// - [`FedError::SchemaMismatch`] if a submission's parameters diverge
    ///   from the prior state's schema.
    /// - Storage errors from the underlying store, surfaced verbatim and
    ///   never retried here.
    ///
    /// On any error no state is written for `round`; the prior round
    /// remains the latest.
    pub fn aggregate(&self, round: u64) -> Result<RoundReport> {
        if round == 0 {
            return Err(FedError::config(
                "round 0 is the bootstrap baseline and is never aggregated",
            ));
        }

        let prior = self.store.load_global_state(round - 1)?;

        let mut submissions = self.store.list_submissions(round)?;
        // Fixed summation order: floating-point addition is not
        // associative, so reruns must fold in the same order.
        submissions.sort_by(|a, b| a.provider.cmp(&b.provider));

        validate(round, &prior, &submissions)?;

        if submissions.is_empty() {
            self.store.save_global_state(round, &prior)?;
            return Ok(RoundReport {
                round,
                outcome: RoundOutcome::CarriedForward,
                providers: Vec::new(),
            });
        }

        let combined = match &self.weighting {
            None => combine(&prior, &submissions)?,
            Some(weight) => combine_weighted(&prior, &submissions, weight)?,
        };

        self.store.save_global_state(round, &combined)?;

        Ok(RoundReport {
            round,
            outcome: RoundOutcome::Merged,
            providers: submissions.into_iter().map(|s| s.provider).collect(),
        })
    }
}

/// Rejects duplicate providers and schema divergence.
fn validate(round: u64, prior: &ModelState, submissions: &[Submission]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for submission in submissions {
        if !seen.insert(submission.provider.as_str()) {
            return Err(FedError::duplicate_submission(round, &submission.provider));
        }
    }

    for submission in submissions {
        prior.check_compatible(&submission.state).map_err(|v| {
            FedError::schema_mismatch(&submission.provider, v.parameter, v.detail)
        })?;
    }

    Ok(())
}

/// Unweighted element-wise mean across submissions: a pure fold, no shared
/// accumulator escapes this function.
///
/// Callers must have validated schema compatibility; the parameter lookups
/// re-check it so a contract slip surfaces as an error instead of a panic.
pub fn combine(prior: &ModelState, submissions: &[Submission]) -> Result<ModelState> {
    let count = submissions.len() as f64;
    let mut combined = ModelState::new();

    for (name, tensor) in prior.iter() {
        let mut acc = vec![0.0f64; tensor.len()];

        for submission in submissions {
            let theirs = lookup(submission, name)?;
            for (slot, &x) in acc.iter_mut().zip(theirs.data()) {
                *slot += f64::from(x);
            }
        }

        let data = acc.into_iter().map(|sum| (sum / count) as f32).collect();
        combined.insert(name.clone(), Tensor::new(tensor.shape().to_vec(), data)?);
    }

    Ok(combined)
}

/// Weighted element-wise mean; weights are normalized over the submitting
/// set so they need not sum to one.
fn combine_weighted(
    prior: &ModelState,
    submissions: &[Submission],
    weight: &WeightFn,
) -> Result<ModelState> {
    let mut weights = Vec::with_capacity(submissions.len());
    for submission in submissions {
        let w = weight(&submission.provider);
        if !w.is_finite() || w <= 0.0 {
            return Err(FedError::InvalidWeight {
                provider: submission.provider.clone(),
                weight: w,
            });
        }
        weights.push(w);
    }
    let total: f64 = weights.iter().sum();

    let mut combined = ModelState::new();
    for (name, tensor) in prior.iter() {
        let mut acc = vec![0.0f64; tensor.len()];

        for (submission, &w) in submissions.iter().zip(&weights) {
            let theirs = lookup(submission, name)?;
            let scale = w / total;
            for (slot, &x) in acc.iter_mut().zip(theirs.data()) {
                *slot += scale * f64::from(x);
            }
        }

        let data = acc.into_iter().map(|sum| sum as f32).collect();
        combined.insert(name.clone(), Tensor::new(tensor.shape().to_vec(), data)?);
    }

    Ok(combined)
}

fn lookup<'a>(submission: &'a Submission, name: &str) -> Result<&'a Tensor> {
    submission.state.get(name).ok_or_else(|| {
        FedError::schema_mismatch(&submission.provider, name, "parameter missing")
    })
}
