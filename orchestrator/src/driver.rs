//! Recurring round driver.
//!
//! Drives the aggregation cadence the way the engine expects it: keep the
//! submission window open for a fixed duration, close it, wait a short
//! settle delay for in-flight artifact writes to land, aggregate, advance.
//! Rounds are driven strictly in increasing order; the driver stops on the
//! first failed round so a bad submission set can be resolved before the
//! lineage advances.

use std::sync::Arc;
use std::time::Duration;

use fed_core::config::RoundConfig;
use fed_core::{Aggregator, ArtifactStore, FedError, Result, RoundOutcome, RoundReport};

pub struct RoundDriver {
    store: Arc<dyn ArtifactStore>,
    engine: Aggregator,
    round_duration: Duration,
    aggregation_delay: Duration,
}

impl RoundDriver {
    pub fn new(store: Arc<dyn ArtifactStore>, config: &RoundConfig) -> Self {
        Self {
            engine: Aggregator::new(store.clone()),
            store,
            round_duration: Duration::from_millis(config.round_duration_ms),
            aggregation_delay: Duration::from_millis(config.aggregation_delay_ms),
        }
    }

    /// Drives rounds until a round fails.
    ///
    /// # Errors
    ///
    /// Returns [`FedError::NotFound`] for round 0 if the store holds no
    /// baseline, or whatever error ended the first failing round.
    pub async fn run(&self) -> Result<()> {
        let mut round = match self.store.latest_round()? {
            Some(latest) => latest + 1,
            None => return Err(FedError::not_found(0)),
        };

        loop {
            let report = self.run_round(round).await?;
            match report.outcome {
                RoundOutcome::Merged => {
                    tracing::info!(
                        round,
                        providers = report.providers.len(),
                        "round merged"
                    );
                }
                RoundOutcome::CarriedForward => {
                    tracing::warn!(round, "no submissions; carried forward previous state");
                }
            }
            round += 1;
        }
    }

    /// Runs a single round: window, cutoff, settle delay, aggregate.
    pub async fn run_round(&self, round: u64) -> Result<RoundReport> {
        tracing::info!(round, "submission window open");
        tokio::time::sleep(self.round_duration).await;

        self.store.close_round(round)?;
        tracing::debug!(round, "submission window closed");
        tokio::time::sleep(self.aggregation_delay).await;

        self.engine.aggregate(round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fed_core::{MemoryStore, ModelState, Submission, Tensor};

    fn baseline_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let mut state = ModelState::new();
        state.insert("w", Tensor::new(vec![2], vec![1.0, 3.0]).unwrap());
        store.save_global_state(0, &state).unwrap();
        store
    }

    fn fast_config() -> RoundConfig {
        RoundConfig {
            round_duration_ms: 50,
            aggregation_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_run_requires_baseline() {
        let store: Arc<dyn ArtifactStore> = Arc::new(MemoryStore::new());
        let driver = RoundDriver::new(store, &fast_config());

        let err = driver.run().await.unwrap_err();
        assert!(matches!(err, FedError::NotFound { round: 0 }));
    }

    #[tokio::test]
    async fn test_round_merges_submission_arriving_in_window() {
        let store = baseline_store();
        let driver = RoundDriver::new(store.clone(), &fast_config());

        let submitter = store.clone();
        let handle = tokio::spawn(async move {
            // Land well inside the 50 ms window.
            tokio::time::sleep(Duration::from_millis(5)).await;
            let mut state = ModelState::new();
            state.insert("w", Tensor::new(vec![2], vec![2.0, 4.0]).unwrap());
            submitter
                .put_submission(&Submission::new(1, "node-a", state))
                .unwrap();
        });

        let report = driver.run_round(1).await.unwrap();
        handle.await.unwrap();

        assert_eq!(report.outcome, RoundOutcome::Merged);
        assert_eq!(report.providers, vec!["node-a"]);
        assert!(store.has_global_state(1).unwrap());
    }

    #[tokio::test]
    async fn test_empty_round_carries_forward_and_continues() {
        let store = baseline_store();
        let driver = RoundDriver::new(store.clone(), &fast_config());

        let report = driver.run_round(1).await.unwrap();
        assert_eq!(report.outcome, RoundOutcome::CarriedForward);

        // The lineage advanced, so the next round is aggregatable.
        let report = driver.run_round(2).await.unwrap();
        assert_eq!(report.outcome, RoundOutcome::CarriedForward);
        assert_eq!(store.latest_round().unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_window_closes_before_aggregation() {
        let store = baseline_store();
        let driver = RoundDriver::new(store.clone(), &fast_config());

        driver.run_round(1).await.unwrap();

        assert!(store.is_round_closed(1).unwrap());
        // A straggler arriving after the round completed is rejected.
        let mut state = ModelState::new();
        state.insert("w", Tensor::new(vec![2], vec![0.0, 0.0]).unwrap());
        let err = store
            .put_submission(&Submission::new(1, "late", state))
            .unwrap_err();
        assert!(matches!(err, FedError::RoundClosed { round: 1 }));
    }
}
