//! Adaptive trial loop.
//!
//! Repeats a query batch until the elapsed-time estimate is stable or a
//! wall-clock ceiling is hit:
//!
//! ```text
//! stop = elapsed_total >= max_elapsed
//!     || (trials >= min_trials && std(trial_time) <= std_dev_stop_threshold)
//! ```
//!
//! The ceiling is only checked between trials; a running batch is never
//! interrupted. It takes precedence over `min_trials`, so a ceiling shorter
//! than the time needed for `min_trials` batches ends the loop early.

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::error::BenchError;
use crate::metrics::{batch_recall, compute_qps, MetricAccumulator, SeriesStats};
use crate::runner::{AnnIndex, QueryBatch};

pub const DEFAULT_MIN_TRIALS: usize = 3;
pub const DEFAULT_MAX_ELAPSED: Duration = Duration::from_secs(60);
pub const DEFAULT_STD_DEV_STOP_THRESHOLD: f64 = 0.1;

/// When to stop repeating query batches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialPolicy {
    /// Trials required before the stability check may stop the loop.
    pub min_trials: usize,
    /// Wall-clock ceiling for the whole loop, measured from its start.
    pub max_elapsed: Duration,
    /// Stop once the population stddev of trial times (seconds) is at or below this.
    pub std_dev_stop_threshold: f64,
}

impl Default for TrialPolicy {
    fn default() -> Self {
        Self {
            min_trials: DEFAULT_MIN_TRIALS,
            max_elapsed: DEFAULT_MAX_ELAPSED,
            std_dev_stop_threshold: DEFAULT_STD_DEV_STOP_THRESHOLD,
        }
    }
}

impl TrialPolicy {
    pub fn with_min_trials(mut self, n: usize) -> Self {
        self.min_trials = n;
        self
    }

    pub fn with_max_elapsed(mut self, max: Duration) -> Self {
        self.max_elapsed = max;
        self
    }

    pub fn with_std_dev_stop_threshold(mut self, threshold: f64) -> Self {
        self.std_dev_stop_threshold = threshold;
        self
    }

    /// Decide whether to stop after `trials` completed trials.
    pub fn stop_reason(
        &self,
        trials: usize,
        time_std: f64,
        wall_elapsed: Duration,
    ) -> Option<StopReason> {
        if wall_elapsed >= self.max_elapsed {
            Some(StopReason::Ceiling)
        } else if trials >= self.min_trials && time_std <= self.std_dev_stop_threshold {
            Some(StopReason::Stable)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Trial times settled after the minimum number of trials.
    Stable,
    /// The wall-clock ceiling was reached.
    Ceiling,
}

/// One measured query batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    /// 1-based position within the loop.
    pub index: usize,
    pub recall: f64,
    pub elapsed_s: f64,
    pub qps: f64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Aggregate over every trial of one loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RunAggregate {
    pub nb_runs: usize,
    pub recall: SeriesStats,
    pub time: SeriesStats,
    pub qps: SeriesStats,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TrialOutcome {
    pub aggregate: RunAggregate,
    pub trials: Vec<Trial>,
    pub stop_reason: StopReason,
}

/// Run query batches against `index` until `policy` says stop.
///
/// `ground_truth` has one row per query; `k` bounds both the prediction and
/// ground-truth lists. Any failing batch aborts the loop and nothing is
/// aggregated.
pub fn run_trials(
    index: &dyn AnnIndex,
    queries: &[Vec<f32>],
    ground_truth: &[Vec<usize>],
    k: usize,
    policy: &TrialPolicy,
    label: &str,
) -> Result<TrialOutcome> {
    run_trials_with(
        |_| index.query_batch(queries, k),
        queries.len(),
        ground_truth,
        k,
        policy,
        index.name(),
        label,
    )
}

/// Same as [`run_trials`], with the batch supplied as a closure taking the
/// 1-based trial number.
pub fn run_trials_with<F>(
    mut query_batch: F,
    num_queries: usize,
    ground_truth: &[Vec<usize>],
    k: usize,
    policy: &TrialPolicy,
    runner: &str,
    label: &str,
) -> Result<TrialOutcome>
where
    F: FnMut(usize) -> Result<QueryBatch>,
{
    let mut acc = MetricAccumulator::new();
    let mut trials = Vec::new();
    let loop_start = Instant::now();

    loop {
        let trial_no = trials.len() + 1;

        let started_at = Utc::now();
        let batch = query_batch(trial_no).map_err(|e| BenchError::QueryBatch {
            runner: runner.to_string(),
            trial: trial_no,
            reason: format!("{:#}", e),
        })?;
        let ended_at = Utc::now();

        if !(batch.elapsed_s.is_finite() && batch.elapsed_s > 0.0) {
            return Err(BenchError::InvalidTrial {
                trial: trial_no,
                reason: format!("elapsed time {} is not a positive duration", batch.elapsed_s),
            }
            .into());
        }

        let recall = batch_recall(&batch.neighbors, ground_truth, k).map_err(|e| match e {
            BenchError::InvalidTrial { reason, .. } => BenchError::InvalidTrial {
                trial: trial_no,
                reason,
            },
            other => other,
        })?;

        acc.observe(recall, batch.elapsed_s, num_queries);
        trials.push(Trial {
            index: trial_no,
            recall,
            elapsed_s: batch.elapsed_s,
            qps: compute_qps(num_queries, batch.elapsed_s),
            started_at,
            ended_at,
        });

        let time = acc.time();
        let wall_elapsed = loop_start.elapsed();
        tracing::info!(
            "Run {} (min {}) [{}] elapsed {:.2}s (max {}s) +- {:.4}s (min {:.4})",
            trial_no,
            policy.min_trials,
            label,
            wall_elapsed.as_secs_f64(),
            policy.max_elapsed.as_secs_f64(),
            time.std,
            policy.std_dev_stop_threshold
        );

        if let Some(stop_reason) = policy.stop_reason(trials.len(), time.std, wall_elapsed) {
            if stop_reason == StopReason::Ceiling && trials.len() < policy.min_trials {
                tracing::warn!(
                    "[{}] wall-clock ceiling reached after {} of {} minimum trials",
                    label,
                    trials.len(),
                    policy.min_trials
                );
            }

            let aggregate = RunAggregate {
                nb_runs: acc.len(),
                recall: acc.recall(),
                time,
                qps: acc.qps(),
                started_at: trials[0].started_at,
                ended_at: trials[trials.len() - 1].ended_at,
            };
            return Ok(TrialOutcome {
                aggregate,
                trials,
                stop_reason,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact_batch(gt: &[Vec<usize>], elapsed_s: f64) -> QueryBatch {
        QueryBatch {
            neighbors: gt.to_vec(),
            elapsed_s,
        }
    }

    #[test]
    fn test_policy_defaults() {
        let policy = TrialPolicy::default();
        assert_eq!(policy.min_trials, 3);
        assert_eq!(policy.max_elapsed, Duration::from_secs(60));
        assert!((policy.std_dev_stop_threshold - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_stop_reason_ceiling_wins() {
        let policy = TrialPolicy::default().with_max_elapsed(Duration::from_secs(1));
        assert_eq!(
            policy.stop_reason(1, 5.0, Duration::from_secs(2)),
            Some(StopReason::Ceiling)
        );
        assert_eq!(
            policy.stop_reason(3, 0.0, Duration::from_secs(2)),
            Some(StopReason::Ceiling)
        );
        assert_eq!(
            policy.stop_reason(3, 0.0, Duration::from_millis(10)),
            Some(StopReason::Stable)
        );
        assert_eq!(policy.stop_reason(2, 0.0, Duration::from_millis(10)), None);
        assert_eq!(policy.stop_reason(5, 0.2, Duration::from_millis(10)), None);
    }

    #[test]
    fn test_constant_time_stops_at_min_trials() {
        let gt = vec![vec![1, 2], vec![3, 4]];
        let policy = TrialPolicy::default()
            .with_min_trials(3)
            .with_std_dev_stop_threshold(0.1)
            .with_max_elapsed(Duration::from_secs(60));

        let mut calls = 0;
        let outcome = run_trials_with(
            |_| {
                calls += 1;
                Ok(exact_batch(&gt, 1.0))
            },
            2,
            &gt,
            2,
            &policy,
            "mock",
            "default",
        )
        .unwrap();

        assert_eq!(calls, 3);
        assert_eq!(outcome.aggregate.nb_runs, 3);
        assert_eq!(outcome.stop_reason, StopReason::Stable);
        assert_eq!(outcome.aggregate.time.std, 0.0);
        assert!((outcome.aggregate.qps.mean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_ceiling_runs_one_trial() {
        let gt = vec![vec![0]];
        let policy = TrialPolicy::default()
            .with_min_trials(5)
            .with_max_elapsed(Duration::ZERO);

        let outcome = run_trials_with(
            |_| Ok(exact_batch(&gt, 0.5)),
            1,
            &gt,
            1,
            &policy,
            "mock",
            "default",
        )
        .unwrap();

        assert_eq!(outcome.trials.len(), 1);
        assert_eq!(outcome.stop_reason, StopReason::Ceiling);
    }

    #[test]
    fn test_unstable_times_stop_at_ceiling() {
        let gt = vec![vec![0]];
        let policy = TrialPolicy::default()
            .with_min_trials(2)
            .with_std_dev_stop_threshold(0.01)
            .with_max_elapsed(Duration::from_millis(30));

        // alternating 1s / 3s keeps the stddev at or above 1.0
        let outcome = run_trials_with(
            |n| {
                std::thread::sleep(Duration::from_millis(5));
                Ok(exact_batch(&gt, if n % 2 == 0 { 3.0 } else { 1.0 }))
            },
            1,
            &gt,
            1,
            &policy,
            "mock",
            "default",
        )
        .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::Ceiling);
        assert!(outcome.trials.len() >= 2);
    }

    #[test]
    fn test_exact_trials_have_perfect_recall() {
        let gt = vec![vec![1, 2], vec![3, 4]];
        let policy = TrialPolicy::default().with_min_trials(2);

        let outcome = run_trials_with(
            |_| Ok(exact_batch(&gt, 0.25)),
            2,
            &gt,
            2,
            &policy,
            "mock",
            "default",
        )
        .unwrap();

        assert_eq!(outcome.trials.len(), 2);
        assert_eq!(outcome.aggregate.recall.mean, 1.0);
        assert_eq!(outcome.aggregate.recall.std, 0.0);
        assert!(outcome.trials.iter().all(|t| t.started_at <= t.ended_at));
        assert_eq!(outcome.trials[1].index, 2);
    }

    #[test]
    fn test_failing_trial_propagates() {
        let gt = vec![vec![0]];
        let policy = TrialPolicy::default();
        let mut calls = 0;

        let err = run_trials_with(
            |n| {
                calls += 1;
                if n == 2 {
                    anyhow::bail!("index segfaulted")
                }
                Ok(exact_batch(&gt, 1.0))
            },
            1,
            &gt,
            1,
            &policy,
            "mock",
            "default",
        )
        .unwrap_err();

        assert_eq!(calls, 2);
        match crate::error::classify(&err) {
            Some(BenchError::QueryBatch { trial, reason, .. }) => {
                assert_eq!(*trial, 2);
                assert!(reason.contains("segfaulted"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_positive_elapsed_is_invalid() {
        let gt = vec![vec![0]];
        let err = run_trials_with(
            |_| Ok(exact_batch(&gt, 0.0)),
            1,
            &gt,
            1,
            &TrialPolicy::default(),
            "mock",
            "default",
        )
        .unwrap_err();

        assert!(matches!(
            crate::error::classify(&err),
            Some(BenchError::InvalidTrial { trial: 1, .. })
        ));
    }

    #[test]
    fn test_wrong_row_count_is_invalid() {
        let gt = vec![vec![0], vec![1]];
        let err = run_trials_with(
            |_| {
                Ok(QueryBatch {
                    neighbors: vec![vec![0]],
                    elapsed_s: 1.0,
                })
            },
            2,
            &gt,
            1,
            &TrialPolicy::default(),
            "mock",
            "default",
        )
        .unwrap_err();

        assert!(matches!(
            crate::error::classify(&err),
            Some(BenchError::InvalidTrial { trial: 1, .. })
        ));
    }
}
