/// Trial loop driven through the `AnnIndex` trait with a scripted index.
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use numa_ann_bench::{run_trials, AnnIndex, IndexConfig, QueryBatch, StopReason, TrialPolicy};

/// Replays a fixed list of elapsed times and always returns `answer`.
struct ScriptedIndex {
    times: Vec<f64>,
    next: Mutex<usize>,
    answer: Vec<Vec<usize>>,
}

impl ScriptedIndex {
    fn new(times: Vec<f64>, answer: Vec<Vec<usize>>) -> Self {
        Self {
            times,
            next: Mutex::new(0),
            answer,
        }
    }

    fn calls(&self) -> usize {
        *self.next.lock().unwrap()
    }
}

impl AnnIndex for ScriptedIndex {
    fn name(&self) -> &str {
        "scripted"
    }

    fn create_index(&mut self, _: &[Vec<f32>], _: &Path, _: &IndexConfig) -> Result<()> {
        Ok(())
    }

    fn load_index(&mut self, _: &[Vec<f32>], _: &Path, _: usize, _: &IndexConfig) -> Result<()> {
        Ok(())
    }

    fn query_batch(&self, _: &[Vec<f32>], _: usize) -> Result<QueryBatch> {
        let mut next = self.next.lock().unwrap();
        let elapsed_s = self.times[*next % self.times.len()];
        *next += 1;
        Ok(QueryBatch {
            neighbors: self.answer.clone(),
            elapsed_s,
        })
    }
}

fn queries(n: usize) -> Vec<Vec<f32>> {
    vec![vec![0.0; 4]; n]
}

#[test]
fn test_constant_batches_stop_at_min_trials() {
    let truth = vec![vec![0, 1, 2], vec![3, 4, 5]];
    let index = ScriptedIndex::new(vec![1.0], truth.clone());
    let policy = TrialPolicy::default();

    let outcome = run_trials(&index, &queries(2), &truth, 3, &policy, "scripted").unwrap();
    assert_eq!(index.calls(), 3);
    assert_eq!(outcome.stop_reason, StopReason::Stable);
    assert_eq!(outcome.aggregate.nb_runs, 3);
    assert!((outcome.aggregate.time.mean - 1.0).abs() < 1e-6);
    assert!((outcome.aggregate.qps.mean - 2.0).abs() < 1e-6);
    assert_eq!(outcome.aggregate.recall.mean, 1.0);
}

#[test]
fn test_noisy_batches_run_until_stable() {
    let truth = vec![vec![0, 1]];
    // population std: 0.471, 0.415, 0.374, then 0.344 at trial 6
    let index = ScriptedIndex::new(vec![1.0, 2.0, 1.0, 1.5, 1.5, 1.5, 1.5, 1.5], truth.clone());
    let policy = TrialPolicy::default().with_std_dev_stop_threshold(0.35);

    let outcome = run_trials(&index, &queries(1), &truth, 2, &policy, "noisy").unwrap();
    assert_eq!(outcome.stop_reason, StopReason::Stable);
    assert_eq!(outcome.trials.len(), 6);
    assert!(outcome.aggregate.time.std <= 0.35);
    assert_eq!(
        outcome.trials.iter().map(|t| t.index).collect::<Vec<_>>(),
        (1..=outcome.trials.len()).collect::<Vec<_>>()
    );
}

#[test]
fn test_zero_ceiling_runs_single_trial() {
    let truth = vec![vec![0]];
    let index = ScriptedIndex::new(vec![0.5], truth.clone());
    let policy = TrialPolicy::default()
        .with_min_trials(10)
        .with_max_elapsed(Duration::ZERO);

    let outcome = run_trials(&index, &queries(1), &truth, 1, &policy, "ceiling").unwrap();
    assert_eq!(index.calls(), 1);
    assert_eq!(outcome.stop_reason, StopReason::Ceiling);
    assert_eq!(outcome.trials.len(), 1);
}

#[test]
fn test_partial_hits_use_integer_counting() {
    // 2 of 3 for the first query, 3 of 3 for the second
    let truth = vec![vec![0, 1, 2], vec![3, 4, 5]];
    let answer = vec![vec![2, 0, 9], vec![5, 4, 3]];
    let index = ScriptedIndex::new(vec![0.25], answer);
    let policy = TrialPolicy::default().with_min_trials(1);

    let outcome = run_trials(&index, &queries(2), &truth, 3, &policy, "partial").unwrap();
    assert_eq!(outcome.trials.len(), 1);
    assert!((outcome.trials[0].recall - 5.0 / 6.0).abs() < 1e-12);
    assert!((outcome.trials[0].qps - 8.0).abs() < 1e-9);
}

#[test]
fn test_ids_beyond_k_are_ignored() {
    let truth = vec![vec![0, 1, 7, 8]];
    let answer = vec![vec![0, 7, 1, 8]];
    let index = ScriptedIndex::new(vec![1.0], answer);
    let policy = TrialPolicy::default().with_min_trials(1);

    let outcome = run_trials(&index, &queries(1), &truth, 2, &policy, "topk").unwrap();
    // top-2 predicted {0, 7} vs top-2 truth {0, 1}
    assert!((outcome.trials[0].recall - 0.5).abs() < 1e-12);
}
