//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::Path;

use numa_ann_bench::{Dataset, Distance, ResultKey, RunAggregate, SeriesStats, TrialPolicy};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use chrono::Utc;
use std::time::Duration;

pub const DIM: usize = 8;
pub const NUM_TRAIN: usize = 200;
pub const NUM_TEST: usize = 12;
pub const K: usize = 5;

pub fn random_vectors(rng: &mut ChaCha8Rng, n: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect()
}

/// Exact top-k by brute force, ties broken by id.
pub fn exact_neighbors(
    train: &[Vec<f32>],
    test: &[Vec<f32>],
    k: usize,
    distance: Distance,
) -> Vec<Vec<usize>> {
    test.iter()
        .map(|q| {
            let mut scored: Vec<(usize, f32)> = train
                .iter()
                .enumerate()
                .map(|(i, v)| (i, distance.compute(q, v)))
                .collect();
            scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            scored.into_iter().take(k).map(|(i, _)| i).collect()
        })
        .collect()
}

pub fn synthetic_dataset(seed: u64, distance: Distance) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let train = random_vectors(&mut rng, NUM_TRAIN, DIM);
    let test = random_vectors(&mut rng, NUM_TEST, DIM);
    let neighbors = exact_neighbors(&train, &test, K, distance);
    Dataset {
        train,
        test,
        neighbors,
    }
}

/// Write a synthetic fvecs bundle named `name` under `data_dir`.
pub fn write_bundle(data_dir: &Path, name: &str, seed: u64, distance: Distance) -> Dataset {
    let dataset = synthetic_dataset(seed, distance);
    dataset
        .save_fvecs_bundle(&data_dir.join(name))
        .expect("Failed to write dataset bundle");
    dataset
}

/// A policy that stops after two trials on any reasonable machine.
pub fn quick_policy() -> TrialPolicy {
    TrialPolicy::default()
        .with_min_trials(2)
        .with_max_elapsed(Duration::from_secs(30))
        .with_std_dev_stop_threshold(1.0)
}

pub fn aggregate(nb_runs: usize, recall: f64, time: f64) -> RunAggregate {
    let now = Utc::now();
    RunAggregate {
        nb_runs,
        recall: SeriesStats {
            mean: recall,
            std: 0.0,
        },
        time: SeriesStats {
            mean: time,
            std: 0.01,
        },
        qps: SeriesStats {
            mean: 1000.0 / time,
            std: 1.0,
        },
        started_at: now,
        ended_at: now,
    }
}

pub fn key(dataset: &str, runner: &str, tag: &str) -> ResultKey {
    ResultKey::new(dataset, runner, tag)
}
