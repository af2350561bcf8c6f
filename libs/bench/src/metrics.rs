//! Recall, throughput, and running statistics for repeated query batches.

use std::collections::HashSet;

use crate::error::BenchError;

/// Number of ids shared by the top-k predictions and the top-k ground truth.
///
/// Both lists are treated as sets, so duplicate ids never count twice.
pub fn count_hits(predicted: &[usize], truth: &[usize], k: usize) -> usize {
    let retrieved: HashSet<_> = predicted.iter().take(k).collect();
    let relevant: HashSet<_> = truth.iter().take(k).collect();
    retrieved.intersection(&relevant).count()
}

/// Recall@k over a whole batch: total hits / (queries * k).
///
/// Hits are summed as integers and divided once, so a perfect batch yields
/// exactly 1.0.
pub fn batch_recall(
    predicted: &[Vec<usize>],
    ground_truth: &[Vec<usize>],
    k: usize,
) -> Result<f64, BenchError> {
    if predicted.len() != ground_truth.len() {
        return Err(BenchError::InvalidTrial {
            trial: 0,
            reason: format!(
                "index returned {} result rows for {} queries",
                predicted.len(),
                ground_truth.len()
            ),
        });
    }
    let total = ground_truth.len() * k;
    if total == 0 {
        return Err(BenchError::InvalidTrial {
            trial: 0,
            reason: "recall is undefined for an empty query set or k = 0".to_string(),
        });
    }

    let hits: usize = predicted
        .iter()
        .zip(ground_truth.iter())
        .map(|(pred, truth)| count_hits(pred, truth, k))
        .sum();

    Ok(hits as f64 / total as f64)
}

/// Queries per second for one batch.
pub fn compute_qps(num_queries: usize, elapsed_s: f64) -> f64 {
    if elapsed_s <= 0.0 {
        return 0.0;
    }
    num_queries as f64 / elapsed_s
}

/// Mean and population standard deviation of a series.
///
/// Both are 0.0 for an empty series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeriesStats {
    pub mean: f64,
    pub std: f64,
}

impl SeriesStats {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: variance.sqrt(),
        }
    }
}

/// One value per tracked metric.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    pub recall: f64,
    pub time: f64,
    pub qps: f64,
}

/// Running statistics over recall, elapsed time and QPS of observed trials.
#[derive(Debug, Clone, Default)]
pub struct MetricAccumulator {
    recalls: Vec<f64>,
    times: Vec<f64>,
    qps: Vec<f64>,
}

impl MetricAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one trial. QPS is derived from `query_count / elapsed_s`.
    pub fn observe(&mut self, recall: f64, elapsed_s: f64, query_count: usize) {
        self.recalls.push(recall);
        self.times.push(elapsed_s);
        self.qps.push(compute_qps(query_count, elapsed_s));
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn recall(&self) -> SeriesStats {
        SeriesStats::from_values(&self.recalls)
    }

    pub fn time(&self) -> SeriesStats {
        SeriesStats::from_values(&self.times)
    }

    pub fn qps(&self) -> SeriesStats {
        SeriesStats::from_values(&self.qps)
    }

    pub fn mean(&self) -> Metrics {
        Metrics {
            recall: self.recall().mean,
            time: self.time().mean,
            qps: self.qps().mean,
        }
    }

    /// Population standard deviations (divide by N).
    pub fn stddev(&self) -> Metrics {
        Metrics {
            recall: self.recall().std,
            time: self.time().std,
            qps: self.qps().std,
        }
    }

    pub fn reset(&mut self) {
        self.recalls.clear();
        self.times.clear();
        self.qps.clear();
    }
}
