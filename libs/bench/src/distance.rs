//! Distance families for benchmark datasets.
//!
//! The family is fixed per dataset. It selects the metric an index is built
//! with and, for the flat baseline, the metric queries are ranked by.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BenchError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    /// Squared Euclidean distance. Same ranking as L2.
    #[serde(alias = "euclidean")]
    L2,
    /// Cosine distance: 1 - cos(a, b)
    #[serde(alias = "angular")]
    Cosine,
}

impl Distance {
    /// Distance between two vectors; lower is more similar.
    pub fn compute(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Distance::L2 => euclidean_squared(a, b),
            Distance::Cosine => cosine(a, b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::L2 => "l2",
            Distance::Cosine => "cosine",
        }
    }

    /// Parse the family from an ann-benchmarks style name,
    /// `<name>-<dim>-<family>[.hdf5]`, e.g. `sift-128-euclidean.hdf5`.
    ///
    /// Only the final `-` separated component is considered.
    pub fn from_dataset_name(name: &str) -> Result<Self, BenchError> {
        let base = name.strip_suffix(".hdf5").unwrap_or(name);
        let family = base.rsplit('-').next().unwrap_or(base);
        family.parse().map_err(|_| {
            BenchError::unsupported(format!(
                "cannot determine distance family of dataset '{}' (expected a '-angular' or \
                 '-euclidean' suffix, or an explicit distance in the tuning config)",
                name
            ))
        })
    }
}

impl FromStr for Distance {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Distance::L2),
            "cosine" | "angular" => Ok(Distance::Cosine),
            other => Err(BenchError::unsupported(format!(
                "unknown distance family '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Squared L2 distance.
pub fn euclidean_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).fold(0.0, |acc, (x, y)| acc + (x - y).powi(2))
}

/// `1 - cos(a, b)`. A zero vector is at distance 1 from everything.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let denom = (aa * bb).sqrt();
    if denom == 0.0 {
        1.0
    } else {
        1.0 - dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_squared() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0, 6.0];
        assert!((euclidean_squared(&a, &b) - 27.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_parallel() {
        let a = vec![1.0, 0.0];
        let b = vec![2.0, 0.0];
        assert!(cosine(&a, &b).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_from_dataset_name() {
        assert_eq!(
            Distance::from_dataset_name("glove-100-angular.hdf5").unwrap(),
            Distance::Cosine
        );
        assert_eq!(
            Distance::from_dataset_name("gist-960-euclidean").unwrap(),
            Distance::L2
        );
    }

    #[test]
    fn test_from_dataset_name_unknown_family() {
        let err = Distance::from_dataset_name("nytimes-256-jaccard.hdf5").unwrap_err();
        assert!(matches!(err, BenchError::UnsupportedConfig(_)));
    }

    #[test]
    fn test_serde_aliases() {
        let d: Distance = serde_json::from_str("\"angular\"").unwrap();
        assert_eq!(d, Distance::Cosine);
        assert_eq!(serde_json::to_string(&Distance::L2).unwrap(), "\"l2\"");
    }
}
