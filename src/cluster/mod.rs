//! Clustering algorithms for grouping similar customers.
//!
//! Every algorithm consumes a [`ScaledMatrix`] and produces an owned
//! [`ClusterModel`]: labels for the training rows plus the state needed to
//! label new rows.
//!
//! ## Algorithm Families
//!
//! | Kind | Type | Number of clusters | Noise |
//! |------|------|--------------------|-------|
//! | Partitional | [`Kmeans`] | fixed `k` | never |
//! | Density-based | [`Dbscan`] | discovered | [`NOISE`] label |
//! | Hierarchical | [`HierarchicalClustering`] | fixed `k` (tree cut) | never |
//! | Probabilistic mixture | [`Gmm`] | fixed `k` | never |
//!
//! ### K-means
//!
//! The classic algorithm: assign each point to the nearest centroid, then
//! update centroids to the mean of their points. Repeat.
//!
//! **Objective**: Minimize within-cluster sum of squares:
//!
//! ```text
//! J = Σ_k Σ_{x ∈ C_k} ||x - μ_k||²
//! ```
//!
//! **Assumptions**:
//! - Clusters are roughly spherical
//! - Clusters have similar sizes
//! - You know k in advance
//!
//! ### DBSCAN
//!
//! Grows clusters from dense neighborhoods. Finds arbitrary shapes and marks
//! points in sparse regions as noise rather than forcing them into a segment.
//!
//! ### Hierarchical (Agglomerative) Clustering
//!
//! Bottom-up: start with each point as its own cluster, repeatedly merge
//! the two closest clusters until one remains. The merge history forms a
//! **dendrogram**, a binary tree that can be cut to any number of clusters.
//!
//! ### Gaussian Mixture Model (GMM)
//!
//! Models data as a mixture of k Gaussian distributions:
//!
//! ```text
//! P(x) = Σ π_k × N(x | μ_k, Σ_k)
//! ```
//!
//! **When to use**: When you want soft assignments, or when clusters have
//! different spreads per field.
//!
//! ## Usage
//!
//! ```rust
//! use cohort::cluster::{Algorithm, Clustering, Gmm, Kmeans, SoftClustering};
//! use cohort::data::ScaledMatrix;
//!
//! let data = ScaledMatrix::from_rows(&[
//!     vec![0.0, 0.0],
//!     vec![0.1, 0.1],
//!     vec![10.0, 10.0],
//!     vec![10.1, 10.1],
//! ])
//! .unwrap();
//!
//! // Hard clustering with K-means
//! let labels = Kmeans::new(2).fit_predict(&data).unwrap();
//! assert_eq!(labels[0], labels[1]);  // First two together
//! assert_ne!(labels[0], labels[2]);  // Separate from last two
//!
//! // Same thing through the closed algorithm enum
//! let model = Algorithm::from(Kmeans::new(2)).fit(&data).unwrap();
//! assert_eq!(model.n_clusters(), 2);
//!
//! // Soft clustering with GMM
//! let probs = Gmm::new(2).fit_predict_proba(&data).unwrap();
//! // probs[i][k] = P(point i belongs to cluster k)
//! assert_eq!(probs[0].len(), 2);
//! ```

mod dbscan;
mod dendrogram;
mod gmm;
mod hierarchical;
mod kmeans;
mod model;
mod traits;

pub use dbscan::{k_distances, Dbscan};
pub use dendrogram::{Dendrogram, Merge};
pub use gmm::Gmm;
pub use hierarchical::{HierarchicalClustering, Linkage};
pub use kmeans::Kmeans;
pub use model::{is_noise, ClusterModel, Label, ModelState, NOISE};
pub use traits::{Clustering, SoftClustering};

use crate::data::ScaledMatrix;
use crate::error::{Error, Result};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Algorithm family, used to ask the selector for one kind of candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmKind {
    /// Fixed-k partitioning (k-means).
    Partitional,
    /// Density-connected regions with noise (DBSCAN).
    DensityBased,
    /// Agglomerative merge tree cut to k.
    Hierarchical,
    /// Gaussian mixture fit by EM.
    ProbabilisticMixture,
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlgorithmKind::Partitional => "partitional",
            AlgorithmKind::DensityBased => "density-based",
            AlgorithmKind::Hierarchical => "hierarchical",
            AlgorithmKind::ProbabilisticMixture => "probabilistic-mixture",
        };
        f.write_str(name)
    }
}

/// A fully parameterised clustering configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Algorithm {
    /// K-means.
    Kmeans(Kmeans),
    /// DBSCAN.
    Dbscan(Dbscan),
    /// Agglomerative clustering.
    Hierarchical(HierarchicalClustering),
    /// Gaussian mixture.
    Gmm(Gmm),
}

impl Algorithm {
    /// Family of this configuration.
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Algorithm::Kmeans(_) => AlgorithmKind::Partitional,
            Algorithm::Dbscan(_) => AlgorithmKind::DensityBased,
            Algorithm::Hierarchical(_) => AlgorithmKind::Hierarchical,
            Algorithm::Gmm(_) => AlgorithmKind::ProbabilisticMixture,
        }
    }

    /// Fit this configuration.
    pub fn fit(&self, data: &ScaledMatrix) -> Result<ClusterModel> {
        match self {
            Algorithm::Kmeans(a) => a.fit(data),
            Algorithm::Dbscan(a) => a.fit(data),
            Algorithm::Hierarchical(a) => a.fit(data),
            Algorithm::Gmm(a) => a.fit(data),
        }
    }

    /// Requested number of clusters, `None` for density-based.
    pub fn n_clusters(&self) -> Option<usize> {
        match self {
            Algorithm::Kmeans(a) => a.n_clusters(),
            Algorithm::Dbscan(a) => a.n_clusters(),
            Algorithm::Hierarchical(a) => a.n_clusters(),
            Algorithm::Gmm(a) => a.n_clusters(),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Kmeans(a) => write!(f, "kmeans(k={}, seed={})", a.k(), a.seed()),
            Algorithm::Dbscan(a) => {
                write!(f, "dbscan(eps={}, min_pts={})", a.epsilon(), a.min_pts())
            }
            Algorithm::Hierarchical(a) => write!(
                f,
                "hierarchical(k={}, linkage={:?})",
                a.n_clusters().unwrap_or_default(),
                a.linkage()
            ),
            Algorithm::Gmm(a) => write!(f, "gmm(k={}, seed={})", a.n_components(), a.seed()),
        }
    }
}

impl From<Kmeans> for Algorithm {
    fn from(a: Kmeans) -> Self {
        Algorithm::Kmeans(a)
    }
}

impl From<Dbscan> for Algorithm {
    fn from(a: Dbscan) -> Self {
        Algorithm::Dbscan(a)
    }
}

impl From<HierarchicalClustering> for Algorithm {
    fn from(a: HierarchicalClustering) -> Self {
        Algorithm::Hierarchical(a)
    }
}

impl From<Gmm> for Algorithm {
    fn from(a: Gmm) -> Self {
        Algorithm::Gmm(a)
    }
}

/// Squared Euclidean distance.
#[inline]
pub(crate) fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Reject empty or non-finite input.
pub(crate) fn validate_input(data: &ScaledMatrix) -> Result<()> {
    if data.nrows() == 0 {
        return Err(Error::EmptyInput);
    }
    data.ensure_finite()
}

/// Check a requested cluster count: at least 2 and no more than `n`.
pub(crate) fn validate_k(name: &'static str, k: usize, n: usize) -> Result<()> {
    if k < 2 {
        return Err(Error::invalid_parameter(name, "must be at least 2"));
    }
    if k > n {
        return Err(Error::invalid_parameter(
            name,
            format!("{k} clusters requested from {n} rows"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(Algorithm::from(Kmeans::new(3)).kind(), AlgorithmKind::Partitional);
        assert_eq!(Algorithm::from(Dbscan::default()).kind(), AlgorithmKind::DensityBased);
        assert_eq!(
            Algorithm::from(HierarchicalClustering::new(3)).kind(),
            AlgorithmKind::Hierarchical
        );
        assert_eq!(
            Algorithm::from(Gmm::new(3)).kind(),
            AlgorithmKind::ProbabilisticMixture
        );
    }

    #[test]
    fn test_algorithm_serde_tagged() {
        let alg = Algorithm::from(Dbscan::new(0.8, 4));
        let json = serde_json::to_value(&alg).unwrap();
        assert_eq!(json["algorithm"], "dbscan");
        assert_eq!(json["min_pts"], 4);
        let back: Algorithm = serde_json::from_value(json).unwrap();
        assert_eq!(back, alg);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Algorithm::from(Kmeans::new(4).with_seed(1)).to_string(),
            "kmeans(k=4, seed=1)"
        );
        assert_eq!(
            Algorithm::from(HierarchicalClustering::new(3)).to_string(),
            "hierarchical(k=3, linkage=Ward)"
        );
    }

    #[test]
    fn test_every_variant_rejects_empty_and_non_finite() {
        let nan = ScaledMatrix::from_rows(&[vec![0.0], vec![f64::NAN], vec![1.0]]).unwrap();
        let empty = ScaledMatrix::new(
            crate::data::Schema::anonymous(1),
            ndarray::Array2::zeros((0, 1)),
        )
        .unwrap();
        let all = [
            Algorithm::from(Kmeans::new(2)),
            Algorithm::from(Dbscan::new(1.0, 2)),
            Algorithm::from(HierarchicalClustering::new(2)),
            Algorithm::from(Gmm::new(2)),
        ];
        for alg in &all {
            assert!(matches!(alg.fit(&nan), Err(Error::NonFiniteInput { row: 1, .. })));
            assert!(matches!(alg.fit(&empty), Err(Error::EmptyInput)));
        }
    }

    #[test]
    fn test_more_clusters_than_rows_is_invalid_parameter() {
        let data = ScaledMatrix::from_rows(&[vec![0.0], vec![1.0]]).unwrap();
        for alg in [
            Algorithm::from(Kmeans::new(5)),
            Algorithm::from(HierarchicalClustering::new(5)),
            Algorithm::from(Gmm::new(5)),
        ] {
            let err = alg.fit(&data).unwrap_err();
            assert!(
                matches!(err, Error::InvalidParameter { name: "k", .. }),
                "{alg}: {err:?}"
            );
            assert!(err.is_input_error());
        }
    }
}
