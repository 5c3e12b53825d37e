//! Clustering traits.

use super::model::{ClusterModel, Label};
use crate::data::ScaledMatrix;
use crate::error::Result;

/// Trait for clustering algorithms.
pub trait Clustering {
    /// Fit the model to scaled data.
    ///
    /// Every call produces a new, independently owned [`ClusterModel`].
    fn fit(&self, data: &ScaledMatrix) -> Result<ClusterModel>;

    /// Fit and return only the cluster labels, one per input row.
    fn fit_predict(&self, data: &ScaledMatrix) -> Result<Vec<Label>> {
        Ok(self.fit(data)?.labels().to_vec())
    }

    /// Requested number of clusters, or `None` when the count is discovered.
    fn n_clusters(&self) -> Option<usize>;
}

/// Trait for soft clustering algorithms that return probabilities.
pub trait SoftClustering: Clustering {
    /// Fit and return soft cluster assignments (probabilities).
    ///
    /// Returns a matrix where entry \[i\]\[k\] is the probability that
    /// point i belongs to cluster k.
    fn fit_predict_proba(&self, data: &ScaledMatrix) -> Result<Vec<Vec<f64>>>;
}
