//! Hierarchical (agglomerative) clustering.
//!
//! Bottom-up clustering that builds a **dendrogram** by iteratively
//! merging the closest clusters, then cuts it to exactly `k` groups.
//!
//! # Linkage Methods
//!
//! The key choice: how do we define "distance between clusters"?
//!
//! | Linkage | Formula | Effect |
//! |---------|---------|--------|
//! | Single (nearest) | min(d(a,b)) for a∈A, b∈B | Chaining; elongated clusters |
//! | Complete (farthest) | max(d(a,b)) | Compact, spherical clusters |
//! | Average | mean(d(a,b)) | Balanced compromise |
//! | Ward (variance-minimizing) | Δ variance | Minimizes within-cluster variance |
//!
//! ## Ward's Method
//!
//! ```text
//! Δ(A,B) = (nₐ × nᵦ)/(nₐ + nᵦ) × ||μₐ - μᵦ||²
//! ```
//!
//! # Prediction
//!
//! The tree has no natural way to place a new point, so the fitted model keeps
//! the mean of each cut cluster and assigns new points to the nearest mean.

use super::dendrogram::Dendrogram;
use super::model::{ClusterModel, ModelState};
use super::traits::Clustering;
use super::{squared_distance, validate_input, validate_k, Algorithm};
use crate::data::ScaledMatrix;
use crate::error::Result;
use kodama::{linkage as kodama_linkage, Method as KodamaMethod};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Linkage method for hierarchical clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Linkage {
    /// Nearest: minimum distance between clusters.
    Single,
    /// Farthest: maximum distance between clusters.
    Complete,
    /// Mean pairwise distance between clusters.
    Average,
    /// Ward's method: minimize within-cluster variance.
    #[default]
    Ward,
}

/// Hierarchical (agglomerative) clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalClustering {
    /// Number of clusters to produce.
    n_clusters: usize,
    /// Linkage method.
    linkage: Linkage,
}

impl HierarchicalClustering {
    /// Create a new hierarchical clusterer with Ward linkage.
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            linkage: Linkage::default(),
        }
    }

    /// Set linkage method.
    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    /// Linkage method.
    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    /// Fit and return the full dendrogram.
    pub fn fit_dendrogram(&self, data: &ScaledMatrix) -> Result<Dendrogram> {
        validate_input(data)?;
        let view = data.data();
        let n = view.nrows();

        // Condensed dissimilarity matrix (upper triangle, row-major), N-choose-2 long.
        let mut condensed = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for row in 0..n.saturating_sub(1) {
            for col in (row + 1)..n {
                condensed.push(squared_distance(view.row(row), view.row(col)).sqrt());
            }
        }

        let method = match self.linkage {
            Linkage::Single => KodamaMethod::Single,
            Linkage::Complete => KodamaMethod::Complete,
            Linkage::Average => KodamaMethod::Average,
            Linkage::Ward => KodamaMethod::Ward,
        };

        let dend = kodama_linkage(&mut condensed, n, method);

        let mut dendro = Dendrogram::new(n);
        for step in dend.steps() {
            dendro.add_merge(step.cluster1, step.cluster2, step.dissimilarity, step.size);
        }
        Ok(dendro)
    }
}

impl Clustering for HierarchicalClustering {
    fn fit(&self, data: &ScaledMatrix) -> Result<ClusterModel> {
        validate_input(data)?;
        validate_k("k", self.n_clusters, data.nrows())?;

        let dendro = self.fit_dendrogram(data)?;
        let labels = dendro.cut_to_k(self.n_clusters)?;
        let centroids = cluster_means(data.data(), &labels, self.n_clusters);
        let inertia = super::kmeans::inertia(data.data(), centroids.view(), &labels);

        debug!(
            k = self.n_clusters,
            linkage = ?self.linkage,
            inertia,
            "hierarchical clustering fitted"
        );

        Ok(ClusterModel::new(
            data.schema().clone(),
            Algorithm::Hierarchical(self.clone()),
            labels,
            self.n_clusters,
            ModelState::Centroids { centroids, inertia },
        ))
    }

    fn n_clusters(&self) -> Option<usize> {
        Some(self.n_clusters)
    }
}

/// Per-cluster mean of the rows; labels must be in `0..k`.
fn cluster_means(data: ArrayView2<'_, f64>, labels: &[usize], k: usize) -> Array2<f64> {
    let mut sums: Array2<f64> = Array2::zeros((k, data.ncols()));
    let mut counts = vec![0usize; k];
    for (i, &label) in labels.iter().enumerate() {
        let mut row = sums.row_mut(label);
        row += &data.row(i);
        counts[label] += 1;
    }
    for (c, &count) in counts.iter().enumerate() {
        if count > 0 {
            sums.row_mut(c).mapv_inplace(|v| v / count as f64);
        }
    }
    sums
}
