//! DBSCAN: Density-Based Spatial Clustering of Applications with Noise.
//!
//! # The Algorithm (Ester et al., 1996)
//!
//! DBSCAN groups points by neighborhood density. Unlike k-means, it:
//!
//! - Discovers clusters of arbitrary shape
//! - Determines the number of clusters itself
//! - Identifies noise points (outliers)
//!
//! ## Core Concepts
//!
//! - **Epsilon (ε)**: Maximum distance between two points to be neighbors.
//! - **MinPts**: Minimum points within ε (the point itself included) for a
//!   point to be "core".
//! - **Core point**: Has at least MinPts points within ε.
//! - **Border point**: Within ε of a core point but not core itself.
//! - **Noise point**: Neither core nor border; labeled [`NOISE`].
//!
//! A result where every point is noise is valid output, not an error: it says
//! the data has no region dense enough at this ε.
//!
//! ## Complexity
//!
//! - **Time**: O(n²) region queries.
//! - **Space**: O(n) for labels.
//!
//! ## References
//!
//! Ester et al. (1996). "A Density-Based Algorithm for Discovering Clusters
//! in Large Spatial Databases with Noise." KDD-96.

use super::model::{ClusterModel, ModelState, NOISE};
use super::traits::Clustering;
use super::{squared_distance, validate_input, Algorithm};
use crate::data::ScaledMatrix;
use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// DBSCAN clustering algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dbscan {
    /// Epsilon: maximum distance for neighborhood.
    epsilon: f64,
    /// Minimum points (including the point itself) for core classification.
    min_pts: usize,
}

impl Dbscan {
    /// Create a new DBSCAN clusterer.
    ///
    /// # Arguments
    ///
    /// * `epsilon` - Maximum distance between two points to be neighbors.
    /// * `min_pts` - Minimum number of points to form a dense region.
    ///
    /// # Typical Values
    ///
    /// - `epsilon`: Often read off a k-distance plot (see [`k_distances`]).
    /// - `min_pts`: 2 * dimension is a common heuristic.
    pub fn new(epsilon: f64, min_pts: usize) -> Self {
        Self { epsilon, min_pts }
    }

    /// Set epsilon (neighborhood radius).
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Set minimum points for core classification.
    pub fn with_min_pts(mut self, min_pts: usize) -> Self {
        self.min_pts = min_pts;
        self
    }

    /// Neighborhood radius.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Minimum points for a core point.
    pub fn min_pts(&self) -> usize {
        self.min_pts
    }

    /// Find all neighbors within epsilon, excluding the point itself.
    fn region_query(&self, data: ArrayView2<'_, f64>, point_idx: usize) -> Vec<usize> {
        let eps_sq = self.epsilon * self.epsilon;
        let point = data.row(point_idx);
        data.outer_iter()
            .enumerate()
            .filter(|(idx, other)| {
                *idx != point_idx && squared_distance(point, other.view()) <= eps_sq
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    #[inline]
    fn is_core(&self, neighbors: &[usize]) -> bool {
        neighbors.len() + 1 >= self.min_pts
    }
}

impl Default for Dbscan {
    fn default() -> Self {
        Self::new(0.5, 5)
    }
}

impl Clustering for Dbscan {
    fn fit(&self, data: &ScaledMatrix) -> Result<ClusterModel> {
        validate_input(data)?;
        if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
            return Err(Error::invalid_parameter("epsilon", "must be positive and finite"));
        }
        if self.min_pts == 0 {
            return Err(Error::invalid_parameter("min_pts", "must be at least 1"));
        }

        let view = data.data();
        let n = view.nrows();
        let mut labels = vec![NOISE; n];
        let mut visited = vec![false; n];
        let mut core = vec![false; n];
        let mut cluster_id = 0;

        for point_idx in 0..n {
            if visited[point_idx] {
                continue;
            }
            visited[point_idx] = true;

            let neighbors = self.region_query(view, point_idx);
            if !self.is_core(&neighbors) {
                // Not enough neighbors: noise for now, may become a border point later
                continue;
            }

            core[point_idx] = true;
            labels[point_idx] = cluster_id;

            // Explicit stack instead of recursion
            let mut to_process = neighbors;
            while let Some(q) = to_process.pop() {
                if labels[q] == NOISE {
                    labels[q] = cluster_id;
                }
                if visited[q] {
                    continue;
                }
                visited[q] = true;

                let q_neighbors = self.region_query(view, q);
                if self.is_core(&q_neighbors) {
                    core[q] = true;
                    to_process.extend(
                        q_neighbors
                            .into_iter()
                            .filter(|&nn| !visited[nn] || labels[nn] == NOISE),
                    );
                }
            }
            cluster_id += 1;
        }

        let core_idx: Vec<usize> = (0..n).filter(|&i| core[i]).collect();
        let d = view.ncols();
        let mut core_points = Array2::zeros((core_idx.len(), d));
        for (row, &i) in core_idx.iter().enumerate() {
            core_points.row_mut(row).assign(&view.row(i));
        }
        let core_labels: Vec<usize> = core_idx.iter().map(|&i| labels[i]).collect();

        debug!(
            epsilon = self.epsilon,
            min_pts = self.min_pts,
            n_clusters = cluster_id,
            n_noise = labels.iter().filter(|&&l| l == NOISE).count(),
            "dbscan fitted"
        );

        Ok(ClusterModel::new(
            data.schema().clone(),
            Algorithm::Dbscan(self.clone()),
            labels,
            cluster_id,
            ModelState::Density {
                epsilon: self.epsilon,
                core_points,
                core_labels,
            },
        ))
    }

    /// DBSCAN discovers clusters dynamically, so there is no requested count.
    fn n_clusters(&self) -> Option<usize> {
        None
    }
}

/// Sorted distance of every point to its k-th nearest neighbor.
///
/// The "knee" of this curve is a common choice for `epsilon` with
/// `min_pts = k + 1`.
pub fn k_distances(data: &ScaledMatrix, k: usize) -> Result<Vec<f64>> {
    validate_input(data)?;
    let view = data.data();
    let n = view.nrows();
    if k == 0 || k >= n {
        return Err(Error::invalid_parameter(
            "k",
            format!("neighbor rank must be within 1..{n}"),
        ));
    }

    let mut out: Vec<f64> = (0..n)
        .map(|i| {
            let mut d: Vec<f64> = (0..n)
                .filter(|&j| j != i)
                .map(|j| squared_distance(view.row(i), view.row(j)).sqrt())
                .collect();
            d.sort_by(f64::total_cmp);
            d[k - 1]
        })
        .collect();
    out.sort_by(f64::total_cmp);
    Ok(out)
}
