//! K-means clustering.
//!
//! Partitions data into k clusters by minimizing **within-cluster sum of squares**
//! (WCSS, also called inertia).
//!
//! ```text
//! WCSS = Σₖ Σᵢ∈Cₖ ||xᵢ - μₖ||²
//! ```
//!
//! # Lloyd's Algorithm
//!
//! 1. Initialize k centroids via k-means++
//! 2. **Assign**: Each point → nearest centroid
//! 3. **Update**: Each centroid → mean of assigned points
//! 4. Repeat until the centroids stop moving
//!
//! # Multi-start
//!
//! Lloyd only finds a local minimum, so the whole procedure runs `n_init`
//! times from different k-means++ seedings and the restart with the lowest
//! inertia wins. Each restart draws from its own generator derived from the
//! configured seed, so the result is identical whether restarts run
//! sequentially or in parallel.
//!
//! Clusters still empty after the final assignment (duplicate rows can cause
//! this) are dropped, so the model may report fewer than `k` clusters.
//!
//! ## K-means++ Initialization
//!
//! 1. Choose first centroid uniformly at random
//! 2. Choose next centroid with probability proportional to D(x)²
//!    (squared distance to nearest existing centroid)

use super::model::{compact_labels, ClusterModel, ModelState};
use super::traits::Clustering;
use super::{squared_distance, validate_input, validate_k, Algorithm};
use crate::data::ScaledMatrix;
use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2, Axis};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// K-means clustering algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kmeans {
    /// Number of clusters.
    k: usize,
    /// Maximum Lloyd iterations per restart.
    max_iter: usize,
    /// Convergence tolerance on total squared centroid shift.
    tol: f64,
    /// Number of restarts.
    n_init: usize,
    /// Random seed.
    seed: u64,
}

/// Outcome of a single restart.
#[derive(Debug, Clone)]
struct Restart {
    centroids: Array2<f64>,
    labels: Vec<usize>,
    inertia: f64,
    n_iter: usize,
}

impl Kmeans {
    /// Create a new K-means clusterer.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 300,
            tol: 1e-4,
            n_init: 10,
            seed: 42,
        }
    }

    /// Set maximum iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set the number of restarts.
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    /// Set random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of clusters.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Random seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// One full Lloyd run from a fresh k-means++ seeding.
    fn run_once(&self, data: ArrayView2<'_, f64>, seed: u64) -> Restart {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = data.nrows();
        let d = data.ncols();

        let mut centroids = init_centroids(data, self.k, &mut rng);
        let mut n_iter = 0;

        for iter in 0..self.max_iter {
            n_iter = iter + 1;
            let labels = assign(data, centroids.view());

            // Update step
            let mut new_centroids: Array2<f64> = Array2::zeros((self.k, d));
            let mut counts = vec![0usize; self.k];
            for (i, &c) in labels.iter().enumerate() {
                let mut row = new_centroids.row_mut(c);
                row += &data.row(i);
                counts[c] += 1;
            }
            for (c, &count) in counts.iter().enumerate() {
                if count > 0 {
                    new_centroids.row_mut(c).mapv_inplace(|v| v / count as f64);
                } else {
                    // Empty cluster: reseed from a random point
                    let idx = rng.random_range(0..n);
                    new_centroids.row_mut(c).assign(&data.row(idx));
                }
            }

            let shift: f64 = centroids
                .iter()
                .zip(new_centroids.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            centroids = new_centroids;

            if shift < self.tol {
                break;
            }
        }

        let labels = assign(data, centroids.view());
        let inertia = inertia(data, centroids.view(), &labels);
        Restart {
            centroids,
            labels,
            inertia,
            n_iter,
        }
    }
}

impl Default for Kmeans {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Clustering for Kmeans {
    fn fit(&self, data: &ScaledMatrix) -> Result<ClusterModel> {
        validate_input(data)?;
        validate_k("k", self.k, data.nrows())?;
        if self.n_init == 0 {
            return Err(Error::invalid_parameter("n_init", "must be at least 1"));
        }

        let view = data.data();
        let mut seeder = StdRng::seed_from_u64(self.seed);
        let seeds: Vec<u64> = (0..self.n_init).map(|_| seeder.random()).collect();

        #[cfg(feature = "parallel")]
        let restarts: Vec<Restart> = seeds.par_iter().map(|&s| self.run_once(view, s)).collect();
        #[cfg(not(feature = "parallel"))]
        let restarts: Vec<Restart> = seeds.iter().map(|&s| self.run_once(view, s)).collect();

        // min_by keeps the first of equal minima, so ties go to the earliest restart.
        let (restart, best) = restarts
            .into_iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.inertia.total_cmp(&b.inertia))
            .ok_or(Error::EmptyInput)?;

        debug!(
            k = self.k,
            restart,
            inertia = best.inertia,
            n_iter = best.n_iter,
            "k-means fitted"
        );

        let mut labels = best.labels;
        let kept = compact_labels(&mut labels, self.k);
        if kept.len() < self.k {
            warn!(k = self.k, non_empty = kept.len(), "k-means left clusters empty");
        }

        Ok(ClusterModel::new(
            data.schema().clone(),
            Algorithm::Kmeans(self.clone()),
            labels,
            kept.len(),
            ModelState::Centroids {
                centroids: best.centroids.select(Axis(0), &kept),
                inertia: best.inertia,
            },
        ))
    }

    fn n_clusters(&self) -> Option<usize> {
        Some(self.k)
    }
}

/// Pick `k` initial centroids with k-means++.
pub(crate) fn init_centroids(data: ArrayView2<'_, f64>, k: usize, rng: &mut impl Rng) -> Array2<f64> {
    let n = data.nrows();
    let mut centroids = Array2::zeros((k, data.ncols()));

    // First centroid: random point
    let first = rng.random_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));

    // Remaining centroids: k-means++ selection
    for i in 1..k {
        let distances: Vec<f64> = data
            .outer_iter()
            .map(|point| {
                (0..i)
                    .map(|c| squared_distance(point, centroids.row(c)))
                    .fold(f64::MAX, f64::min)
            })
            .collect();

        // Sample proportional to squared distance
        let total: f64 = distances.iter().sum();
        if total == 0.0 {
            let idx = rng.random_range(0..n);
            centroids.row_mut(i).assign(&data.row(idx));
            continue;
        }

        let threshold = rng.random::<f64>() * total;
        let mut cumsum = 0.0;
        let mut selected = n - 1;
        for (j, &d) in distances.iter().enumerate() {
            cumsum += d;
            if cumsum >= threshold && d > 0.0 {
                selected = j;
                break;
            }
        }

        centroids.row_mut(i).assign(&data.row(selected));
    }

    centroids
}

/// Nearest-centroid assignment; ties go to the lower centroid index.
pub(crate) fn assign(data: ArrayView2<'_, f64>, centroids: ArrayView2<'_, f64>) -> Vec<usize> {
    let nearest = |i: usize| -> usize {
        let point = data.row(i);
        let mut best_cluster = 0;
        let mut best_dist = f64::MAX;
        for (c, centroid) in centroids.outer_iter().enumerate() {
            let dist = squared_distance(point, centroid);
            if dist < best_dist {
                best_dist = dist;
                best_cluster = c;
            }
        }
        best_cluster
    };

    #[cfg(feature = "parallel")]
    {
        (0..data.nrows()).into_par_iter().map(nearest).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        (0..data.nrows()).map(nearest).collect()
    }
}

/// Sum of squared distances of each point to its assigned centroid.
pub(crate) fn inertia(data: ArrayView2<'_, f64>, centroids: ArrayView2<'_, f64>, labels: &[usize]) -> f64 {
    labels
        .iter()
        .enumerate()
        .map(|(i, &c)| squared_distance(data.row(i), centroids.row(c)))
        .sum()
}
