//! Fitted clustering models.

use super::gmm::{log_gaussian, logsumexp};
use super::{squared_distance, Algorithm, AlgorithmKind};
use crate::data::{ScaledVector, Schema};
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cluster identifier; non-negative for clusters, [`NOISE`] for outliers.
pub type Label = usize;

/// Label assigned to noise points by density-based clustering.
pub const NOISE: Label = usize::MAX;

/// Whether `label` is the noise sentinel.
#[inline]
pub fn is_noise(label: Label) -> bool {
    label == NOISE
}

/// Algorithm-specific state needed to assign new points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelState {
    /// One representative per cluster (k-means centroids, hierarchical means).
    Centroids {
        /// `k x d` cluster representatives.
        centroids: Array2<f64>,
        /// Within-cluster sum of squared distances to the representatives.
        inertia: f64,
    },
    /// Core points discovered by DBSCAN.
    Density {
        /// Neighborhood radius.
        epsilon: f64,
        /// Core points, one per row.
        core_points: Array2<f64>,
        /// Cluster of each core point.
        core_labels: Vec<Label>,
    },
    /// Diagonal Gaussian mixture.
    Mixture {
        /// Mixing weights, summing to 1.
        weights: Array1<f64>,
        /// `k x d` component means.
        means: Array2<f64>,
        /// `k x d` component variances.
        variances: Array2<f64>,
        /// Total log-likelihood of the training data.
        log_likelihood: f64,
        /// Whether EM stopped on tolerance rather than the iteration cap.
        converged: bool,
        /// EM iterations run.
        n_iter: usize,
    },
}

/// The result of one fit: labels for the training rows plus enough state to
/// label new rows.
///
/// Models are owned plain data. Fitting twice never shares anything between
/// the two results.
///
/// Labels run from `0` to `n_clusters - 1` and every one of them is used by
/// at least one training row, so `predict` never returns a label without
/// members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ClusterModelRepr")]
pub struct ClusterModel {
    schema: Arc<Schema>,
    algorithm: Algorithm,
    labels: Vec<Label>,
    n_clusters: usize,
    state: ModelState,
}

#[derive(Deserialize)]
struct ClusterModelRepr {
    schema: Arc<Schema>,
    algorithm: Algorithm,
    labels: Vec<Label>,
    n_clusters: usize,
    state: ModelState,
}

impl TryFrom<ClusterModelRepr> for ClusterModel {
    type Error = Error;

    fn try_from(repr: ClusterModelRepr) -> Result<Self> {
        let model = Self::new(
            repr.schema,
            repr.algorithm,
            repr.labels,
            repr.n_clusters,
            repr.state,
        );
        model.check_consistent()?;
        Ok(model)
    }
}

/// Drop representatives that no training row was assigned to and renumber
/// the remaining labels to `0..kept.len()`, preserving order.
///
/// Returns the kept representative indices.
pub(crate) fn compact_labels(labels: &mut [Label], k: usize) -> Vec<usize> {
    let mut used = vec![false; k];
    for &label in labels.iter().filter(|&&l| !is_noise(l)) {
        used[label] = true;
    }
    let kept: Vec<usize> = (0..k).filter(|&c| used[c]).collect();
    if kept.len() < k {
        let mut remap = vec![NOISE; k];
        for (new, &old) in kept.iter().enumerate() {
            remap[old] = new;
        }
        for label in labels.iter_mut().filter(|l| !is_noise(**l)) {
            *label = remap[*label];
        }
    }
    kept
}

impl ClusterModel {
    pub(crate) fn new(
        schema: Arc<Schema>,
        algorithm: Algorithm,
        labels: Vec<Label>,
        n_clusters: usize,
        state: ModelState,
    ) -> Self {
        Self {
            schema,
            algorithm,
            labels,
            n_clusters,
            state,
        }
    }

    /// Shape checks between labels, state and schema.
    fn check_consistent(&self) -> Result<()> {
        let d = self.schema.len();
        let k = self.n_clusters;
        let inconsistent = |message: String| Err(Error::invalid_parameter("model", message));

        if let Some(&bad) = self.labels.iter().find(|&&l| !is_noise(l) && l >= k) {
            return inconsistent(format!("label {bad} out of range for {k} clusters"));
        }
        match &self.state {
            ModelState::Centroids { centroids, .. } => {
                if centroids.dim() != (k, d) {
                    return inconsistent(format!(
                        "centroids are {:?}, expected ({k}, {d})",
                        centroids.dim()
                    ));
                }
            }
            ModelState::Density {
                epsilon,
                core_points,
                core_labels,
            } => {
                if !(*epsilon > 0.0) {
                    return inconsistent("epsilon must be positive".into());
                }
                if core_points.ncols() != d || core_points.nrows() != core_labels.len() {
                    return inconsistent(format!(
                        "{} core labels for core points of shape {:?}",
                        core_labels.len(),
                        core_points.dim()
                    ));
                }
                if core_labels.iter().any(|&l| l >= k) {
                    return inconsistent("core label out of range".into());
                }
            }
            ModelState::Mixture {
                weights,
                means,
                variances,
                ..
            } => {
                if weights.len() != k || means.dim() != (k, d) || variances.dim() != (k, d) {
                    return inconsistent(format!("mixture parameters do not match ({k}, {d})"));
                }
                if variances.iter().any(|&v| !(v > 0.0)) || weights.iter().any(|&w| !(w > 0.0)) {
                    return inconsistent("weights and variances must be positive".into());
                }
            }
        }
        Ok(())
    }

    /// Schema of the training data.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Parameters that produced this model.
    pub fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    /// Algorithm family.
    pub fn kind(&self) -> AlgorithmKind {
        self.algorithm.kind()
    }

    /// One label per training row.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Number of clusters with at least one training row, noise excluded.
    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    /// Number of training rows labelled [`NOISE`].
    pub fn n_noise(&self) -> usize {
        self.labels.iter().filter(|&&l| is_noise(l)).count()
    }

    /// Training rows per non-noise label.
    pub fn cluster_sizes(&self) -> BTreeMap<Label, usize> {
        let mut sizes = BTreeMap::new();
        for &label in self.labels.iter().filter(|&&l| !is_noise(l)) {
            *sizes.entry(label).or_insert(0) += 1;
        }
        sizes
    }

    /// Algorithm-specific state.
    pub fn state(&self) -> &ModelState {
        &self.state
    }

    /// Within-cluster sum of squares, for centroid-based models.
    pub fn inertia(&self) -> Option<f64> {
        match &self.state {
            ModelState::Centroids { inertia, .. } => Some(*inertia),
            _ => None,
        }
    }

    /// Cluster representatives: centroids, or component means for mixtures.
    pub fn centroids(&self) -> Option<ArrayView2<'_, f64>> {
        match &self.state {
            ModelState::Centroids { centroids, .. } => Some(centroids.view()),
            ModelState::Mixture { means, .. } => Some(means.view()),
            ModelState::Density { .. } => None,
        }
    }

    /// Log-likelihood of the training data, for mixtures.
    pub fn log_likelihood(&self) -> Option<f64> {
        match &self.state {
            ModelState::Mixture { log_likelihood, .. } => Some(*log_likelihood),
            _ => None,
        }
    }

    /// Number of free parameters of a diagonal mixture: `(k - 1) + 2kd`.
    fn mixture_parameters(&self) -> Option<f64> {
        match &self.state {
            ModelState::Mixture { means, .. } => {
                let (k, d) = means.dim();
                Some((k - 1 + 2 * k * d) as f64)
            }
            _ => None,
        }
    }

    /// Bayesian information criterion (lower is better), for mixtures.
    ///
    /// `BIC = -2 ln L + p ln n`
    pub fn bic(&self) -> Option<f64> {
        let p = self.mixture_parameters()?;
        let ll = self.log_likelihood()?;
        Some(-2.0 * ll + p * (self.labels.len() as f64).ln())
    }

    /// Akaike information criterion (lower is better), for mixtures.
    ///
    /// `AIC = -2 ln L + 2p`
    pub fn aic(&self) -> Option<f64> {
        let p = self.mixture_parameters()?;
        let ll = self.log_likelihood()?;
        Some(-2.0 * ll + 2.0 * p)
    }

    fn check_input(&self, vector: &ScaledVector) -> Result<()> {
        self.schema.ensure_matches(vector.schema())?;
        if let Some(col) = vector.values().iter().position(|v| !v.is_finite()) {
            return Err(Error::NonFiniteInput {
                row: 0,
                field: self.schema.fields()[col].clone(),
            });
        }
        Ok(())
    }

    /// Assign a new scaled vector to a cluster.
    ///
    /// - centroid models: nearest representative (ties to the lower label)
    /// - density models: label of the nearest core point within `epsilon`,
    ///   otherwise [`NOISE`]
    /// - mixtures: component with the highest posterior
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] if the vector was scaled with a different schema,
    /// [`Error::NonFiniteInput`] for NaN or infinite coordinates.
    pub fn predict(&self, vector: &ScaledVector) -> Result<Label> {
        self.check_input(vector)?;
        let x = vector.values();
        let label = match &self.state {
            ModelState::Centroids { centroids, .. } => nearest_row(x, centroids.view()).0,
            ModelState::Density {
                epsilon,
                core_points,
                core_labels,
            } => {
                if core_points.nrows() == 0 {
                    NOISE
                } else {
                    let (idx, dist_sq) = nearest_row(x, core_points.view());
                    if dist_sq <= epsilon * epsilon {
                        core_labels[idx]
                    } else {
                        NOISE
                    }
                }
            }
            ModelState::Mixture { .. } => {
                let proba = self.posterior(x)?;
                argmax(&proba)
            }
        };
        Ok(label)
    }

    /// Posterior probability of each mixture component for a new vector.
    ///
    /// Returns `None` for non-mixture models.
    pub fn predict_proba(&self, vector: &ScaledVector) -> Result<Option<Vec<f64>>> {
        self.check_input(vector)?;
        match self.state {
            ModelState::Mixture { .. } => self.posterior(vector.values()).map(Some),
            _ => Ok(None),
        }
    }

    fn posterior(&self, x: ArrayView1<'_, f64>) -> Result<Vec<f64>> {
        let ModelState::Mixture {
            weights,
            means,
            variances,
            ..
        } = &self.state
        else {
            return Err(Error::invalid_parameter("model", "not a mixture model"));
        };
        let log_probs: Vec<f64> = (0..weights.len())
            .map(|c| weights[c].ln() + log_gaussian(x, means.row(c), variances.row(c)))
            .collect();
        let norm = logsumexp(&log_probs);
        Ok(log_probs.iter().map(|lp| (lp - norm).exp()).collect())
    }
}

/// Index of the nearest row and its squared distance; ties go to the lower index.
fn nearest_row(x: ArrayView1<'_, f64>, rows: ArrayView2<'_, f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, row) in rows.outer_iter().enumerate() {
        let d = squared_distance(x, row);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// Index of the largest value; ties go to the lower index.
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}
