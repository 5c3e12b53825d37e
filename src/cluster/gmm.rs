//! Gaussian Mixture Model clustering.
//!
//! GMM provides **soft clustering** with probabilistic assignments: a customer
//! sitting between two segments gets a split responsibility instead of a
//! forced choice.
//!
//! # The Probabilistic Model
//!
//! GMM assumes data is generated from K Gaussian distributions:
//!
//! ```text
//! P(x) = Σₖ πₖ × N(x | μₖ, Σₖ)
//! ```
//!
//! Where:
//! - πₖ = mixing weight (probability of cluster k)
//! - μₖ = mean of cluster k
//! - Σₖ = diagonal covariance of cluster k (one variance per field)
//!
//! # The EM Algorithm
//!
//! Direct optimization is intractable (sum inside log). EM provides an
//! iterative coordinate-ascent solution:
//!
//! **E-step**: Compute "responsibilities" (soft assignments):
//! ```text
//! γₙₖ = P(z=k | xₙ) = πₖ × N(xₙ | μₖ, Σₖ) / Σⱼ πⱼ × N(xₙ | μⱼ, Σⱼ)
//! ```
//!
//! **M-step**: Update parameters using responsibilities:
//! - μₖ = Σₙ γₙₖ xₙ / Σₙ γₙₖ  (weighted mean)
//! - σ²ₖ = Σₙ γₙₖ (xₙ - μₖ)² / Σₙ γₙₖ + reg  (weighted variance)
//! - πₖ = (1/N) Σₙ γₙₖ  (fraction of responsibility)
//!
//! All densities stay in log space; responsibilities are normalized with
//! log-sum-exp, so far-away points never underflow to 0/0.
//!
//! # Failure Modes
//!
//! - **Local optima**: EM converges to local maxima; initialization matters
//! - **Singular covariance**: Small clusters can collapse; `reg_covar` floors
//!   every variance
//! - **Wrong K**: Too many components overfit; compare BIC across k
//! - **Empty components**: a component that wins no training row is dropped
//!   from the fitted model, so `n_clusters` can be below `n_components`

use super::kmeans::init_centroids;
use super::model::{argmax, compact_labels, ClusterModel, ModelState};
use super::traits::{Clustering, SoftClustering};
use super::{validate_input, validate_k, Algorithm};
use crate::data::ScaledMatrix;
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Gaussian Mixture Model clustering with diagonal covariances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gmm {
    /// Number of components (clusters).
    n_components: usize,
    /// Maximum EM iterations.
    max_iter: usize,
    /// Stop when the mean log-likelihood improves by less than this.
    tol: f64,
    /// Random seed.
    seed: u64,
    /// Regularization added to every variance.
    reg_covar: f64,
}

/// Fitted mixture parameters before they are wrapped in a model.
struct Fitted {
    weights: Array1<f64>,
    means: Array2<f64>,
    variances: Array2<f64>,
    resp: Array2<f64>,
    log_likelihood: f64,
    converged: bool,
    n_iter: usize,
}

impl Gmm {
    /// Create a new GMM with `n_components` components.
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            max_iter: 100,
            tol: 1e-3,
            seed: 42,
            reg_covar: 1e-6,
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

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the variance floor.
    pub fn with_reg_covar(mut self, reg_covar: f64) -> Self {
        self.reg_covar = reg_covar;
        self
    }

    /// Number of components.
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Random seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn validate(&self, data: &ScaledMatrix) -> Result<()> {
        validate_input(data)?;
        validate_k("k", self.n_components, data.nrows())?;
        if self.max_iter == 0 {
            return Err(Error::invalid_parameter("max_iter", "must be at least 1"));
        }
        if !(self.reg_covar > 0.0 && self.reg_covar.is_finite()) {
            return Err(Error::invalid_parameter(
                "reg_covar",
                "must be positive and finite",
            ));
        }
        Ok(())
    }

    /// E-step: responsibilities and total log-likelihood.
    fn e_step(
        data: ArrayView2<'_, f64>,
        weights: &Array1<f64>,
        means: &Array2<f64>,
        variances: &Array2<f64>,
        resp: &mut Array2<f64>,
    ) -> f64 {
        let k = weights.len();
        let log_weights: Vec<f64> = weights.iter().map(|w| w.ln()).collect();
        let mut total = 0.0;
        let mut log_probs = vec![0.0; k];

        for (i, point) in data.outer_iter().enumerate() {
            for c in 0..k {
                log_probs[c] = log_weights[c] + log_gaussian(point, means.row(c), variances.row(c));
            }
            let log_sum = logsumexp(&log_probs);
            total += log_sum;
            for c in 0..k {
                resp[[i, c]] = (log_probs[c] - log_sum).exp();
            }
        }
        total
    }

    fn run(&self, data: ArrayView2<'_, f64>) -> Fitted {
        let (n, d) = data.dim();
        let k = self.n_components;
        let mut rng = StdRng::seed_from_u64(self.seed);

        // Means: k-means++ seeding
        let mut means = init_centroids(data, k, &mut rng);

        // Variances: per-field data variance
        let global_mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let mut global_var: Array1<f64> = Array1::zeros(d);
        for point in data.outer_iter() {
            let diff = &point - &global_mean;
            global_var += &(&diff * &diff);
        }
        global_var.mapv_inplace(|v: f64| v / n as f64 + self.reg_covar);
        let mut variances: Array2<f64> = Array2::zeros((k, d));
        for mut row in variances.outer_iter_mut() {
            row.assign(&global_var);
        }

        // Weights: uniform
        let mut weights = Array1::from_elem(k, 1.0 / k as f64);

        let mut resp: Array2<f64> = Array2::zeros((n, k));
        let mut prev_ll = f64::NEG_INFINITY;
        let mut converged = false;
        let mut n_iter = 0;

        for iter in 0..self.max_iter {
            n_iter = iter + 1;
            let ll = Self::e_step(data, &weights, &means, &variances, &mut resp);

            if (ll - prev_ll).abs() / (n as f64) < self.tol {
                converged = true;
                break;
            }
            prev_ll = ll;

            // M-step
            let resp_sum = resp.sum_axis(Axis(0));
            for c in 0..k {
                let nk = resp_sum[c];
                if nk <= 1e-10 {
                    // Dead component keeps its parameters with negligible weight
                    weights[c] = nk / n as f64;
                    continue;
                }
                weights[c] = nk / n as f64;

                let mut mean: Array1<f64> = Array1::zeros(d);
                for (i, point) in data.outer_iter().enumerate() {
                    mean.scaled_add(resp[[i, c]], &point);
                }
                mean /= nk;

                let mut var = Array1::from_elem(d, 0.0);
                for (i, point) in data.outer_iter().enumerate() {
                    let diff = &point - &mean;
                    var.scaled_add(resp[[i, c]], &(&diff * &diff));
                }
                var.mapv_inplace(|v: f64| v / nk + self.reg_covar);

                means.row_mut(c).assign(&mean);
                variances.row_mut(c).assign(&var);
            }
            // Renormalize in case dead components drifted
            let w_total = weights.sum();
            if w_total > 0.0 {
                weights /= w_total;
            }
            weights.mapv_inplace(|w: f64| w.max(f64::MIN_POSITIVE));
        }

        // Final E-step so labels match the returned parameters
        let log_likelihood = Self::e_step(data, &weights, &means, &variances, &mut resp);

        Fitted {
            weights,
            means,
            variances,
            resp,
            log_likelihood,
            converged,
            n_iter,
        }
    }
}

impl Default for Gmm {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Clustering for Gmm {
    fn fit(&self, data: &ScaledMatrix) -> Result<ClusterModel> {
        self.validate(data)?;
        let fitted = self.run(data.data());

        if !fitted.converged {
            warn!(
                k = self.n_components,
                max_iter = self.max_iter,
                "gmm did not converge"
            );
        }

        let mut labels: Vec<usize> = fitted
            .resp
            .outer_iter()
            .map(|row| argmax(&row.to_vec()))
            .collect();
        let kept = compact_labels(&mut labels, self.n_components);
        if kept.len() < self.n_components {
            warn!(
                k = self.n_components,
                non_empty = kept.len(),
                "gmm components without members dropped"
            );
        }
        let mut weights = fitted.weights.select(Axis(0), &kept);
        let total = weights.sum();
        weights /= total;

        debug!(
            k = self.n_components,
            log_likelihood = fitted.log_likelihood,
            n_iter = fitted.n_iter,
            converged = fitted.converged,
            "gmm fitted"
        );

        Ok(ClusterModel::new(
            data.schema().clone(),
            Algorithm::Gmm(self.clone()),
            labels,
            kept.len(),
            ModelState::Mixture {
                weights,
                means: fitted.means.select(Axis(0), &kept),
                variances: fitted.variances.select(Axis(0), &kept),
                log_likelihood: fitted.log_likelihood,
                converged: fitted.converged,
                n_iter: fitted.n_iter,
            },
        ))
    }

    fn n_clusters(&self) -> Option<usize> {
        Some(self.n_components)
    }
}

impl SoftClustering for Gmm {
    fn fit_predict_proba(&self, data: &ScaledMatrix) -> Result<Vec<Vec<f64>>> {
        self.validate(data)?;
        let fitted = self.run(data.data());
        Ok(fitted.resp.outer_iter().map(|row| row.to_vec()).collect())
    }
}

/// Log-density of a point under a diagonal Gaussian.
pub(crate) fn log_gaussian(
    point: ArrayView1<'_, f64>,
    mean: ArrayView1<'_, f64>,
    var: ArrayView1<'_, f64>,
) -> f64 {
    let d = point.len() as f64;
    let mut log_prob = -0.5 * d * (2.0 * std::f64::consts::PI).ln();

    for i in 0..point.len() {
        let diff = point[i] - mean[i];
        log_prob -= 0.5 * var[i].ln();
        log_prob -= 0.5 * diff * diff / var[i];
    }

    log_prob
}

/// Log-sum-exp for numerical stability.
pub(crate) fn logsumexp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max_val = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    max_val
        + values
            .iter()
            .map(|&v| (v - max_val).exp())
            .sum::<f64>()
            .ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[[f64; 2]]) -> ScaledMatrix {
        ScaledMatrix::from_rows(&rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>()).unwrap()
    }

    fn two_blobs() -> ScaledMatrix {
        matrix(&[
            [0.0, 0.0],
            [0.1, 0.2],
            [0.2, 0.1],
            [-0.1, 0.0],
            [10.0, 10.0],
            [10.1, 10.2],
            [9.9, 10.1],
            [10.2, 9.9],
        ])
    }

    #[test]
    fn test_gmm_basic() {
        let data = two_blobs();

        let labels = Gmm::new(2).with_seed(42).fit_predict(&data).unwrap();

        assert!(labels[1..4].iter().all(|&l| l == labels[0]));
        assert!(labels[5..8].iter().all(|&l| l == labels[4]));
        assert_ne!(labels[0], labels[4]);
    }

    #[test]
    fn test_gmm_soft_assignments() {
        let data = matrix(&[[0.0, 0.0], [0.2, 0.1], [5.0, 5.0], [10.0, 10.0], [9.8, 10.1]]);

        let probs = Gmm::new(2).with_seed(42).fit_predict_proba(&data).unwrap();

        for row in &probs {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
            assert!(row.iter().all(|p| p.is_finite() && *p >= 0.0));
        }
    }

    #[test]
    fn test_gmm_far_points_do_not_underflow() {
        // Without log-space normalization the densities here are exactly 0.
        let data = matrix(&[[0.0, 0.0], [0.0, 0.01], [1e4, 1e4], [1e4, 1e4 + 0.01]]);
        let probs = Gmm::new(2).fit_predict_proba(&data).unwrap();
        for row in &probs {
            assert!(row.iter().all(|p| p.is_finite()));
        }
    }

    #[test]
    fn test_gmm_model_state() {
        let model = Gmm::new(2).fit(&two_blobs()).unwrap();
        let weights_sum = match model.state() {
            ModelState::Mixture { weights, .. } => weights.sum(),
            other => panic!("unexpected state {other:?}"),
        };
        assert!((weights_sum - 1.0).abs() < 1e-9);
        assert!(model.log_likelihood().unwrap().is_finite());
        // ln(8) > 2, so the BIC penalty exceeds the AIC one
        assert!(model.bic().unwrap() > model.aic().unwrap());
        assert!(model.inertia().is_none());
    }

    #[test]
    fn test_gmm_deterministic() {
        let data = two_blobs();
        let a = Gmm::new(2).with_seed(7).fit(&data).unwrap();
        let b = Gmm::new(2).with_seed(7).fit(&data).unwrap();
        assert_eq!(a.labels(), b.labels());
        assert_eq!(a.log_likelihood(), b.log_likelihood());
    }

    #[test]
    fn test_gmm_invalid() {
        let data = two_blobs();
        assert!(Gmm::new(1).fit(&data).is_err());
        assert!(Gmm::new(20).fit(&data).is_err());
        assert!(Gmm::new(2).with_reg_covar(-1.0).fit(&data).is_err());
    }

    #[test]
    fn test_gmm_rejects_zero_variance_floor() {
        // Constant second field: without a floor its variance is exactly 0.
        let data = ScaledMatrix::from_rows(&[
            vec![0.0, 1.0],
            vec![0.1, 1.0],
            vec![5.0, 1.0],
            vec![5.1, 1.0],
        ])
        .unwrap();
        assert!(matches!(
            Gmm::new(2).with_reg_covar(0.0).fit(&data),
            Err(Error::InvalidParameter { name: "reg_covar", .. })
        ));
        assert!(Gmm::new(2).with_reg_covar(0.0).fit_predict_proba(&data).is_err());

        let model = Gmm::new(2).fit(&data).unwrap();
        let labels = model.labels();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
        assert!(model.log_likelihood().is_some_and(f64::is_finite));
    }

    #[test]
    fn test_logsumexp() {
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
        let v = logsumexp(&[-1000.0, -1000.0]);
        assert!((v - (-1000.0 + 2f64.ln())).abs() < 1e-9);
    }
}
