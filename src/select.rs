//! Choosing a clustering configuration by internal validation.
//!
//! [`ClusterSelector`] fits every candidate configuration of one algorithm
//! family, scores each with a [`Metric`], and returns the best model together
//! with the outcome of every candidate (for elbow plots and audit).
//!
//! # Exclusion
//!
//! A candidate takes no part in the ranking when:
//!
//! - its fit failed on a parameter check (e.g. `k` larger than the data)
//! - it is density-based and found no cluster at all
//! - it is density-based and labelled more than `max_noise_fraction` as noise
//! - the chosen metric is undefined for its labelling
//!
//! # Ties
//!
//! Scores within `1e-12` of each other are tied. Among tied candidates the
//! one closest to the middle of the candidate list wins, then the earlier
//! one. For a k-range this avoids systematically favouring the smallest or
//! largest k.

use crate::cluster::{
    validate_input, Algorithm, AlgorithmKind, ClusterModel, Dbscan, Gmm, HierarchicalClustering,
    Kmeans, Linkage,
};
use crate::data::ScaledMatrix;
use crate::error::{Error, Result};
use crate::metrics::{evaluate, EvaluationReport, Metric};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use tracing::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const TIE_EPSILON: f64 = 1e-12;

/// Why a candidate was left out of the ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// The fit rejected the configuration.
    FitFailed {
        /// Error message.
        message: String,
    },
    /// Density-based fit labelled every point noise.
    NoClusters,
    /// Density-based fit exceeded the noise limit.
    TooMuchNoise {
        /// Observed noise fraction.
        fraction: f64,
        /// Configured limit.
        max: f64,
    },
    /// The selection metric is undefined for this labelling.
    UndefinedMetric,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::FitFailed { message } => write!(f, "fit failed: {message}"),
            ExclusionReason::NoClusters => f.write_str("no clusters found"),
            ExclusionReason::TooMuchNoise { fraction, max } => {
                write!(f, "noise fraction {fraction:.3} exceeds {max:.3}")
            }
            ExclusionReason::UndefinedMetric => f.write_str("metric undefined"),
        }
    }
}

/// Ranking status of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CandidateStatus {
    /// Took part in the ranking with this score.
    Ranked {
        /// Selection metric score.
        score: f64,
    },
    /// Left out of the ranking.
    Excluded {
        /// Why.
        reason: ExclusionReason,
    },
}

/// What happened to one candidate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateOutcome {
    /// The configuration.
    pub algorithm: Algorithm,
    /// Ranked or excluded.
    pub status: CandidateStatus,
    /// Full evaluation, when the fit succeeded.
    pub report: Option<EvaluationReport>,
    /// Within-cluster sum of squares, for centroid models (elbow analysis).
    pub inertia: Option<f64>,
    /// Bayesian information criterion, for mixtures.
    pub bic: Option<f64>,
}

impl CandidateOutcome {
    /// Score, when ranked.
    pub fn score(&self) -> Option<f64> {
        match self.status {
            CandidateStatus::Ranked { score } => Some(score),
            CandidateStatus::Excluded { .. } => None,
        }
    }

    /// Whether this candidate took part in the ranking.
    pub fn is_ranked(&self) -> bool {
        matches!(self.status, CandidateStatus::Ranked { .. })
    }
}

/// Winner of a selection plus every candidate's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Best model.
    pub model: ClusterModel,
    /// Evaluation of the best model.
    pub report: EvaluationReport,
    /// Metric used for ranking.
    pub metric: Metric,
    /// Index of the winner in `candidates`.
    pub best_index: usize,
    /// Outcome of every candidate, in input order.
    pub candidates: Vec<CandidateOutcome>,
}

/// Picks the best configuration among candidates of one algorithm family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSelector {
    metric: Metric,
    max_noise_fraction: f64,
}

impl Default for ClusterSelector {
    fn default() -> Self {
        Self::new(Metric::default())
    }
}

impl ClusterSelector {
    /// Create a selector ranking by `metric`, allowing up to half the points as noise.
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            max_noise_fraction: 0.5,
        }
    }

    /// Set the noise limit for density-based candidates.
    pub fn with_max_noise_fraction(mut self, max_noise_fraction: f64) -> Self {
        self.max_noise_fraction = max_noise_fraction;
        self
    }

    /// Ranking metric.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Noise limit for density-based candidates.
    pub fn max_noise_fraction(&self) -> f64 {
        self.max_noise_fraction
    }

    /// Fit every candidate and return the best.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] if `candidates` is empty, a candidate is
    ///   not of `kind`, or the noise limit is outside [0, 1]
    /// - [`Error::EmptyInput`] / [`Error::NonFiniteInput`] for bad data
    /// - [`Error::NoViableConfiguration`] if every candidate was excluded
    pub fn select_best(
        &self,
        data: &ScaledMatrix,
        kind: AlgorithmKind,
        candidates: &[Algorithm],
    ) -> Result<Selection> {
        if candidates.is_empty() {
            return Err(Error::invalid_parameter("candidates", "must not be empty"));
        }
        if let Some(other) = candidates.iter().find(|c| c.kind() != kind) {
            return Err(Error::invalid_parameter(
                "candidates",
                format!("{other} is not {kind}"),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_noise_fraction) {
            return Err(Error::invalid_parameter(
                "max_noise_fraction",
                "must be within [0, 1]",
            ));
        }
        validate_input(data)?;

        #[cfg(feature = "parallel")]
        let fitted: Vec<Result<(CandidateOutcome, Option<ClusterModel>)>> = candidates
            .par_iter()
            .map(|alg| self.try_candidate(data, alg))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let fitted: Vec<Result<(CandidateOutcome, Option<ClusterModel>)>> = candidates
            .iter()
            .map(|alg| self.try_candidate(data, alg))
            .collect();

        let mut outcomes = Vec::with_capacity(candidates.len());
        let mut models = Vec::with_capacity(candidates.len());
        for result in fitted {
            let (outcome, model) = result?;
            outcomes.push(outcome);
            models.push(model);
        }

        let scores: Vec<Option<f64>> = outcomes.iter().map(CandidateOutcome::score).collect();
        let best_index = pick_best(&scores, self.metric.higher_is_better()).ok_or(
            Error::NoViableConfiguration {
                evaluated: candidates.len(),
            },
        )?;

        let model = models[best_index]
            .take()
            .ok_or(Error::NoViableConfiguration {
                evaluated: candidates.len(),
            })?;
        let report = outcomes[best_index]
            .report
            .clone()
            .ok_or(Error::NoViableConfiguration {
                evaluated: candidates.len(),
            })?;

        info!(
            metric = %self.metric,
            best = %outcomes[best_index].algorithm,
            score = ?scores[best_index],
            n_clusters = report.n_clusters,
            ranked = scores.iter().filter(|s| s.is_some()).count(),
            evaluated = candidates.len(),
            "cluster configuration selected"
        );

        Ok(Selection {
            model,
            report,
            metric: self.metric,
            best_index,
            candidates: outcomes,
        })
    }

    /// Fit and score one candidate. Parameter errors become exclusions;
    /// anything else aborts the selection.
    fn try_candidate(
        &self,
        data: &ScaledMatrix,
        alg: &Algorithm,
    ) -> Result<(CandidateOutcome, Option<ClusterModel>)> {
        let excluded = |reason: ExclusionReason, report: Option<EvaluationReport>| {
            warn!(candidate = %alg, %reason, "candidate excluded");
            CandidateOutcome {
                algorithm: alg.clone(),
                status: CandidateStatus::Excluded { reason },
                report,
                inertia: None,
                bic: None,
            }
        };

        let model = match alg.fit(data) {
            Ok(model) => model,
            Err(e @ (Error::InvalidParameter { .. } | Error::InvalidClusterCount { .. })) => {
                let reason = ExclusionReason::FitFailed {
                    message: e.to_string(),
                };
                return Ok((excluded(reason, None), None));
            }
            Err(e) => return Err(e),
        };
        let report = evaluate(data, model.labels())?;

        if alg.kind() == AlgorithmKind::DensityBased {
            if report.n_clusters == 0 {
                return Ok((excluded(ExclusionReason::NoClusters, Some(report)), None));
            }
            let fraction = report.noise_ratio();
            if fraction > self.max_noise_fraction {
                let reason = ExclusionReason::TooMuchNoise {
                    fraction,
                    max: self.max_noise_fraction,
                };
                return Ok((excluded(reason, Some(report)), None));
            }
        }

        let Some(score) = report.score(self.metric) else {
            return Ok((excluded(ExclusionReason::UndefinedMetric, Some(report)), None));
        };

        debug!(candidate = %alg, metric = %self.metric, score, "candidate scored");
        let outcome = CandidateOutcome {
            algorithm: alg.clone(),
            status: CandidateStatus::Ranked { score },
            inertia: model.inertia(),
            bic: model.bic(),
            report: Some(report),
        };
        Ok((outcome, Some(model)))
    }
}

/// Index of the best defined score, with middle-of-list tie-breaking.
fn pick_best(scores: &[Option<f64>], higher_is_better: bool) -> Option<usize> {
    let middle = scores.len().saturating_sub(1) as f64 / 2.0;
    let offset = |i: usize| (i as f64 - middle).abs();

    let mut best: Option<(usize, f64)> = None;
    for (i, score) in scores.iter().enumerate() {
        let Some(score) = *score else { continue };
        let key = if higher_is_better { score } else { -score };
        best = match best {
            None => Some((i, key)),
            Some((_, best_key)) if key > best_key + TIE_EPSILON => Some((i, key)),
            Some((j, best_key)) if (key - best_key).abs() <= TIE_EPSILON && offset(i) < offset(j) => {
                Some((i, key))
            }
            keep => keep,
        };
    }
    best.map(|(i, _)| i)
}

/// K-means candidates for every `k` in `ks`.
pub fn kmeans_candidates(ks: RangeInclusive<usize>, seed: u64) -> Vec<Algorithm> {
    ks.map(|k| Algorithm::from(Kmeans::new(k).with_seed(seed)))
        .collect()
}

/// Hierarchical candidates for every `k` in `ks`.
pub fn hierarchical_candidates(ks: RangeInclusive<usize>, linkage: Linkage) -> Vec<Algorithm> {
    ks.map(|k| Algorithm::from(HierarchicalClustering::new(k).with_linkage(linkage)))
        .collect()
}

/// Gaussian mixture candidates for every `k` in `ks`.
pub fn gmm_candidates(ks: RangeInclusive<usize>, seed: u64) -> Vec<Algorithm> {
    ks.map(|k| Algorithm::from(Gmm::new(k).with_seed(seed)))
        .collect()
}

/// DBSCAN candidates over the `epsilons × min_pts` grid, epsilon-major.
pub fn dbscan_grid(epsilons: &[f64], min_pts: &[usize]) -> Vec<Algorithm> {
    epsilons
        .iter()
        .flat_map(|&eps| {
            min_pts
                .iter()
                .map(move |&m| Algorithm::from(Dbscan::new(eps, m)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NOISE;
    use proptest::prelude::*;

    fn three_blobs() -> ScaledMatrix {
        let mut rows = Vec::new();
        for (cx, cy) in [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)] {
            for (dx, dy) in [(0.0, 0.0), (0.3, 0.0), (0.0, 0.3), (0.3, 0.3), (0.15, 0.15)] {
                rows.push(vec![cx + dx, cy + dy]);
            }
        }
        ScaledMatrix::from_rows(&rows).unwrap()
    }

    #[test]
    fn test_pick_best_prefers_middle_on_tie() {
        let scores = [Some(0.5), Some(0.9), Some(0.9), Some(0.9), Some(0.1)];
        assert_eq!(pick_best(&scores, true), Some(2));

        // Equal offsets from the middle: earlier wins
        let scores = [Some(0.9), Some(0.1), Some(0.9)];
        assert_eq!(pick_best(&scores, true), Some(0));

        assert_eq!(pick_best(&[Some(2.0), Some(1.0)], false), Some(1));
        assert_eq!(pick_best(&[None, None], true), None);
    }

    #[test]
    fn test_kmeans_selection_finds_three() {
        let data = three_blobs();
        let selection = ClusterSelector::new(Metric::Silhouette)
            .select_best(&data, AlgorithmKind::Partitional, &kmeans_candidates(2..=6, 42))
            .unwrap();

        assert_eq!(selection.model.n_clusters(), 3);
        assert_eq!(selection.candidates.len(), 5);
        assert!(selection.candidates.iter().all(|c| c.inertia.is_some()));
    }

    #[test]
    fn test_davies_bouldin_minimized() {
        let data = three_blobs();
        let selection = ClusterSelector::new(Metric::DaviesBouldin)
            .select_best(&data, AlgorithmKind::Hierarchical, &hierarchical_candidates(2..=5, Linkage::Ward))
            .unwrap();
        assert_eq!(selection.model.n_clusters(), 3);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let data = three_blobs();
        let err = ClusterSelector::default()
            .select_best(&data, AlgorithmKind::DensityBased, &kmeans_candidates(2..=3, 1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "candidates", .. }));
    }

    #[test]
    fn test_oversized_k_is_excluded_not_fatal() {
        let data = three_blobs();
        let selection = ClusterSelector::default()
            .select_best(&data, AlgorithmKind::Partitional, &kmeans_candidates(3..=40, 42))
            .unwrap();
        let failed = selection
            .candidates
            .iter()
            .filter(|c| matches!(
                c.status,
                CandidateStatus::Excluded { reason: ExclusionReason::FitFailed { .. } }
            ))
            .count();
        assert_eq!(failed, 40 - 15);
    }

    #[test]
    fn test_dbscan_all_excluded() {
        let data = three_blobs();
        // Tiny epsilon: everything is noise
        let err = ClusterSelector::default()
            .select_best(&data, AlgorithmKind::DensityBased, &dbscan_grid(&[0.01], &[3, 4]))
            .unwrap_err();
        assert!(matches!(err, Error::NoViableConfiguration { evaluated: 2 }));
    }

    #[test]
    fn test_dbscan_noise_limit() {
        let data = three_blobs();
        let candidates = dbscan_grid(&[0.01, 1.0], &[3]);
        let selection = ClusterSelector::new(Metric::Silhouette)
            .with_max_noise_fraction(0.1)
            .select_best(&data, AlgorithmKind::DensityBased, &candidates)
            .unwrap();
        assert_eq!(selection.best_index, 1);
        assert!(!selection.candidates[0].is_ranked());
        assert_eq!(selection.model.n_clusters(), 3);
    }

    #[test]
    fn test_selector_rejects_empty_data() {
        let empty = ScaledMatrix::new(
            crate::data::Schema::anonymous(2),
            ndarray::Array2::zeros((0, 2)),
        )
        .unwrap();
        assert!(matches!(
            ClusterSelector::default().select_best(
                &empty,
                AlgorithmKind::Partitional,
                &kmeans_candidates(2..=3, 42)
            ),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn test_grid_order() {
        let grid = dbscan_grid(&[0.5, 1.0], &[2, 3]);
        assert_eq!(grid.len(), 4);
        assert_eq!(grid[1], Algorithm::from(Dbscan::new(0.5, 3)));
        assert_eq!(grid[2], Algorithm::from(Dbscan::new(1.0, 2)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn selection_is_never_excluded(
            rows in proptest::collection::vec(proptest::collection::vec(-10.0f64..10.0, 2), 4..40),
            max_noise in 0.0f64..1.0,
        ) {
            let data = ScaledMatrix::from_rows(&rows).unwrap();
            let candidates = dbscan_grid(&[0.5, 1.0, 2.0, 4.0], &[2, 3, 5]);
            let selector = ClusterSelector::new(Metric::Silhouette).with_max_noise_fraction(max_noise);
            match selector.select_best(&data, AlgorithmKind::DensityBased, &candidates) {
                Ok(selection) => {
                    prop_assert!(selection.candidates[selection.best_index].is_ranked());
                    prop_assert!(selection.model.n_clusters() >= 1);
                    let noise = selection.model.labels().iter().filter(|&&l| l == NOISE).count();
                    prop_assert!(noise as f64 / rows.len() as f64 <= max_noise);
                    prop_assert!(selection.report.silhouette.is_some());
                }
                Err(e) => prop_assert!(
                    matches!(e, Error::NoViableConfiguration { .. }),
                    "expected NoViableConfiguration, got {e:?}"
                ),
            }
        }
    }
}
