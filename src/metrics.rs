//! Internal clustering validation metrics.
//!
//! Measures for assessing clustering quality without ground truth, from the
//! geometry of the scaled data alone.
//!
//! # Metrics Overview
//!
//! | Metric | Range | Best | Measures |
//! |--------|-------|------|----------|
//! | [`silhouette_score`] | [-1, 1] | higher | Cohesion vs. separation per point |
//! | [`calinski_harabasz`] | [0, ∞) | higher | Between- vs. within-cluster dispersion |
//! | [`davies_bouldin`] | [0, ∞) | lower | Worst-case cluster similarity |
//!
//! # Noise
//!
//! Points labelled [`NOISE`](crate::cluster::NOISE) are left out of every
//! metric. A metric is undefined (`None`) when fewer than two clusters remain,
//! or when there are no more non-noise points than clusters.
//!
//! # Example
//!
//! ```rust
//! use cohort::data::ScaledMatrix;
//! use cohort::metrics::{evaluate, silhouette_score};
//!
//! let data = ScaledMatrix::from_rows(&[
//!     vec![0.0, 0.0],
//!     vec![0.0, 1.0],
//!     vec![10.0, 10.0],
//!     vec![10.0, 11.0],
//! ])
//! .unwrap();
//! let labels = [0, 0, 1, 1];
//!
//! let s = silhouette_score(&data, &labels).unwrap().unwrap();
//! assert!(s > 0.9);
//!
//! let report = evaluate(&data, &labels).unwrap();
//! assert_eq!(report.n_clusters, 2);
//! ```
//!
//! # References
//!
//! - Rousseeuw (1987). "Silhouettes: a graphical aid to the interpretation
//!   and validation of cluster analysis"
//! - Caliński & Harabasz (1974). "A dendrite method for cluster analysis"
//! - Davies & Bouldin (1979). "A Cluster Separation Measure"

use crate::cluster::{is_noise, Label};
use crate::data::ScaledMatrix;
use crate::error::{Error, Result};
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Internal validation metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Metric {
    /// Mean silhouette coefficient.
    #[default]
    Silhouette,
    /// Variance ratio criterion.
    CalinskiHarabasz,
    /// Davies-Bouldin index.
    DaviesBouldin,
}

impl Metric {
    /// All metrics, in report order.
    pub const ALL: [Metric; 3] = [
        Metric::Silhouette,
        Metric::CalinskiHarabasz,
        Metric::DaviesBouldin,
    ];

    /// Whether larger scores mean better clusterings.
    pub fn higher_is_better(self) -> bool {
        !matches!(self, Metric::DaviesBouldin)
    }

    /// Stable snake_case name.
    pub fn name(self) -> &'static str {
        match self {
            Metric::Silhouette => "silhouette",
            Metric::CalinskiHarabasz => "calinski_harabasz",
            Metric::DaviesBouldin => "davies_bouldin",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse reading of a silhouette score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SilhouetteQuality {
    /// Score ≤ 0.25: no substantial structure.
    Poor,
    /// 0.25 < score ≤ 0.5: weak structure.
    Fair,
    /// 0.5 < score ≤ 0.7: reasonable structure.
    Good,
    /// Score > 0.7: strong structure.
    Excellent,
}

impl SilhouetteQuality {
    /// Band for a silhouette score.
    pub fn from_score(score: f64) -> Self {
        if score > 0.7 {
            SilhouetteQuality::Excellent
        } else if score > 0.5 {
            SilhouetteQuality::Good
        } else if score > 0.25 {
            SilhouetteQuality::Fair
        } else {
            SilhouetteQuality::Poor
        }
    }
}

/// Quality scores and size statistics of one clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Total points, noise included.
    pub n_points: usize,
    /// Distinct non-noise labels.
    pub n_clusters: usize,
    /// Mean silhouette coefficient.
    pub silhouette: Option<f64>,
    /// Calinski-Harabasz index.
    pub calinski_harabasz: Option<f64>,
    /// Davies-Bouldin index.
    pub davies_bouldin: Option<f64>,
    /// Points per non-noise label.
    pub cluster_sizes: BTreeMap<Label, usize>,
    /// Points labelled noise.
    pub n_noise: usize,
    /// `n_noise / n_points`, present only when noise exists.
    pub noise_fraction: Option<f64>,
    /// Coefficient of variation (std / mean) of cluster sizes.
    pub size_cv: Option<f64>,
    /// Band of the silhouette score.
    pub silhouette_quality: Option<SilhouetteQuality>,
}

impl EvaluationReport {
    /// Score for one metric.
    pub fn score(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Silhouette => self.silhouette,
            Metric::CalinskiHarabasz => self.calinski_harabasz,
            Metric::DaviesBouldin => self.davies_bouldin,
        }
    }

    /// Defined scores by metric name.
    pub fn scores(&self) -> BTreeMap<&'static str, f64> {
        Metric::ALL
            .iter()
            .filter_map(|&m| self.score(m).map(|s| (m.name(), s)))
            .collect()
    }

    /// Noise fraction, zero when there is no noise.
    pub fn noise_ratio(&self) -> f64 {
        self.noise_fraction.unwrap_or(0.0)
    }
}

/// Non-noise point indices grouped by label.
struct Groups {
    members: Vec<Vec<usize>>,
    n_points: usize,
}

impl Groups {
    fn new(labels: &[Label]) -> Self {
        let mut by_label: BTreeMap<Label, Vec<usize>> = BTreeMap::new();
        for (i, &label) in labels.iter().enumerate() {
            if !is_noise(label) {
                by_label.entry(label).or_default().push(i);
            }
        }
        let n_points = by_label.values().map(Vec::len).sum();
        Self {
            members: by_label.into_values().collect(),
            n_points,
        }
    }

    fn is_defined(&self) -> bool {
        let k = self.members.len();
        k >= 2 && self.n_points > k
    }

    fn centroids(&self, data: ArrayView2<'_, f64>) -> Vec<Array1<f64>> {
        self.members
            .iter()
            .map(|idx| {
                let mut c: Array1<f64> = Array1::zeros(data.ncols());
                for &i in idx {
                    c += &data.row(i);
                }
                c / idx.len() as f64
            })
            .collect()
    }
}

fn check_lengths(data: &ScaledMatrix, labels: &[Label]) -> Result<()> {
    if data.nrows() != labels.len() {
        return Err(Error::InputMismatch {
            vectors: data.nrows(),
            labels: labels.len(),
        });
    }
    Ok(())
}

#[inline]
fn distance(data: ArrayView2<'_, f64>, i: usize, j: usize) -> f64 {
    crate::cluster::squared_distance(data.row(i), data.row(j)).sqrt()
}

fn euclidean(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    crate::cluster::squared_distance(a.view(), b.view()).sqrt()
}

/// Per-point silhouette coefficient; `None` for noise points.
///
/// Returns `Ok(None)` when the silhouette is undefined for this labelling.
///
/// ```text
/// s(i) = (b(i) - a(i)) / max(a(i), b(i))
/// ```
///
/// where `a(i)` is the mean distance to the other members of the point's own
/// cluster and `b(i)` the smallest mean distance to another cluster. Points
/// in singleton clusters score 0.
pub fn silhouette_samples(data: &ScaledMatrix, labels: &[Label]) -> Result<Option<Vec<Option<f64>>>> {
    check_lengths(data, labels)?;
    let groups = Groups::new(labels);
    if !groups.is_defined() {
        return Ok(None);
    }
    let view = data.data();

    // cluster position of each point, by group order
    let mut owner = vec![usize::MAX; labels.len()];
    for (g, idx) in groups.members.iter().enumerate() {
        for &i in idx {
            owner[i] = g;
        }
    }

    let score = |i: usize| -> Option<f64> {
        let own = owner[i];
        if own == usize::MAX {
            return None;
        }
        let own_members = &groups.members[own];
        if own_members.len() == 1 {
            return Some(0.0);
        }
        let a = own_members
            .iter()
            .filter(|&&j| j != i)
            .map(|&j| distance(view, i, j))
            .sum::<f64>()
            / (own_members.len() - 1) as f64;
        let b = groups
            .members
            .iter()
            .enumerate()
            .filter(|(g, _)| *g != own)
            .map(|(_, idx)| {
                idx.iter().map(|&j| distance(view, i, j)).sum::<f64>() / idx.len() as f64
            })
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        Some(if denom > 0.0 { (b - a) / denom } else { 0.0 })
    };

    #[cfg(feature = "parallel")]
    let samples: Vec<Option<f64>> = (0..labels.len()).into_par_iter().map(score).collect();
    #[cfg(not(feature = "parallel"))]
    let samples: Vec<Option<f64>> = (0..labels.len()).map(score).collect();

    Ok(Some(samples))
}

/// Mean silhouette coefficient over non-noise points, in [-1, 1].
pub fn silhouette_score(data: &ScaledMatrix, labels: &[Label]) -> Result<Option<f64>> {
    Ok(silhouette_samples(data, labels)?.map(|samples| {
        let values: Vec<f64> = samples.into_iter().flatten().collect();
        values.iter().sum::<f64>() / values.len() as f64
    }))
}

/// Calinski-Harabasz index (variance ratio criterion).
///
/// ```text
/// CH = [B / (k - 1)] / [W / (n - k)]
/// ```
///
/// `B` is the between-cluster dispersion (size-weighted squared distance of
/// each centroid to the overall mean), `W` the within-cluster sum of squares.
/// When `W = 0` every cluster is a single repeated point and the index is 1.
pub fn calinski_harabasz(data: &ScaledMatrix, labels: &[Label]) -> Result<Option<f64>> {
    check_lengths(data, labels)?;
    let groups = Groups::new(labels);
    if !groups.is_defined() {
        return Ok(None);
    }
    let view = data.data();
    let centroids = groups.centroids(view);

    let mut overall: Array1<f64> = Array1::zeros(view.ncols());
    for idx in &groups.members {
        for &i in idx {
            overall += &view.row(i);
        }
    }
    overall /= groups.n_points as f64;

    let mut between = 0.0;
    let mut within = 0.0;
    for (idx, centroid) in groups.members.iter().zip(&centroids) {
        let shift = euclidean(centroid, &overall);
        between += idx.len() as f64 * shift * shift;
        for &i in idx {
            within += crate::cluster::squared_distance(view.row(i), centroid.view());
        }
    }

    if within == 0.0 {
        return Ok(Some(1.0));
    }
    let k = groups.members.len() as f64;
    let n = groups.n_points as f64;
    Ok(Some((between / (k - 1.0)) / (within / (n - k))))
}

/// Davies-Bouldin index (lower is better).
///
/// ```text
/// DB = (1/k) Σᵢ maxⱼ≠ᵢ (sᵢ + sⱼ) / d(cᵢ, cⱼ)
/// ```
///
/// `sᵢ` is the mean distance of cluster i's points to its centroid. A pair of
/// coincident centroids contributes 0 rather than dividing by zero.
pub fn davies_bouldin(data: &ScaledMatrix, labels: &[Label]) -> Result<Option<f64>> {
    check_lengths(data, labels)?;
    let groups = Groups::new(labels);
    if !groups.is_defined() {
        return Ok(None);
    }
    let view = data.data();
    let centroids = groups.centroids(view);

    let scatter: Vec<f64> = groups
        .members
        .iter()
        .zip(&centroids)
        .map(|(idx, c)| {
            idx.iter()
                .map(|&i| crate::cluster::squared_distance(view.row(i), c.view()).sqrt())
                .sum::<f64>()
                / idx.len() as f64
        })
        .collect();

    let k = centroids.len();
    let total: f64 = (0..k)
        .map(|i| {
            (0..k)
                .filter(|&j| j != i)
                .map(|j| {
                    let d = euclidean(&centroids[i], &centroids[j]);
                    if d > 0.0 {
                        (scatter[i] + scatter[j]) / d
                    } else {
                        0.0
                    }
                })
                .fold(0.0, f64::max)
        })
        .sum();
    Ok(Some(total / k as f64))
}

/// Score a labelling with every metric and summarize cluster sizes.
///
/// # Errors
///
/// [`Error::InputMismatch`] if `labels` and `data` differ in length.
pub fn evaluate(data: &ScaledMatrix, labels: &[Label]) -> Result<EvaluationReport> {
    check_lengths(data, labels)?;

    let mut cluster_sizes: BTreeMap<Label, usize> = BTreeMap::new();
    for &label in labels.iter().filter(|&&l| !is_noise(l)) {
        *cluster_sizes.entry(label).or_insert(0) += 1;
    }
    let n_points = labels.len();
    let n_noise = n_points - cluster_sizes.values().sum::<usize>();
    let noise_fraction = (n_noise > 0).then(|| n_noise as f64 / n_points as f64);

    let size_cv = if cluster_sizes.is_empty() {
        None
    } else {
        let sizes: Vec<f64> = cluster_sizes.values().map(|&s| s as f64).collect();
        Some(crate::stats::std_dev(&sizes) / crate::stats::mean(&sizes))
    };

    let silhouette = silhouette_score(data, labels)?;

    Ok(EvaluationReport {
        n_points,
        n_clusters: cluster_sizes.len(),
        silhouette,
        calinski_harabasz: calinski_harabasz(data, labels)?,
        davies_bouldin: davies_bouldin(data, labels)?,
        cluster_sizes,
        n_noise,
        noise_fraction,
        size_cv,
        silhouette_quality: silhouette.map(SilhouetteQuality::from_score),
    })
}
