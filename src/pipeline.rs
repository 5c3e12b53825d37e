//! End-to-end segmentation: raw table in, named segments out.
//!
//! ```text
//! RawTable
//!   └─ Imputer ─▶ OutlierCapper ─▶ Scaler ─▶ ClusterSelector ─▶ best ClusterModel
//!                                                                 └─ profiles (unscaled values)
//! ```
//!
//! The fitted [`Segmentation`] is plain serde data: every fitted stage plus the
//! chosen model, its evaluation and the segment profiles. Persist it with any
//! serde format and call [`Segmentation::assign`] to place new customers.
//!
//! ```rust,no_run
//! use cohort::pipeline::{SegmentationConfig, Segmenter};
//! use cohort::synthetic::SyntheticConfig;
//!
//! let data = SyntheticConfig::new(1000).generate().unwrap();
//! let segmentation = Segmenter::new(SegmentationConfig::default())
//!     .fit(&data.table)
//!     .unwrap();
//! for profile in segmentation.profiles.values() {
//!     println!("{}: {} customers ({})", profile.name, profile.size, profile.description);
//! }
//! ```

use crate::cluster::{is_noise, Algorithm, ClusterModel, Label};
use crate::data::FeatureVector;
use crate::error::{Error, Result};
use crate::metrics::{EvaluationReport, Metric};
use crate::preprocess::{ImputeStrategy, Imputer, OutlierCapper, RawTable};
use crate::profile::{build_profiles_with, ClusterProfile, NamingRules};
use crate::scaler::{Scaler, ScalingMethod};
use crate::select::{kmeans_candidates, CandidateOutcome, ClusterSelector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Everything that parameterises a segmentation run.
///
/// Missing JSON keys take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Fill statistic for missing values.
    pub impute: ImputeStrategy,
    /// Clamp values to IQR fences before scaling.
    pub cap_outliers: bool,
    /// Scaling method.
    pub scaling: ScalingMethod,
    /// Selection metric.
    pub metric: Metric,
    /// Noise limit for density-based candidates.
    pub max_noise_fraction: f64,
    /// Candidate configurations, all of one algorithm family.
    pub candidates: Vec<Algorithm>,
    /// Segment naming rules.
    pub naming: NamingRules,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            impute: ImputeStrategy::default(),
            cap_outliers: true,
            scaling: ScalingMethod::default(),
            metric: Metric::default(),
            max_noise_fraction: 0.5,
            candidates: kmeans_candidates(2..=8, 42),
            naming: NamingRules::default(),
        }
    }
}

impl SegmentationConfig {
    /// Parse a JSON config.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs a [`SegmentationConfig`] against data.
#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    config: SegmentationConfig,
}

impl Segmenter {
    /// Create a segmenter.
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Fit every stage and pick the best clustering.
    ///
    /// # Errors
    ///
    /// Any error of the individual stages; [`Error::InvalidParameter`] if the
    /// config has no candidates.
    pub fn fit(&self, table: &RawTable) -> Result<Segmentation> {
        let config = &self.config;
        let kind = config
            .candidates
            .first()
            .map(Algorithm::kind)
            .ok_or_else(|| Error::invalid_parameter("candidates", "must not be empty"))?;

        let imputer = Imputer::fit(table, config.impute)?;
        let vectors = imputer.transform(table)?;

        let (capper, cleaned) = if config.cap_outliers {
            let capper = OutlierCapper::fit(&vectors)?;
            let cleaned = capper.apply(&vectors)?;
            (Some(capper), cleaned)
        } else {
            (None, vectors.clone())
        };

        let scaler = Scaler::fit_with(config.scaling, &cleaned)?;
        let matrix = scaler.transform_batch(&cleaned)?;

        let selection = ClusterSelector::new(config.metric)
            .with_max_noise_fraction(config.max_noise_fraction)
            .select_best(&matrix, kind, &config.candidates)?;

        let profiles = build_profiles_with(&vectors, selection.model.labels(), &config.naming)?;

        info!(
            n_customers = table.len(),
            algorithm = %selection.model.algorithm(),
            n_segments = profiles.len(),
            silhouette = ?selection.report.silhouette,
            "segmentation fitted"
        );

        Ok(Segmentation {
            imputer,
            capper,
            scaler,
            model: selection.model,
            report: selection.report,
            profiles,
            candidates: selection.candidates,
        })
    }
}

/// A fitted segmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segmentation {
    /// Missing-value filler.
    pub imputer: Imputer,
    /// Outlier fences, when enabled.
    pub capper: Option<OutlierCapper>,
    /// Fitted scaler.
    pub scaler: Scaler,
    /// Chosen clustering.
    pub model: ClusterModel,
    /// Evaluation of the chosen clustering.
    pub report: EvaluationReport,
    /// Profile per segment label.
    pub profiles: BTreeMap<Label, ClusterProfile>,
    /// Outcome of every candidate configuration.
    pub candidates: Vec<CandidateOutcome>,
}

/// Where a customer landed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment<'a> {
    /// Segment label, or [`NOISE`](crate::cluster::NOISE).
    pub label: Label,
    /// Profile of the segment; `None` for noise.
    pub profile: Option<&'a ClusterProfile>,
}

impl Assignment<'_> {
    /// Whether the customer fits no segment.
    pub fn is_noise(&self) -> bool {
        is_noise(self.label)
    }

    /// Segment name, if any.
    pub fn name(&self) -> Option<&str> {
        self.profile.map(|p| p.name.as_str())
    }
}

impl Segmentation {
    /// Assign a complete customer record.
    ///
    /// # Errors
    ///
    /// [`Error::Schema`] if the record's fields differ from training,
    /// [`Error::NonFiniteInput`] for NaN or infinite values.
    pub fn assign(&self, vector: &FeatureVector) -> Result<Assignment<'_>> {
        let scaled = match &self.capper {
            Some(capper) => self.scaler.transform(&capper.cap(vector)?)?,
            None => self.scaler.transform(vector)?,
        };
        let label = self.model.predict(&scaled)?;
        Ok(Assignment {
            label,
            profile: self.profiles.get(&label),
        })
    }

    /// Assign a record that may have gaps, filling them as at training time.
    pub fn assign_record(&self, record: &[Option<f64>]) -> Result<Assignment<'_>> {
        let vector = self.imputer.complete(self.scaler.schema(), record)?;
        self.assign(&vector)
    }

    /// Assign many records.
    pub fn assign_batch(&self, vectors: &[FeatureVector]) -> Result<Vec<Assignment<'_>>> {
        #[cfg(feature = "parallel")]
        {
            vectors.par_iter().map(|v| self.assign(v)).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            vectors.iter().map(|v| self.assign(v)).collect()
        }
    }

    /// Profile of a segment.
    pub fn profile(&self, label: Label) -> Option<&ClusterProfile> {
        self.profiles.get(&label)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restore from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
