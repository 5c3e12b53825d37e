//! # cohort
//!
//! Customer segmentation: turn a table of behavioural and demographic fields
//! into a handful of named, profiled segments.
//!
//! The pieces compose left to right and can be used on their own:
//!
//! - [`preprocess`]: missing-value imputation and outlier capping
//! - [`scaler`]: per-field standard, min-max or robust scaling
//! - [`cluster`]: k-means, DBSCAN, agglomerative and Gaussian mixture clustering
//! - [`metrics`]: silhouette, Calinski-Harabasz and Davies-Bouldin evaluation
//! - [`select`]: choosing a configuration (e.g. `k`) by internal validation
//! - [`profile`]: per-segment statistics and rule-based names
//! - [`pipeline`]: all of the above behind one config
//! - [`synthetic`]: seeded synthetic customers for demos and tests
//!
//! Clustering always runs on a [`ScaledMatrix`](data::ScaledMatrix), so
//! unscaled data cannot reach a distance computation by accident.
//!
//! The `parallel` feature (on by default) fans restarts, candidates and
//! pairwise metrics out over rayon.

pub mod cluster;
pub mod data;
/// Error types used across `cohort`.
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod preprocess;
pub mod profile;
pub mod scaler;
pub mod select;
pub mod synthetic;

mod stats;


pub use error::{Error, Result};

pub use cluster::{
    Algorithm, AlgorithmKind, ClusterModel, Clustering, Dbscan, Gmm, HierarchicalClustering,
    Kmeans, Label, Linkage, SoftClustering, NOISE,
};
pub use data::{FeatureVector, ScaledMatrix, ScaledVector, Schema};
pub use metrics::{evaluate, EvaluationReport, Metric};
pub use pipeline::{Assignment, Segmentation, SegmentationConfig, Segmenter};
pub use preprocess::{ImputeStrategy, Imputer, OutlierCapper, RawTable};
pub use profile::{build_profiles, ClusterProfile, NamingRules};
pub use scaler::{Scaler, ScalingMethod};
pub use select::{ClusterSelector, Selection};
