//! Segment profiles in business units.
//!
//! Profiles are computed from the *unscaled* feature vectors, so a segment
//! reads as "mean Monetary 9,400" rather than "Monetary z = 2.1".
//!
//! Naming is data-driven: [`NamingRules`] is an ordered list of
//! `(condition, name)` pairs evaluated against a profile's field means; the
//! first matching rule names the segment. Rules serialize with serde, so a
//! deployment can ship its own rule set without code changes.
//!
//! ```rust
//! use cohort::data::{FeatureVector, Schema};
//! use cohort::profile::build_profiles;
//! use std::sync::Arc;
//!
//! let schema = Schema::new(["Recency", "Frequency", "Monetary"]).unwrap();
//! let rows = [[5.0, 20.0, 9000.0], [8.0, 18.0, 12000.0], [200.0, 2.0, 300.0]];
//! let vectors: Vec<FeatureVector> = rows
//!     .iter()
//!     .map(|r| FeatureVector::new(Arc::clone(&schema), r.to_vec()).unwrap())
//!     .collect();
//!
//! let profiles = build_profiles(&vectors, &[0, 0, 1]).unwrap();
//! assert_eq!(profiles[&0].name, "VIP Champions");
//! assert_eq!(profiles[&1].name, "Occasional Shoppers");
//! ```

use crate::cluster::{is_noise, Label};
use crate::data::{common_schema, FeatureVector};
use crate::error::{Error, Result};
use crate::stats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fields whose |z| of the cluster mean exceeds this are "distinguishing".
const DISTINGUISHING_Z: f64 = 0.5;
/// At most this many fields appear in a description.
const DESCRIPTION_FIELDS: usize = 3;

/// Distribution summary of one field within one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    /// Arithmetic mean.
    pub mean: f64,
    /// Median.
    pub median: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Minimum.
    pub min: f64,
    /// Maximum.
    pub max: f64,
}

impl FieldSummary {
    fn from_values(values: &[f64]) -> Self {
        let sorted = stats::sorted(values);
        Self {
            mean: stats::mean(values),
            median: stats::quantile_sorted(&sorted, 0.5),
            std: stats::std_dev(values),
            min: sorted.first().copied().unwrap_or(f64::NAN),
            max: sorted.last().copied().unwrap_or(f64::NAN),
        }
    }
}

/// Summary of one non-noise cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    /// Cluster label.
    pub label: Label,
    /// Rule-derived segment name.
    pub name: String,
    /// Members in the cluster.
    pub size: usize,
    /// `size` over all profiled points, noise included.
    pub fraction: f64,
    /// Per-field summaries, by field name.
    pub fields: BTreeMap<String, FieldSummary>,
    /// Most distinguishing fields relative to the whole population.
    pub description: String,
}

impl ClusterProfile {
    /// Mean of a field, if the field exists.
    pub fn mean(&self, field: &str) -> Option<f64> {
        self.fields.get(field).map(|s| s.mean)
    }
}

/// Predicate over a profile's field means.
///
/// A condition on a field the profile does not have never matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Field mean strictly above `value`.
    MeanAbove {
        /// Field name.
        field: String,
        /// Threshold.
        value: f64,
    },
    /// Field mean strictly below `value`.
    MeanBelow {
        /// Field name.
        field: String,
        /// Threshold.
        value: f64,
    },
    /// Every inner condition matches.
    All(Vec<Condition>),
    /// At least one inner condition matches.
    Any(Vec<Condition>),
}

impl Condition {
    /// `field` mean > `value`.
    pub fn mean_above(field: impl Into<String>, value: f64) -> Self {
        Condition::MeanAbove {
            field: field.into(),
            value,
        }
    }

    /// `field` mean < `value`.
    pub fn mean_below(field: impl Into<String>, value: f64) -> Self {
        Condition::MeanBelow {
            field: field.into(),
            value,
        }
    }

    /// Whether the profile satisfies this condition.
    pub fn matches(&self, profile: &ClusterProfile) -> bool {
        match self {
            Condition::MeanAbove { field, value } => profile.mean(field).is_some_and(|m| m > *value),
            Condition::MeanBelow { field, value } => profile.mean(field).is_some_and(|m| m < *value),
            Condition::All(inner) => inner.iter().all(|c| c.matches(profile)),
            Condition::Any(inner) => inner.iter().any(|c| c.matches(profile)),
        }
    }
}

/// One naming rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingRule {
    /// When the rule applies.
    pub condition: Condition,
    /// Segment name it assigns.
    pub name: String,
}

/// Ordered naming rules; the first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingRules {
    rules: Vec<NamingRule>,
}

impl NamingRules {
    /// Rules from an ordered list.
    pub fn new(rules: Vec<NamingRule>) -> Self {
        Self { rules }
    }

    /// No rules: every segment gets the fallback name.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule with the lowest priority so far.
    pub fn with_rule(mut self, condition: Condition, name: impl Into<String>) -> Self {
        self.rules.push(NamingRule {
            condition,
            name: name.into(),
        });
        self
    }

    /// Rules in priority order.
    pub fn rules(&self) -> &[NamingRule] {
        &self.rules
    }

    /// Name for a profile, falling back to `Segment {label}`.
    pub fn name_for(&self, profile: &ClusterProfile) -> String {
        self.rules
            .iter()
            .find(|r| r.condition.matches(profile))
            .map(|r| r.name.clone())
            .unwrap_or_else(|| format!("Segment {}", profile.label))
    }
}

impl Default for NamingRules {
    /// RFM segment names over `Recency` (days), `Frequency` (orders) and
    /// `Monetary` (spend).
    fn default() -> Self {
        Self::empty()
            .with_rule(
                Condition::All(vec![
                    Condition::mean_above("Monetary", 5000.0),
                    Condition::mean_above("Frequency", 15.0),
                ]),
                "VIP Champions",
            )
            .with_rule(
                Condition::All(vec![
                    Condition::mean_above("Monetary", 3000.0),
                    Condition::mean_below("Recency", 30.0),
                ]),
                "High-Value Loyalists",
            )
            .with_rule(
                Condition::All(vec![
                    Condition::mean_above("Monetary", 2000.0),
                    Condition::mean_above("Frequency", 8.0),
                ]),
                "Loyal Customers",
            )
            .with_rule(
                Condition::All(vec![
                    Condition::mean_above("Monetary", 1000.0),
                    Condition::mean_below("Recency", 60.0),
                ]),
                "Potential Loyalists",
            )
            .with_rule(Condition::mean_below("Frequency", 5.0), "Occasional Shoppers")
            .with_rule(Condition::mean_above("Recency", 90.0), "At-Risk/Dormant")
    }
}

/// Profiles for every non-noise label, named with [`NamingRules::default`].
pub fn build_profiles(
    vectors: &[FeatureVector],
    labels: &[Label],
) -> Result<BTreeMap<Label, ClusterProfile>> {
    build_profiles_with(vectors, labels, &NamingRules::default())
}

/// Profiles for every non-noise label, named with `rules`.
///
/// Pure: the same inputs always give the same profiles.
///
/// # Errors
///
/// - [`Error::EmptyInput`] for zero vectors
/// - [`Error::InputMismatch`] if `labels` differs in length from `vectors`
/// - [`Error::Schema`] if vectors disagree on fields
pub fn build_profiles_with(
    vectors: &[FeatureVector],
    labels: &[Label],
    rules: &NamingRules,
) -> Result<BTreeMap<Label, ClusterProfile>> {
    let schema = common_schema(vectors)?;
    if vectors.len() != labels.len() {
        return Err(Error::InputMismatch {
            vectors: vectors.len(),
            labels: labels.len(),
        });
    }

    let rows: Vec<&[f64]> = vectors.iter().map(|v| v.values()).collect();
    let global: Vec<(f64, f64)> = (0..schema.len())
        .map(|j| {
            let col = stats::column(&rows, j);
            (stats::mean(&col), stats::std_dev(&col))
        })
        .collect();

    let mut members: BTreeMap<Label, Vec<&[f64]>> = BTreeMap::new();
    for (row, &label) in rows.iter().zip(labels) {
        if !is_noise(label) {
            members.entry(label).or_default().push(*row);
        }
    }

    let total = vectors.len() as f64;
    let mut profiles = BTreeMap::new();
    for (label, rows) in members {
        let mut fields = BTreeMap::new();
        let mut deviations: Vec<(f64, &str)> = Vec::new();
        for (j, name) in schema.fields().iter().enumerate() {
            let summary = FieldSummary::from_values(&stats::column(&rows, j));
            let (g_mean, g_std) = global[j];
            if g_std > 0.0 {
                let z = (summary.mean - g_mean) / g_std;
                if z.abs() > DISTINGUISHING_Z {
                    deviations.push((z, name.as_str()));
                }
            }
            fields.insert(name.clone(), summary);
        }

        let mut profile = ClusterProfile {
            label,
            name: String::new(),
            size: rows.len(),
            fraction: rows.len() as f64 / total,
            fields,
            description: describe(deviations),
        };
        profile.name = rules.name_for(&profile);
        profiles.insert(label, profile);
    }
    Ok(profiles)
}

/// "high X, low Y" for the largest deviations, strongest first.
fn describe(mut deviations: Vec<(f64, &str)>) -> String {
    if deviations.is_empty() {
        return "close to the population average".to_string();
    }
    // Stable sort keeps schema order among equal magnitudes.
    deviations.sort_by(|a, b| b.0.abs().total_cmp(&a.0.abs()));
    deviations
        .iter()
        .take(DESCRIPTION_FIELDS)
        .map(|(z, name)| format!("{} {}", if *z > 0.0 { "high" } else { "low" }, name))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NOISE;
    use crate::data::Schema;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn rfm(rows: &[[f64; 3]]) -> Vec<FeatureVector> {
        let schema = Schema::new(["Recency", "Frequency", "Monetary"]).unwrap();
        rows.iter()
            .map(|r| FeatureVector::new(Arc::clone(&schema), r.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_summary_statistics() {
        let vectors = rfm(&[[10.0, 2.0, 100.0], [20.0, 4.0, 300.0], [30.0, 6.0, 800.0]]);
        let profiles = build_profiles(&vectors, &[0, 0, 0]).unwrap();
        let recency = &profiles[&0].fields["Recency"];
        assert_eq!(recency.mean, 20.0);
        assert_eq!(recency.median, 20.0);
        assert_eq!(recency.min, 10.0);
        assert_eq!(recency.max, 30.0);
        assert!((recency.std - (200.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(profiles[&0].size, 3);
        assert_eq!(profiles[&0].fraction, 1.0);
    }

    #[test]
    fn test_default_naming_order() {
        let vectors = rfm(&[
            [5.0, 20.0, 9000.0],  // VIP
            [20.0, 10.0, 4000.0], // High-value loyal (recency < 30)
            [40.0, 10.0, 2500.0], // Loyal
            [45.0, 6.0, 1500.0],  // Potential
            [70.0, 3.0, 700.0],   // Occasional
            [120.0, 6.0, 600.0],  // At-risk
            [70.0, 6.0, 900.0],   // nothing matches
        ]);
        let profiles = build_profiles(&vectors, &[0, 1, 2, 3, 4, 5, 6]).unwrap();
        let names: Vec<&str> = profiles.values().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "VIP Champions",
                "High-Value Loyalists",
                "Loyal Customers",
                "Potential Loyalists",
                "Occasional Shoppers",
                "At-Risk/Dormant",
                "Segment 6",
            ]
        );
    }

    #[test]
    fn test_noise_not_profiled_but_counted() {
        let vectors = rfm(&[[1.0, 1.0, 1.0], [2.0, 2.0, 2.0], [3.0, 3.0, 3.0], [99.0, 99.0, 99.0]]);
        let profiles = build_profiles(&vectors, &[0, 0, 1, NOISE]).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[&0].fraction, 0.5);
        assert_eq!(profiles[&1].fraction, 0.25);
    }

    #[test]
    fn test_missing_field_never_matches() {
        let schema = Schema::new(["Age"]).unwrap();
        let vectors = vec![FeatureVector::new(schema, vec![30.0]).unwrap()];
        let profiles = build_profiles(&vectors, &[3]).unwrap();
        assert_eq!(profiles[&3].name, "Segment 3");
    }

    #[test]
    fn test_custom_rules_and_serde() {
        let rules = NamingRules::empty().with_rule(
            Condition::Any(vec![
                Condition::mean_above("Monetary", 1e6),
                Condition::mean_below("Recency", 15.0),
            ]),
            "Fresh",
        );
        let json = serde_json::to_string(&rules).unwrap();
        let back: NamingRules = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rules);

        let vectors = rfm(&[[10.0, 1.0, 1.0], [50.0, 1.0, 1.0]]);
        let profiles = build_profiles_with(&vectors, &[0, 1], &back).unwrap();
        assert_eq!(profiles[&0].name, "Fresh");
        assert_eq!(profiles[&1].name, "Segment 1");
    }

    #[test]
    fn test_description_names_distinguishing_fields() {
        let vectors = rfm(&[
            [5.0, 20.0, 9000.0],
            [6.0, 22.0, 9500.0],
            [200.0, 2.0, 300.0],
            [210.0, 3.0, 350.0],
        ]);
        let profiles = build_profiles(&vectors, &[0, 0, 1, 1]).unwrap();
        let d0 = &profiles[&0].description;
        assert!(d0.contains("low Recency"), "{d0}");
        assert!(d0.contains("high Monetary"), "{d0}");
        assert!(profiles[&1].description.contains("high Recency"));
    }

    #[test]
    fn test_errors() {
        let vectors = rfm(&[[1.0, 1.0, 1.0]]);
        assert!(matches!(
            build_profiles(&vectors, &[0, 1]),
            Err(Error::InputMismatch { .. })
        ));
        assert!(matches!(build_profiles(&[], &[]), Err(Error::EmptyInput)));
    }

    proptest! {
        #[test]
        fn profiles_are_deterministic(
            rows in proptest::collection::vec(
                (0.0f64..365.0, 0.0f64..30.0, 0.0f64..20000.0), 1..50),
            k in 1usize..5,
        ) {
            let rows: Vec<[f64; 3]> = rows.into_iter().map(|(r, f, m)| [r, f, m]).collect();
            let vectors = rfm(&rows);
            let labels: Vec<Label> = (0..rows.len()).map(|i| i % k).collect();
            let a = build_profiles(&vectors, &labels).unwrap();
            let b = build_profiles(&vectors, &labels).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
