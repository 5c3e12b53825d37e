//! Per-field scaling learned from a reference dataset.
//!
//! Distance-based clustering is dominated by whichever field has the largest
//! numeric range: income in dollars swamps recency in days. Scaling puts every
//! field on a comparable footing first.
//!
//! Every method has the same shape:
//!
//! ```text
//! scaled = (x - center) / spread
//! ```
//!
//! | Method | center | spread |
//! |--------|--------|--------|
//! | [`ScalingMethod::Standard`] | mean | population std |
//! | [`ScalingMethod::MinMax`] | min | max − min |
//! | [`ScalingMethod::Robust`] | median | IQR (Q3 − Q1) |
//!
//! A field whose observed minimum equals its maximum is *constant*: it is
//! mapped to exactly `0.0` for every input, never divided by zero.
//!
//! The fitted [`Scaler`] is immutable. `transform` takes `&self`, so one
//! scaler can serve any number of concurrent callers.

use crate::data::{common_schema, FeatureVector, ScaledMatrix, ScaledVector, Schema};
use crate::error::{Error, Result};
use crate::stats;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// How center and spread are estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScalingMethod {
    /// Zero mean, unit variance.
    #[default]
    Standard,
    /// Map the observed range onto [0, 1].
    MinMax,
    /// Median-centred, IQR-scaled; insensitive to outliers.
    Robust,
}

/// Learned transform for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldScale {
    /// Field name.
    pub field: String,
    /// Subtracted from every value.
    pub center: f64,
    /// Divisor; `0.0` marks a constant field.
    pub spread: f64,
}

impl FieldScale {
    /// Whether the field was constant at fit time.
    pub fn is_constant(&self) -> bool {
        self.spread == 0.0
    }

    #[inline]
    fn apply(&self, x: f64) -> f64 {
        if self.is_constant() {
            0.0
        } else {
            (x - self.center) / self.spread
        }
    }

    #[inline]
    fn invert(&self, z: f64) -> f64 {
        if self.is_constant() {
            self.center
        } else {
            z * self.spread + self.center
        }
    }
}

/// Fitted scaler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScalerRepr")]
pub struct Scaler {
    schema: Arc<Schema>,
    method: ScalingMethod,
    params: Vec<FieldScale>,
}

#[derive(Deserialize)]
struct ScalerRepr {
    schema: Arc<Schema>,
    method: ScalingMethod,
    params: Vec<FieldScale>,
}

impl TryFrom<ScalerRepr> for Scaler {
    type Error = Error;

    fn try_from(repr: ScalerRepr) -> Result<Self> {
        let fields: Vec<&str> = repr.params.iter().map(|p| p.field.as_str()).collect();
        if fields != repr.schema.fields() {
            return Err(Error::Schema {
                expected: repr.schema.to_string(),
                found: format!("parameters for [{}]", fields.join(", ")),
            });
        }
        Ok(Self {
            schema: repr.schema,
            method: repr.method,
            params: repr.params,
        })
    }
}

impl Scaler {
    /// Fit a standard (z-score) scaler.
    pub fn fit(vectors: &[FeatureVector]) -> Result<Self> {
        Self::fit_with(ScalingMethod::Standard, vectors)
    }

    /// Fit a scaler using `method`.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyInput`] for zero vectors
    /// - [`Error::Schema`] if vectors disagree on fields
    /// - [`Error::NonFiniteInput`] for NaN or infinite values
    pub fn fit_with(method: ScalingMethod, vectors: &[FeatureVector]) -> Result<Self> {
        let schema = common_schema(vectors)?;
        let rows: Vec<&[f64]> = vectors.iter().map(|v| v.values()).collect();
        for (row, values) in rows.iter().enumerate() {
            if let Some(col) = values.iter().position(|v| !v.is_finite()) {
                return Err(Error::NonFiniteInput {
                    row,
                    field: schema.fields()[col].clone(),
                });
            }
        }

        let params: Vec<FieldScale> = schema
            .fields()
            .iter()
            .enumerate()
            .map(|(j, field)| {
                let sorted = stats::sorted(&stats::column(&rows, j));
                let (min, max) = (sorted[0], sorted[sorted.len() - 1]);
                let (center, spread) = match method {
                    ScalingMethod::Standard => (stats::mean(&sorted), stats::std_dev(&sorted)),
                    ScalingMethod::MinMax => (min, max - min),
                    ScalingMethod::Robust => {
                        let q1 = stats::quantile_sorted(&sorted, 0.25);
                        let q3 = stats::quantile_sorted(&sorted, 0.75);
                        (stats::quantile_sorted(&sorted, 0.5), q3 - q1)
                    }
                };
                // Robust spread can be zero for a non-constant field (most values tied);
                // fall back to the full range so the field still carries signal.
                let spread = if min == max {
                    0.0
                } else if spread > 0.0 {
                    spread
                } else {
                    max - min
                };
                FieldScale {
                    field: field.clone(),
                    center,
                    spread,
                }
            })
            .collect();

        debug!(
            ?method,
            n_vectors = vectors.len(),
            n_fields = schema.len(),
            n_constant = params.iter().filter(|p| p.is_constant()).count(),
            "fitted scaler"
        );

        Ok(Self {
            schema,
            method,
            params,
        })
    }

    /// Schema the scaler was fitted on.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Estimation method.
    pub fn method(&self) -> ScalingMethod {
        self.method
    }

    /// Per-field parameters in schema order.
    pub fn params(&self) -> &[FieldScale] {
        &self.params
    }

    /// Parameters of a named field.
    pub fn param(&self, field: &str) -> Option<&FieldScale> {
        self.params.iter().find(|p| p.field == field)
    }

    /// Scale one vector.
    ///
    /// Fails with [`Error::Schema`] if the vector's fields differ from the fit-time schema.
    pub fn transform(&self, vector: &FeatureVector) -> Result<ScaledVector> {
        self.schema.ensure_matches(vector.schema())?;
        let values: Array1<f64> = vector
            .values()
            .iter()
            .zip(&self.params)
            .map(|(&x, p)| p.apply(x))
            .collect();
        Ok(ScaledVector::new(Arc::clone(&self.schema), values))
    }

    /// Scale a batch into the matrix form consumed by clustering.
    pub fn transform_batch(&self, vectors: &[FeatureVector]) -> Result<ScaledMatrix> {
        if vectors.is_empty() {
            return Err(Error::EmptyInput);
        }
        for v in vectors {
            self.schema.ensure_matches(v.schema())?;
        }

        let d = self.params.len();
        let scale_row = |v: &FeatureVector| -> Vec<f64> {
            v.values()
                .iter()
                .zip(&self.params)
                .map(|(&x, p)| p.apply(x))
                .collect()
        };

        #[cfg(feature = "parallel")]
        let rows: Vec<Vec<f64>> = vectors.par_iter().map(scale_row).collect();
        #[cfg(not(feature = "parallel"))]
        let rows: Vec<Vec<f64>> = vectors.iter().map(scale_row).collect();

        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let data = Array2::from_shape_vec((vectors.len(), d), flat)?;
        ScaledMatrix::new(Arc::clone(&self.schema), data)
    }

    /// Map a scaled vector back to business units.
    ///
    /// Constant fields come back as their fit-time value.
    pub fn inverse_transform(&self, scaled: &ScaledVector) -> Result<FeatureVector> {
        self.schema.ensure_matches(scaled.schema())?;
        let values = scaled
            .values()
            .iter()
            .zip(&self.params)
            .map(|(&z, p)| p.invert(z))
            .collect();
        FeatureVector::new(Arc::clone(&self.schema), values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn vectors(schema: &Arc<Schema>, rows: &[&[f64]]) -> Vec<FeatureVector> {
        rows.iter()
            .map(|r| FeatureVector::new(Arc::clone(schema), r.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_standard_scaling_zero_mean_unit_std() {
        let schema = Schema::new(["Recency", "Monetary"]).unwrap();
        let data = vectors(&schema, &[&[1.0, 100.0], &[2.0, 200.0], &[3.0, 300.0]]);
        let scaler = Scaler::fit(&data).unwrap();
        let m = scaler.transform_batch(&data).unwrap();

        for j in 0..2 {
            let col: Vec<f64> = m.data().column(j).to_vec();
            assert!(stats::mean(&col).abs() < 1e-12);
            assert!((stats::std_dev(&col) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_deserialize_checks_params_against_schema() {
        let schema = Schema::new(["Recency", "Monetary"]).unwrap();
        let data = vectors(&schema, &[&[1.0, 100.0], &[2.0, 300.0]]);
        let scaler = Scaler::fit(&data).unwrap();
        let mut json = serde_json::to_value(&scaler).unwrap();
        assert_eq!(serde_json::from_value::<Scaler>(json.clone()).unwrap(), scaler);

        json["params"].as_array_mut().unwrap().pop();
        assert!(serde_json::from_value::<Scaler>(json).is_err());
    }

    #[test]
    fn test_minmax_range() {
        let schema = Schema::new(["Age"]).unwrap();
        let data = vectors(&schema, &[&[20.0], &[40.0], &[60.0]]);
        let scaler = Scaler::fit_with(ScalingMethod::MinMax, &data).unwrap();
        let z = scaler.transform(&data[1]).unwrap();
        assert!((z.values()[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_robust_uses_median_and_iqr() {
        let schema = Schema::new(["Income"]).unwrap();
        let data = vectors(&schema, &[&[1.0], &[2.0], &[3.0], &[4.0], &[1000.0]]);
        let scaler = Scaler::fit_with(ScalingMethod::Robust, &data).unwrap();
        let p = scaler.param("Income").unwrap();
        assert_eq!(p.center, 3.0);
        assert_eq!(p.spread, 2.0);
    }

    #[test]
    fn test_constant_field_maps_to_zero() {
        let schema = Schema::new(["LoyaltyMember", "Age"]).unwrap();
        let data = vectors(&schema, &[&[1.0, 30.0], &[1.0, 40.0]]);
        for method in [ScalingMethod::Standard, ScalingMethod::MinMax, ScalingMethod::Robust] {
            let scaler = Scaler::fit_with(method, &data).unwrap();
            assert!(scaler.params()[0].is_constant());
            let probe = FeatureVector::new(Arc::clone(&schema), vec![7.0, 35.0]).unwrap();
            assert_eq!(scaler.transform(&probe).unwrap().values()[0], 0.0);
        }
    }

    #[test]
    fn test_schema_mismatch_is_error() {
        let schema = Schema::new(["a", "b"]).unwrap();
        let scaler = Scaler::fit(&vectors(&schema, &[&[1.0, 2.0], &[3.0, 4.0]])).unwrap();

        let other = Schema::new(["b", "a"]).unwrap();
        let v = FeatureVector::new(other, vec![1.0, 2.0]).unwrap();
        assert!(matches!(scaler.transform(&v), Err(Error::Schema { .. })));
    }

    #[test]
    fn test_fit_errors() {
        assert!(matches!(Scaler::fit(&[]), Err(Error::EmptyInput)));

        let a = Schema::new(["a"]).unwrap();
        let b = Schema::new(["b"]).unwrap();
        let mixed = vec![
            FeatureVector::new(a, vec![1.0]).unwrap(),
            FeatureVector::new(b, vec![2.0]).unwrap(),
        ];
        assert!(matches!(Scaler::fit(&mixed), Err(Error::Schema { .. })));

        let s = Schema::new(["a"]).unwrap();
        let nan = vectors(&s, &[&[1.0], &[f64::NAN]]);
        assert!(matches!(Scaler::fit(&nan), Err(Error::NonFiniteInput { row: 1, .. })));
    }

    proptest! {
        #[test]
        fn transform_then_inverse_round_trips(
            rows in proptest::collection::vec(
                proptest::collection::vec(-1.0e6f64..1.0e6, 3),
                2..40,
            ),
            method_idx in 0usize..3,
        ) {
            let method = [ScalingMethod::Standard, ScalingMethod::MinMax, ScalingMethod::Robust][method_idx];
            let schema = Schema::new(["a", "b", "c"]).unwrap();
            let data: Vec<FeatureVector> = rows
                .iter()
                .map(|r| FeatureVector::new(Arc::clone(&schema), r.clone()).unwrap())
                .collect();
            let scaler = Scaler::fit_with(method, &data).unwrap();

            for v in &data {
                let back = scaler.inverse_transform(&scaler.transform(v).unwrap()).unwrap();
                for (j, (orig, rt)) in v.values().iter().zip(back.values()).enumerate() {
                    if !scaler.params()[j].is_constant() {
                        prop_assert!((orig - rt).abs() <= 1e-6 * (1.0 + orig.abs()));
                    }
                }
            }
        }

        #[test]
        fn constant_fields_always_zero(value in -1.0e9f64..1.0e9, probe in -1.0e9f64..1.0e9, n in 1usize..20) {
            let schema = Schema::new(["k"]).unwrap();
            let data: Vec<FeatureVector> = (0..n)
                .map(|_| FeatureVector::new(Arc::clone(&schema), vec![value]).unwrap())
                .collect();
            let scaler = Scaler::fit(&data).unwrap();
            let v = FeatureVector::new(schema, vec![probe]).unwrap();
            prop_assert_eq!(scaler.transform(&v).unwrap().values()[0], 0.0);
        }
    }
}
