//! Turning raw records into clean feature vectors.
//!
//! Raw customer tables have gaps (a missing income, an unknown open rate) and
//! long tails (a handful of customers spending 50x the median). Clustering
//! needs neither: [`Imputer`] fills gaps with a per-field statistic and
//! [`OutlierCapper`] clamps values to Tukey fences.
//!
//! ```text
//! RawTable ──Imputer──▶ [FeatureVector] ──OutlierCapper──▶ [FeatureVector] ──Scaler──▶ ...
//! ```
//!
//! Both are fitted once and then applied with `&self`, so the exact transform
//! used at training time can be replayed on new records.

use crate::data::{common_schema, FeatureVector, Schema};
use crate::error::{Error, Result};
use crate::stats;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Records with optional values, one row per customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTableRepr")]
pub struct RawTable {
    schema: Arc<Schema>,
    rows: Vec<Vec<Option<f64>>>,
}

#[derive(Deserialize)]
struct RawTableRepr {
    schema: Arc<Schema>,
    rows: Vec<Vec<Option<f64>>>,
}

impl TryFrom<RawTableRepr> for RawTable {
    type Error = Error;

    fn try_from(repr: RawTableRepr) -> Result<Self> {
        Self::new(repr.schema, repr.rows)
    }
}

/// Fail with [`Error::Schema`] unless there is one per-field entry per schema field.
fn check_per_field(schema: &Schema, what: &str, len: usize) -> Result<()> {
    if len != schema.len() {
        return Err(Error::Schema {
            expected: format!("{} {what} for {}", schema.len(), schema),
            found: format!("{len} {what}"),
        });
    }
    Ok(())
}

impl RawTable {
    /// Create a table; every row must have one entry per schema field.
    pub fn new(schema: Arc<Schema>, rows: Vec<Vec<Option<f64>>>) -> Result<Self> {
        for row in &rows {
            check_per_field(&schema, "values", row.len())?;
        }
        Ok(Self { schema, rows })
    }

    /// Table with no missing values.
    pub fn from_vectors(vectors: &[FeatureVector]) -> Result<Self> {
        let schema = common_schema(vectors)?;
        let rows = vectors
            .iter()
            .map(|v| v.values().iter().copied().map(Some).collect())
            .collect();
        Ok(Self { schema, rows })
    }

    /// Field schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Missing values per field, in schema order.
    pub fn missing_counts(&self) -> Vec<usize> {
        (0..self.schema.len())
            .map(|j| self.rows.iter().filter(|r| r[j].is_none()).count())
            .collect()
    }

    /// Observed (present and finite) values of column `j`.
    fn observed(&self, j: usize) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|r| r[j])
            .filter(|v| v.is_finite())
            .collect()
    }
}

/// Statistic used to fill missing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImputeStrategy {
    /// Column mean.
    Mean,
    /// Column median; robust to skewed fields like spend.
    #[default]
    Median,
}

/// Fills missing values with per-field fill values learned at fit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ImputerRepr")]
pub struct Imputer {
    schema: Arc<Schema>,
    strategy: ImputeStrategy,
    fill: Vec<f64>,
}

#[derive(Deserialize)]
struct ImputerRepr {
    schema: Arc<Schema>,
    strategy: ImputeStrategy,
    fill: Vec<f64>,
}

impl TryFrom<ImputerRepr> for Imputer {
    type Error = Error;

    fn try_from(repr: ImputerRepr) -> Result<Self> {
        check_per_field(&repr.schema, "fill values", repr.fill.len())?;
        Ok(Self {
            schema: repr.schema,
            strategy: repr.strategy,
            fill: repr.fill,
        })
    }
}

impl Imputer {
    /// Learn fill values from the observed entries of each column.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyInput`] if the table is empty or a column has no
    /// observed value at all.
    pub fn fit(table: &RawTable, strategy: ImputeStrategy) -> Result<Self> {
        if table.is_empty() {
            return Err(Error::EmptyInput);
        }
        let mut fill = Vec::with_capacity(table.schema.len());
        for j in 0..table.schema.len() {
            let observed = table.observed(j);
            if observed.is_empty() {
                return Err(Error::EmptyInput);
            }
            fill.push(match strategy {
                ImputeStrategy::Mean => stats::mean(&observed),
                ImputeStrategy::Median => stats::quantile_sorted(&stats::sorted(&observed), 0.5),
            });
        }
        debug!(?strategy, missing = ?table.missing_counts(), "imputer fitted");
        Ok(Self {
            schema: Arc::clone(&table.schema),
            strategy,
            fill,
        })
    }

    /// Strategy used at fit time.
    pub fn strategy(&self) -> ImputeStrategy {
        self.strategy
    }

    /// Fill value per field, in schema order.
    pub fn fill_values(&self) -> &[f64] {
        &self.fill
    }

    /// Complete one record.
    pub fn complete(&self, schema: &Schema, record: &[Option<f64>]) -> Result<FeatureVector> {
        self.schema.ensure_matches(schema)?;
        check_per_field(&self.schema, "values", record.len())?;
        let values = record
            .iter()
            .zip(&self.fill)
            .map(|(v, fill)| v.unwrap_or(*fill))
            .collect();
        FeatureVector::new(Arc::clone(&self.schema), values)
    }

    /// Complete every row of a table.
    pub fn transform(&self, table: &RawTable) -> Result<Vec<FeatureVector>> {
        table
            .rows
            .iter()
            .map(|r| self.complete(&table.schema, r))
            .collect()
    }
}

/// Clamps each field to `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]` learned at fit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "OutlierCapperRepr")]
pub struct OutlierCapper {
    schema: Arc<Schema>,
    bounds: Vec<(f64, f64)>,
}

#[derive(Deserialize)]
struct OutlierCapperRepr {
    schema: Arc<Schema>,
    bounds: Vec<(f64, f64)>,
}

impl TryFrom<OutlierCapperRepr> for OutlierCapper {
    type Error = Error;

    fn try_from(repr: OutlierCapperRepr) -> Result<Self> {
        check_per_field(&repr.schema, "bounds", repr.bounds.len())?;
        if let Some(j) = repr.bounds.iter().position(|(lo, hi)| !(lo <= hi)) {
            return Err(Error::invalid_parameter(
                "bounds",
                format!("lower fence above upper fence for '{}'", repr.schema.fields()[j]),
            ));
        }
        Ok(Self {
            schema: repr.schema,
            bounds: repr.bounds,
        })
    }
}

impl OutlierCapper {
    /// Tukey fence multiplier.
    pub const FENCE: f64 = 1.5;

    /// Learn fences from `vectors`.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyInput`] for zero vectors, [`Error::Schema`] for mixed
    /// schemas, [`Error::NonFiniteInput`] for NaN or infinite values.
    pub fn fit(vectors: &[FeatureVector]) -> Result<Self> {
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
        let bounds = (0..schema.len())
            .map(|j| {
                let sorted = stats::sorted(&stats::column(&rows, j));
                let q1 = stats::quantile_sorted(&sorted, 0.25);
                let q3 = stats::quantile_sorted(&sorted, 0.75);
                let iqr = q3 - q1;
                (q1 - Self::FENCE * iqr, q3 + Self::FENCE * iqr)
            })
            .collect();
        Ok(Self { schema, bounds })
    }

    /// `(lower, upper)` fence per field, in schema order.
    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    /// Clamp one vector.
    pub fn cap(&self, vector: &FeatureVector) -> Result<FeatureVector> {
        self.schema.ensure_matches(vector.schema())?;
        let values = vector
            .values()
            .iter()
            .zip(&self.bounds)
            .map(|(&v, &(lo, hi))| v.clamp(lo, hi))
            .collect();
        FeatureVector::new(Arc::clone(&self.schema), values)
    }

    /// Clamp many vectors; logs how many values moved.
    pub fn apply(&self, vectors: &[FeatureVector]) -> Result<Vec<FeatureVector>> {
        let capped: Vec<FeatureVector> = vectors.iter().map(|v| self.cap(v)).collect::<Result<_>>()?;
        let moved = vectors
            .iter()
            .zip(&capped)
            .flat_map(|(a, b)| a.values().iter().zip(b.values()))
            .filter(|(a, b)| a != b)
            .count();
        debug!(moved, n = vectors.len(), "outliers capped");
        Ok(capped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: Vec<Vec<Option<f64>>>) -> RawTable {
        let schema = Schema::new(["Income", "EmailOpenRate"]).unwrap();
        RawTable::new(schema, rows).unwrap()
    }

    #[test]
    fn test_median_imputation() {
        let t = table(vec![
            vec![Some(10.0), Some(0.2)],
            vec![None, Some(0.4)],
            vec![Some(30.0), None],
            vec![Some(20.0), Some(0.9)],
        ]);
        let imputer = Imputer::fit(&t, ImputeStrategy::Median).unwrap();
        assert_eq!(imputer.fill_values(), &[20.0, 0.4]);

        let vectors = imputer.transform(&t).unwrap();
        assert_eq!(vectors[1].values(), &[20.0, 0.4]);
        assert_eq!(vectors[2].values(), &[30.0, 0.4]);
        assert_eq!(t.missing_counts(), vec![1, 1]);
    }

    #[test]
    fn test_mean_imputation() {
        let t = table(vec![vec![Some(1.0), Some(1.0)], vec![Some(3.0), None]]);
        let imputer = Imputer::fit(&t, ImputeStrategy::Mean).unwrap();
        assert_eq!(imputer.fill_values(), &[2.0, 1.0]);
    }

    #[test]
    fn test_all_missing_column_is_error() {
        let t = table(vec![vec![Some(1.0), None], vec![Some(2.0), None]]);
        assert!(matches!(
            Imputer::fit(&t, ImputeStrategy::Median),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let schema = Schema::new(["a", "b"]).unwrap();
        assert!(RawTable::new(schema, vec![vec![Some(1.0)]]).is_err());
    }

    #[test]
    fn test_capper_clamps_tail() {
        let schema = Schema::new(["Monetary"]).unwrap();
        let vectors: Vec<FeatureVector> = [1.0, 2.0, 3.0, 4.0, 100.0]
            .iter()
            .map(|&v| FeatureVector::new(Arc::clone(&schema), vec![v]).unwrap())
            .collect();
        let capper = OutlierCapper::fit(&vectors).unwrap();
        // Q1 = 2, Q3 = 4, IQR = 2 -> fences [-1, 7]
        assert_eq!(capper.bounds(), &[(-1.0, 7.0)]);

        let capped = capper.apply(&vectors).unwrap();
        assert_eq!(capped[4].values(), &[7.0]);
        assert_eq!(capped[0].values(), &[1.0]);
    }

    #[test]
    fn test_capper_rejects_foreign_schema() {
        let a = Schema::new(["a"]).unwrap();
        let b = Schema::new(["b"]).unwrap();
        let capper = OutlierCapper::fit(&[FeatureVector::new(a, vec![1.0]).unwrap()]).unwrap();
        let foreign = FeatureVector::new(b, vec![1.0]).unwrap();
        assert!(matches!(capper.cap(&foreign), Err(Error::Schema { .. })));
    }

    #[test]
    fn test_deserialize_revalidates() {
        let t = table(vec![vec![Some(1.0), Some(0.5)], vec![Some(3.0), None]]);
        let mut json = serde_json::to_value(&t).unwrap();
        json["rows"][1] = serde_json::json!([1.0]);
        assert!(serde_json::from_value::<RawTable>(json).is_err());

        let imputer = Imputer::fit(&t, ImputeStrategy::Mean).unwrap();
        let mut json = serde_json::to_value(&imputer).unwrap();
        assert_eq!(serde_json::from_value::<Imputer>(json.clone()).unwrap(), imputer);
        json["fill"] = serde_json::json!([2.0]);
        assert!(serde_json::from_value::<Imputer>(json).is_err());

        let vectors = imputer.transform(&t).unwrap();
        let capper = OutlierCapper::fit(&vectors).unwrap();
        let mut json = serde_json::to_value(&capper).unwrap();
        json["bounds"] = serde_json::json!([[0.0, 1.0]]);
        assert!(serde_json::from_value::<OutlierCapper>(json).is_err());
    }
}
