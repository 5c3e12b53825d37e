//! Feature vectors and the schema they share.
//!
//! A [`Schema`] is an ordered list of unique field names. Vectors hold an
//! `Arc<Schema>` so that a working set of thousands of customers shares one
//! allocation, and so a fitted scaler or model can cheaply check that a new
//! vector has exactly the layout it was trained on.
//!
//! ```text
//! FeatureVector ──Scaler::transform──▶ ScaledVector
//! [FeatureVector] ──Scaler::transform_batch──▶ ScaledMatrix ──fit──▶ ClusterModel
//! ```

use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Ordered, non-empty set of uniquely named numeric fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaRepr")]
pub struct Schema {
    fields: Vec<String>,
}

#[derive(Deserialize)]
struct SchemaRepr {
    fields: Vec<String>,
}

impl TryFrom<SchemaRepr> for Schema {
    type Error = Error;

    fn try_from(repr: SchemaRepr) -> Result<Self> {
        check_fields(&repr.fields)?;
        Ok(Self {
            fields: repr.fields,
        })
    }
}

fn check_fields(fields: &[String]) -> Result<()> {
    if fields.is_empty() {
        return Err(Error::Schema {
            expected: "at least one field".into(),
            found: "no fields".into(),
        });
    }
    for (i, name) in fields.iter().enumerate() {
        if fields[..i].contains(name) {
            return Err(Error::Schema {
                expected: "unique field names".into(),
                found: format!("duplicate field '{name}'"),
            });
        }
    }
    Ok(())
}

impl Schema {
    /// Create a schema from field names.
    ///
    /// Fails with [`Error::Schema`] if `fields` is empty or contains a
    /// duplicate name.
    pub fn new<I, S>(fields: I) -> Result<Arc<Self>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        check_fields(&fields)?;
        Ok(Arc::new(Self { fields }))
    }

    /// Schema with generated names `x0..x{d-1}`, for data without business fields.
    pub fn anonymous(dim: usize) -> Arc<Self> {
        Arc::new(Self {
            fields: (0..dim.max(1)).map(|i| format!("x{i}")).collect(),
        })
    }

    /// Field names in order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of a field, if present.
    pub fn index_of(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }

    /// Fail with [`Error::Schema`] unless `other` has the same fields in the same order.
    pub fn ensure_matches(&self, other: &Schema) -> Result<()> {
        if self.fields == other.fields {
            Ok(())
        } else {
            Err(Error::Schema {
                expected: self.to_string(),
                found: other.to_string(),
            })
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.fields.join(", "))
    }
}

/// One customer described by numeric fields, in business units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FeatureVectorRepr")]
pub struct FeatureVector {
    schema: Arc<Schema>,
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct FeatureVectorRepr {
    schema: Arc<Schema>,
    values: Vec<f64>,
}

impl TryFrom<FeatureVectorRepr> for FeatureVector {
    type Error = Error;

    fn try_from(repr: FeatureVectorRepr) -> Result<Self> {
        Self::new(repr.schema, repr.values)
    }
}

impl FeatureVector {
    /// Create a vector; `values` must have one entry per schema field.
    pub fn new(schema: Arc<Schema>, values: Vec<f64>) -> Result<Self> {
        if values.len() != schema.len() {
            return Err(Error::Schema {
                expected: format!("{} values for {}", schema.len(), schema),
                found: format!("{} values", values.len()),
            });
        }
        Ok(Self { schema, values })
    }

    /// Schema of this vector.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Values in schema order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Value of a named field.
    pub fn get(&self, field: &str) -> Option<f64> {
        self.schema.index_of(field).map(|i| self.values[i])
    }
}

/// A feature vector after scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScaledVectorRepr")]
pub struct ScaledVector {
    schema: Arc<Schema>,
    values: Array1<f64>,
}

#[derive(Deserialize)]
struct ScaledVectorRepr {
    schema: Arc<Schema>,
    values: Array1<f64>,
}

impl TryFrom<ScaledVectorRepr> for ScaledVector {
    type Error = Error;

    fn try_from(repr: ScaledVectorRepr) -> Result<Self> {
        if repr.values.len() != repr.schema.len() {
            return Err(Error::Schema {
                expected: format!("{} values for {}", repr.schema.len(), repr.schema),
                found: format!("{} values", repr.values.len()),
            });
        }
        Ok(Self::new(repr.schema, repr.values))
    }
}

impl ScaledVector {
    pub(crate) fn new(schema: Arc<Schema>, values: Array1<f64>) -> Self {
        Self { schema, values }
    }

    /// Schema of the scaler that produced this vector.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Scaled values.
    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }
}

/// A batch of scaled vectors, one per row.
///
/// This is what every clustering algorithm consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScaledMatrixRepr")]
pub struct ScaledMatrix {
    schema: Arc<Schema>,
    data: Array2<f64>,
}

#[derive(Deserialize)]
struct ScaledMatrixRepr {
    schema: Arc<Schema>,
    data: Array2<f64>,
}

impl TryFrom<ScaledMatrixRepr> for ScaledMatrix {
    type Error = Error;

    fn try_from(repr: ScaledMatrixRepr) -> Result<Self> {
        Self::new(repr.schema, repr.data)
    }
}

impl ScaledMatrix {
    /// Wrap an already-scaled matrix; column count must match the schema.
    pub fn new(schema: Arc<Schema>, data: Array2<f64>) -> Result<Self> {
        if data.ncols() != schema.len() {
            return Err(Error::Schema {
                expected: format!("{} columns for {}", schema.len(), schema),
                found: format!("{} columns", data.ncols()),
            });
        }
        Ok(Self { schema, data })
    }

    /// Build from row slices under an anonymous schema.
    ///
    /// Convenient for data that is already on a common scale.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        if rows.is_empty() {
            return Err(Error::EmptyInput);
        }
        let d = rows[0].len();
        let mut flat = Vec::with_capacity(rows.len() * d);
        for row in rows {
            if row.len() != d {
                return Err(Error::Schema {
                    expected: format!("{d} columns"),
                    found: format!("{} columns", row.len()),
                });
            }
            flat.extend_from_slice(row);
        }
        let data = Array2::from_shape_vec((rows.len(), d), flat)?;
        Self::new(Schema::anonymous(d), data)
    }

    /// Schema of the columns.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Underlying data.
    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    /// Row `i` as a [`ScaledVector`].
    pub fn row(&self, i: usize) -> ScaledVector {
        ScaledVector::new(Arc::clone(&self.schema), self.data.row(i).to_owned())
    }

    /// Fail with [`Error::NonFiniteInput`] at the first NaN or infinite coordinate.
    pub fn ensure_finite(&self) -> Result<()> {
        ensure_finite(self.data.view(), &self.schema)
    }
}

pub(crate) fn ensure_finite(data: ArrayView2<'_, f64>, schema: &Schema) -> Result<()> {
    for (row, values) in data.outer_iter().enumerate() {
        if let Some(col) = values.iter().position(|v| !v.is_finite()) {
            return Err(Error::NonFiniteInput {
                row,
                field: schema.fields()[col].clone(),
            });
        }
    }
    Ok(())
}

/// Check that all vectors share the first vector's schema and return it.
pub(crate) fn common_schema(vectors: &[FeatureVector]) -> Result<Arc<Schema>> {
    let first = vectors.first().ok_or(Error::EmptyInput)?;
    let schema = Arc::clone(first.schema());
    for v in &vectors[1..] {
        schema.ensure_matches(v.schema())?;
    }
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_rejects_duplicates_and_empty() {
        assert!(Schema::new(["Age", "Age"]).is_err());
        assert!(Schema::new(Vec::<String>::new()).is_err());
        let schema = Schema::new(["Age", "Income"]).unwrap();
        assert_eq!(schema.index_of("Income"), Some(1));
        assert_eq!(schema.to_string(), "[Age, Income]");
    }

    #[test]
    fn test_feature_vector_length_checked() {
        let schema = Schema::new(["Recency", "Frequency"]).unwrap();
        assert!(FeatureVector::new(Arc::clone(&schema), vec![1.0]).is_err());
        let v = FeatureVector::new(schema, vec![10.0, 3.0]).unwrap();
        assert_eq!(v.get("Frequency"), Some(3.0));
        assert_eq!(v.get("Monetary"), None);
    }

    #[test]
    fn test_schema_match_by_content() {
        let a = Schema::new(["a", "b"]).unwrap();
        let b = Schema::new(["a", "b"]).unwrap();
        let c = Schema::new(["b", "a"]).unwrap();
        assert!(a.ensure_matches(&b).is_ok());
        assert!(matches!(a.ensure_matches(&c), Err(Error::Schema { .. })));
    }

    #[test]
    fn test_scaled_matrix_finite_check() {
        let m = ScaledMatrix::from_rows(&[vec![0.0, 1.0], vec![f64::NAN, 2.0]]).unwrap();
        match m.ensure_finite() {
            Err(Error::NonFiniteInput { row, field }) => {
                assert_eq!(row, 1);
                assert_eq!(field, "x0");
            }
            other => panic!("expected NonFiniteInput, got {other:?}"),
        }
    }

    #[test]
    fn test_common_schema() {
        let s1 = Schema::new(["a"]).unwrap();
        let s2 = Schema::new(["b"]).unwrap();
        let vs = vec![
            FeatureVector::new(Arc::clone(&s1), vec![1.0]).unwrap(),
            FeatureVector::new(s2, vec![2.0]).unwrap(),
        ];
        assert!(common_schema(&vs).is_err());
        assert!(matches!(common_schema(&[]), Err(Error::EmptyInput)));
    }

    #[test]
    fn test_deserialize_revalidates() {
        let v = FeatureVector::new(Schema::new(["a", "b"]).unwrap(), vec![1.0, 2.0]).unwrap();
        let mut json = serde_json::to_value(&v).unwrap();
        assert_eq!(serde_json::from_value::<FeatureVector>(json.clone()).unwrap(), v);
        json["values"] = serde_json::json!([1.0]);
        assert!(serde_json::from_value::<FeatureVector>(json).is_err());

        let m = ScaledMatrix::from_rows(&[vec![0.0, 1.0], vec![2.0, 3.0]]).unwrap();
        let mut json = serde_json::to_value(&m).unwrap();
        json["schema"]["fields"] = serde_json::json!(["x0"]);
        assert!(serde_json::from_value::<ScaledMatrix>(json).is_err());

        let mut json = serde_json::to_value(m.row(0)).unwrap();
        json["schema"]["fields"] = serde_json::json!(["x0", "x1", "x2"]);
        assert!(serde_json::from_value::<ScaledVector>(json).is_err());

        let dup = serde_json::json!({ "fields": ["a", "a"] });
        assert!(serde_json::from_value::<Schema>(dup).is_err());
    }
}
