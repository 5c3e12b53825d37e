use thiserror::Error;

/// Result alias for `cohort`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by scaling, clustering, evaluation and profiling.
///
/// Every variant is a local, synchronous failure. None of them is worth
/// retrying: the computations are deterministic, so the caller has to fix
/// the input instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Field names or order differ from what was expected.
    #[error("schema mismatch: expected {expected}, found {found}")]
    Schema {
        /// Expected schema description.
        expected: String,
        /// Found schema description.
        found: String,
    },

    /// Input was empty.
    #[error("empty input provided")]
    EmptyInput,

    /// Vectors and labels (or similar paired inputs) differ in length.
    #[error("input mismatch: {vectors} vectors but {labels} labels")]
    InputMismatch {
        /// Number of vectors.
        vectors: usize,
        /// Number of labels.
        labels: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: String,
    },

    /// A dendrogram cut asked for more groups than the tree has leaves.
    #[error("cannot create {requested} clusters from {n_items} items")]
    InvalidClusterCount {
        /// Requested count.
        requested: usize,
        /// Number of items.
        n_items: usize,
    },

    /// A coordinate was NaN or infinite.
    #[error("non-finite value in row {row}, field '{field}'")]
    NonFiniteInput {
        /// Row index of the offending vector.
        row: usize,
        /// Field name of the offending coordinate.
        field: String,
    },

    /// Every candidate configuration was excluded by the selector.
    #[error("no viable configuration among {evaluated} candidates")]
    NoViableConfiguration {
        /// Number of candidates that were fitted and rejected.
        evaluated: usize,
    },

    /// Array shape error from ndarray.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Configuration or fitted-state (de)serialization failure.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure was caused by the caller's input rather than by an
    /// internal problem.
    ///
    /// Serving layers map `true` to a client error and `false` to a server error.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, Error::Shape(_) | Error::NoViableConfiguration { .. })
    }

    pub(crate) fn invalid_parameter(name: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::InvalidClusterCount {
            requested: 5,
            n_items: 3,
        };
        assert_eq!(err.to_string(), "cannot create 5 clusters from 3 items");

        let err = Error::NonFiniteInput {
            row: 2,
            field: "Income".into(),
        };
        assert_eq!(err.to_string(), "non-finite value in row 2, field 'Income'");
    }

    #[test]
    fn test_input_error_classification() {
        assert!(Error::EmptyInput.is_input_error());
        assert!(Error::invalid_parameter("k", "must be at least 2").is_input_error());
        assert!(!Error::NoViableConfiguration { evaluated: 4 }.is_input_error());
    }
}
