//! Error types for the scoring pipeline

use polars::prelude::PolarsError;
use thiserror::Error;

/// Errors raised while joining, clustering, scoring or exporting.
#[derive(Debug, Error)]
pub enum SatisfactionError {
    /// A required column is absent, or holds values that are not usable numbers.
    #[error("schema error in {table} table: {message}")]
    Schema {
        /// Which input the problem was found in
        table: String,
        message: String,
    },

    /// Invalid pipeline parameters or column references.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Clustering could not produce k well-defined clusters.
    #[error("degenerate clustering on {feature_set} features: cluster {cluster} has no members")]
    DegenerateCluster { feature_set: String, cluster: usize },

    /// The inner join matched no rows.
    #[error("join on '{left_key}' = '{right_key}' produced no rows")]
    EmptyInput { left_key: String, right_key: String },

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SatisfactionError {
    pub(crate) fn missing_column(table: &str, column: &str) -> Self {
        Self::Schema {
            table: table.to_string(),
            message: format!("required column '{column}' not found"),
        }
    }
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, SatisfactionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_problem() {
        let err = SatisfactionError::missing_column("engagement", "TotalTraffic");
        assert!(err.to_string().contains("TotalTraffic"));
        assert!(err.to_string().contains("engagement"));

        let err = SatisfactionError::DegenerateCluster {
            feature_set: "experience".to_string(),
            cluster: 2,
        };
        assert!(err.to_string().contains("cluster 2"));
    }
}
