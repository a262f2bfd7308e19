//! satiscore: user satisfaction scoring from network engagement and experience data
//!
//! The two tables are joined on the user key, each feature set is clustered
//! with K-Means, and every user is scored by its distance to the centroid of the
//! lowest-performing cluster. The satisfaction score is the mean of the
//! engagement and experience scores.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod score;

// Re-export public items for easier access
pub use cli::Args;
pub use config::{EmptyClusterPolicy, FeatureSet, PipelineConfig, ReferencePolicy};
pub use data::{join_on_key, merge_tables, read_table, JoinedKeys, MergedData};
pub use error::{Result, SatisfactionError};
pub use model::{fit_kmeans, KMeansModel, KMeansParams};
pub use pipeline::{run, run_files};
pub use report::{ClusterSummary, ScoreReport, UserEstimate, UserScore};
pub use score::ReferenceClusters;
