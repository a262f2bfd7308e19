//! Pipeline configuration: column mapping, clustering parameters and policies

use crate::error::{Result, SatisfactionError};
use clap::ValueEnum;
use std::collections::HashSet;

/// How the reference cluster for the experience dimension is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReferencePolicy {
    /// Reuse the engagement reference cluster id as an index into the experience centroids
    #[default]
    #[value(name = "cross")]
    CrossReferenced,
    /// Pick the worst experience cluster from the experience clustering itself
    Independent,
}

/// What to do with a cluster that ends up with no members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EmptyClusterPolicy {
    /// Give the empty cluster the centroid of its nearest non-empty neighbour
    #[default]
    ReuseNearest,
    /// Fail with a degenerate-cluster error
    Fail,
}

/// An ordered list of numeric feature columns
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    /// Short name used in logs and errors ("engagement", "experience")
    pub name: String,
    pub columns: Vec<String>,
    /// Columns where a smaller value means a better outcome (negated in the composite)
    pub lower_is_better: Vec<String>,
}

impl FeatureSet {
    pub fn new(name: &str, columns: &[&str], lower_is_better: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            lower_is_better: lower_is_better.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Default engagement columns
    pub fn engagement() -> Self {
        Self::new(
            "engagement",
            &["SessionDuration", "SessionFrequency", "TotalTraffic"],
            &[],
        )
    }

    /// Default experience columns
    pub fn experience() -> Self {
        Self::new(
            "experience",
            &["AvgTCP", "AvgRTT", "AvgThroughput"],
            &["AvgTCP", "AvgRTT"],
        )
    }

    pub fn dims(&self) -> usize {
        self.columns.len()
    }

    /// Orientation flag per column, `true` where lower is better
    pub fn orientation(&self) -> Vec<bool> {
        self.columns
            .iter()
            .map(|c| self.lower_is_better.contains(c))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(SatisfactionError::Config(format!(
                "{} feature set has no columns",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.as_str()) {
                return Err(SatisfactionError::Config(format!(
                    "{} column '{}' is listed twice",
                    self.name, column
                )));
            }
        }

        if let Some(unknown) = self
            .lower_is_better
            .iter()
            .find(|c| !self.columns.contains(c))
        {
            return Err(SatisfactionError::Config(format!(
                "lower-is-better column '{}' is not one of the {} columns",
                unknown, self.name
            )));
        }

        Ok(())
    }
}

/// Everything a pipeline run needs besides the two input tables
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// User key column in the engagement table
    pub left_key: String,
    /// User key column in the experience table
    pub right_key: String,
    pub engagement: FeatureSet,
    pub experience: FeatureSet,
    /// Number of clusters per feature set
    pub k: usize,
    /// Length of the ranking
    pub top_n: usize,
    /// Base seed for k-means++ seeding; restart `r` uses `seed + r`
    pub seed: u64,
    /// Number of k-means restarts per feature set
    pub n_init: usize,
    /// Iteration cap for a single Lloyd run
    pub max_iters: usize,
    pub reference: ReferencePolicy,
    pub empty_clusters: EmptyClusterPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            left_key: "MSISDN/Number".to_string(),
            right_key: "CustomerID".to_string(),
            engagement: FeatureSet::engagement(),
            experience: FeatureSet::experience(),
            k: 3,
            top_n: 10,
            seed: 42,
            n_init: 10,
            max_iters: 300,
            reference: ReferencePolicy::default(),
            empty_clusters: EmptyClusterPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Check everything that can be checked before looking at data.
    /// The `k <= rows` bound is enforced by the clusterer once the join is known.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(SatisfactionError::Config(
                "cluster count k must be at least 1".to_string(),
            ));
        }
        if self.top_n == 0 {
            return Err(SatisfactionError::Config(
                "top_n must be at least 1".to_string(),
            ));
        }
        if self.n_init == 0 {
            return Err(SatisfactionError::Config(
                "n_init must be at least 1".to_string(),
            ));
        }
        if self.max_iters == 0 {
            return Err(SatisfactionError::Config(
                "max_iters must be at least 1".to_string(),
            ));
        }
        if self.left_key.is_empty() || self.right_key.is_empty() {
            return Err(SatisfactionError::Config(
                "key column names must not be empty".to_string(),
            ));
        }

        self.engagement.validate()?;
        self.experience.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.k, 3);
        assert_eq!(config.top_n, 10);
        assert_eq!(config.reference, ReferencePolicy::CrossReferenced);
        assert_eq!(config.engagement.orientation(), vec![false, false, false]);
        assert_eq!(config.experience.orientation(), vec![true, true, false]);
    }

    #[test]
    fn test_invalid_parameters() {
        let config = PipelineConfig {
            k: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(SatisfactionError::Config(_))));

        let config = PipelineConfig {
            top_n: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(SatisfactionError::Config(_))));

        let config = PipelineConfig {
            n_init: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(SatisfactionError::Config(_))));
    }

    #[test]
    fn test_unknown_column_references() {
        let mut config = PipelineConfig::default();
        config.experience.lower_is_better = vec!["Latency".to_string()];
        assert!(matches!(config.validate(), Err(SatisfactionError::Config(_))));

        let mut config = PipelineConfig::default();
        config.engagement.columns = vec!["A".to_string(), "A".to_string()];
        assert!(matches!(config.validate(), Err(SatisfactionError::Config(_))));

        let mut config = PipelineConfig::default();
        config.engagement.columns.clear();
        assert!(matches!(config.validate(), Err(SatisfactionError::Config(_))));
    }
}
