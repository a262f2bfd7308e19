//! Command-line interface definitions and argument parsing

use crate::config::{EmptyClusterPolicy, FeatureSet, PipelineConfig, ReferencePolicy};
use clap::Parser;

/// Score user satisfaction from engagement and experience CSV files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the engagement CSV file
    #[arg(short, long)]
    pub engagement: String,

    /// Path to the experience CSV file
    #[arg(short = 'x', long)]
    pub experience: String,

    /// Output path for the satisfaction score CSV
    #[arg(short, long, default_value = "satisfaction_score.csv")]
    pub output: String,

    /// User key column in the engagement file
    #[arg(long, default_value = "MSISDN/Number")]
    pub left_key: String,

    /// User key column in the experience file
    #[arg(long, default_value = "CustomerID")]
    pub right_key: String,

    /// Engagement feature columns, comma separated
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "SessionDuration,SessionFrequency,TotalTraffic"
    )]
    pub engagement_columns: Vec<String>,

    /// Experience feature columns, comma separated
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "AvgTCP,AvgRTT,AvgThroughput"
    )]
    pub experience_columns: Vec<String>,

    /// Engagement columns where lower values are better
    #[arg(long, value_delimiter = ',')]
    pub engagement_lower_is_better: Vec<String>,

    /// Experience columns where lower values are better
    #[arg(long, value_delimiter = ',', default_value = "AvgTCP,AvgRTT")]
    pub experience_lower_is_better: Vec<String>,

    /// Number of clusters for K-Means
    #[arg(short = 'k', long, default_value = "3")]
    pub clusters: usize,

    /// Number of users in the ranking
    #[arg(long, default_value = "10")]
    pub top_n: usize,

    /// Seed for k-means++ initialization
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Number of K-Means restarts
    #[arg(long, default_value = "10")]
    pub n_init: usize,

    /// Maximum iterations for a single K-Means run
    #[arg(long, default_value = "300")]
    pub max_iters: usize,

    /// How the experience reference cluster is chosen
    #[arg(long, value_enum, default_value_t = ReferencePolicy::CrossReferenced)]
    pub reference: ReferencePolicy,

    /// What to do when a cluster ends up empty
    #[arg(long, value_enum, default_value_t = EmptyClusterPolicy::ReuseNearest)]
    pub empty_clusters: EmptyClusterPolicy,

    /// Score one more user: engagement values followed by experience values, comma separated
    /// Example: --predict "120.5,3,2048,0.2,45,900"
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Build the pipeline configuration from the parsed flags
    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig {
            left_key: self.left_key.clone(),
            right_key: self.right_key.clone(),
            engagement: FeatureSet {
                name: "engagement".to_string(),
                columns: self.engagement_columns.clone(),
                lower_is_better: self.engagement_lower_is_better.clone(),
            },
            experience: FeatureSet {
                name: "experience".to_string(),
                columns: self.experience_columns.clone(),
                lower_is_better: self.experience_lower_is_better.clone(),
            },
            k: self.clusters,
            top_n: self.top_n,
            seed: self.seed,
            n_init: self.n_init,
            max_iters: self.max_iters,
            reference: self.reference,
            empty_clusters: self.empty_clusters,
        }
    }

    /// Parse the predict string into (engagement, experience) vectors
    pub fn parse_predict_values(&self) -> anyhow::Result<Option<(Vec<f64>, Vec<f64>)>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let values = predict_str
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|_| anyhow::anyhow!("Invalid predict value: {}", part))
            })
            .collect::<anyhow::Result<Vec<f64>>>()?;

        let engagement_dims = self.engagement_columns.len();
        let expected = engagement_dims + self.experience_columns.len();
        if values.len() != expected {
            anyhow::bail!(
                "Predict expects {} values ({} engagement then {} experience), got {}",
                expected,
                engagement_dims,
                self.experience_columns.len(),
                values.len()
            );
        }

        let (engagement, experience) = values.split_at(engagement_dims);
        Ok(Some((engagement.to_vec(), experience.to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["satiscore", "-e", "engagement.csv", "-x", "experience.csv"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_match_pipeline_defaults() {
        let args = parse(&[]);
        assert_eq!(args.to_config(), PipelineConfig::default());
        assert_eq!(args.output, "satisfaction_score.csv");
    }

    #[test]
    fn test_policy_flags() {
        let args = parse(&["--reference", "independent", "--empty-clusters", "fail", "-k", "4"]);
        let config = args.to_config();
        assert_eq!(config.reference, ReferencePolicy::Independent);
        assert_eq!(config.empty_clusters, EmptyClusterPolicy::Fail);
        assert_eq!(config.k, 4);
    }

    #[test]
    fn test_parse_predict_values() {
        let mut args = parse(&["--predict", "120.5,3,2048,0.2,45,900"]);

        let result = args.parse_predict_values().unwrap();
        assert_eq!(
            result,
            Some((vec![120.5, 3.0, 2048.0], vec![0.2, 45.0, 900.0]))
        );

        args.predict = None;
        assert_eq!(args.parse_predict_values().unwrap(), None);

        args.predict = Some("1,2,3".to_string());
        assert!(args.parse_predict_values().is_err());

        args.predict = Some("1,2,3,4,5,abc".to_string());
        assert!(args.parse_predict_values().is_err());
    }
}
