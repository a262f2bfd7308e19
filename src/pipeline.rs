//! The scoring pipeline: join, cluster, score, aggregate

use crate::config::PipelineConfig;
use crate::data::{merge_tables, read_table, MergedData};
use crate::error::Result;
use crate::model::{fit_kmeans, KMeansParams};
use crate::report::{build_report, ColumnNames, ScoreReport, ScoredDimension};
use crate::score::{distance_scores, select_references};
use polars::prelude::DataFrame;
use std::path::Path;

/// Score every user present in both tables.
///
/// Neither input frame is modified. Fails on an invalid configuration, a
/// missing or non-numeric column, an empty join, or `k` larger than the
/// number of joined rows.
pub fn run(
    engagement_df: &DataFrame,
    experience_df: &DataFrame,
    config: &PipelineConfig,
) -> Result<ScoreReport> {
    config.validate()?;

    let merged = merge_tables(engagement_df, experience_df, config)?;
    score_merged(&merged, config)
}

/// Load both CSV files and run the pipeline
pub fn run_files<P: AsRef<Path>, Q: AsRef<Path>>(
    engagement_path: P,
    experience_path: Q,
    config: &PipelineConfig,
) -> Result<ScoreReport> {
    config.validate()?;

    let engagement_df = read_table(engagement_path)?;
    let experience_df = read_table(experience_path)?;
    run(&engagement_df, &experience_df, config)
}

/// Cluster and score users that have already been joined
pub fn score_merged(merged: &MergedData, config: &PipelineConfig) -> Result<ScoreReport> {
    let params = KMeansParams {
        n_clusters: config.k,
        n_init: config.n_init,
        max_iters: config.max_iters,
        seed: config.seed,
        empty_clusters: config.empty_clusters,
    };

    let engagement_model = fit_kmeans(&merged.engagement, &params, &config.engagement.name)?;
    let experience_model = fit_kmeans(&merged.experience, &params, &config.experience.name)?;
    tracing::info!(
        engagement_inertia = engagement_model.inertia,
        experience_inertia = experience_model.inertia,
        k = config.k,
        "clustering finished"
    );

    let references = select_references(
        (
            &merged.engagement,
            &engagement_model,
            &config.engagement.orientation(),
        ),
        (
            &merged.experience,
            &experience_model,
            &config.experience.orientation(),
        ),
        config.reference,
    )?;

    let engagement_scores = distance_scores(
        &merged.engagement,
        engagement_model.centroids.row(references.engagement),
    );
    let experience_scores = distance_scores(
        &merged.experience,
        experience_model.centroids.row(references.experience),
    );

    build_report(
        ColumnNames {
            id: config.left_key.clone(),
            engagement: config.engagement.columns.clone(),
            experience: config.experience.columns.clone(),
        },
        merged,
        ScoredDimension {
            model: engagement_model,
            scores: engagement_scores,
        },
        ScoredDimension {
            model: experience_model,
            scores: experience_scores,
        },
        references,
        config.top_n,
    )
}
