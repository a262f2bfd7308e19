//! Satisfaction aggregation, ranking, cluster summaries and CSV export

use crate::data::MergedData;
use crate::error::{Result, SatisfactionError};
use crate::model::KMeansModel;
use crate::score::ReferenceClusters;
use linfa_nn::distance::{Distance, L2Dist};
use ndarray::{Array1, Array2, ArrayView1};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

pub const SATISFACTION_COLUMN: &str = "SatisfactionScore";
pub const EXPERIENCE_COLUMN: &str = "ExperienceScore";
pub const ENGAGEMENT_COLUMN: &str = "EngagementScore";

/// One scored user
#[derive(Debug, Clone, PartialEq)]
pub struct UserScore {
    pub user_id: String,
    pub engagement: Vec<f64>,
    pub experience: Vec<f64>,
    pub engagement_cluster: usize,
    pub experience_cluster: usize,
    pub engagement_score: f64,
    pub experience_score: f64,
    pub satisfaction_score: f64,
}

/// Averages over the users of one engagement cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub cluster: usize,
    pub users: usize,
    /// `None` when the cluster is empty
    pub mean_satisfaction: Option<f64>,
    pub mean_experience: Option<f64>,
    pub mean_engagement: Option<f64>,
}

/// Scores for a new user measured against a finished run
#[derive(Debug, Clone, PartialEq)]
pub struct UserEstimate {
    pub engagement_cluster: usize,
    pub experience_cluster: usize,
    pub engagement_score: f64,
    pub experience_score: f64,
    pub satisfaction_score: f64,
}

/// Column names carried into the output frames
#[derive(Debug, Clone)]
pub struct ColumnNames {
    pub id: String,
    pub engagement: Vec<String>,
    pub experience: Vec<String>,
}

/// Everything one pipeline run produces
#[derive(Debug, Clone)]
pub struct ScoreReport {
    pub columns: ColumnNames,
    /// Users in join order
    pub users: Vec<UserScore>,
    pub references: ReferenceClusters,
    pub engagement_model: KMeansModel,
    pub experience_model: KMeansModel,
    pub top_n: usize,
}

/// Satisfaction is the plain mean of the two dimension scores
pub fn satisfaction(engagement_score: f64, experience_score: f64) -> f64 {
    (engagement_score + experience_score) / 2.0
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

impl ScoreReport {
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Users sorted by descending satisfaction; equal scores keep join order
    pub fn ranked(&self) -> Vec<&UserScore> {
        let mut ranked: Vec<&UserScore> = self.users.iter().collect();
        ranked.sort_by(|a, b| b.satisfaction_score.total_cmp(&a.satisfaction_score));
        ranked
    }

    /// The first `min(top_n, users)` entries of the ranking
    pub fn top(&self) -> Vec<&UserScore> {
        let mut ranked = self.ranked();
        ranked.truncate(self.top_n);
        ranked
    }

    /// One summary per engagement cluster id in `0..k`
    pub fn cluster_summaries(&self) -> Vec<ClusterSummary> {
        (0..self.engagement_model.n_clusters)
            .map(|cluster| {
                let members: Vec<&UserScore> = self
                    .users
                    .iter()
                    .filter(|u| u.engagement_cluster == cluster)
                    .collect();
                ClusterSummary {
                    cluster,
                    users: members.len(),
                    mean_satisfaction: mean(members.iter().map(|u| u.satisfaction_score)),
                    mean_experience: mean(members.iter().map(|u| u.experience_score)),
                    mean_engagement: mean(members.iter().map(|u| u.engagement_score)),
                }
            })
            .collect()
    }

    /// Sampled silhouette coefficient of the engagement clustering
    pub fn engagement_silhouette(&self, sample_size: usize) -> f64 {
        let features = Array2::from_shape_fn(
            (self.users.len(), self.columns.engagement.len()),
            |(i, j)| self.users[i].engagement[j],
        );
        self.engagement_model
            .compute_silhouette_sample(&features, sample_size)
    }

    /// Reference centroid in engagement space
    pub fn engagement_reference(&self) -> ArrayView1<'_, f64> {
        self.engagement_model.centroids.row(self.references.engagement)
    }

    /// Reference centroid in experience space
    pub fn experience_reference(&self) -> ArrayView1<'_, f64> {
        self.experience_model.centroids.row(self.references.experience)
    }

    /// Score raw feature vectors of a user that was not part of the run
    pub fn score_user(&self, engagement: &[f64], experience: &[f64]) -> Result<UserEstimate> {
        let engagement = Array1::from(engagement.to_vec());
        let experience = Array1::from(experience.to_vec());

        let engagement_cluster = self.engagement_model.predict(engagement.view())?;
        let experience_cluster = self.experience_model.predict(experience.view())?;

        let engagement_score = L2Dist.distance(engagement.view(), self.engagement_reference());
        let experience_score = L2Dist.distance(experience.view(), self.experience_reference());

        Ok(UserEstimate {
            engagement_cluster,
            experience_cluster,
            engagement_score,
            experience_score,
            satisfaction_score: satisfaction(engagement_score, experience_score),
        })
    }

    /// Full table: id, raw features, both cluster ids, both scores, satisfaction
    pub fn to_frame(&self) -> Result<DataFrame> {
        let mut series = vec![Series::new(
            &self.columns.id,
            self.users.iter().map(|u| u.user_id.as_str()).collect::<Vec<_>>(),
        )];

        for (j, name) in self.columns.engagement.iter().enumerate() {
            series.push(Series::new(
                name,
                self.users.iter().map(|u| u.engagement[j]).collect::<Vec<_>>(),
            ));
        }
        for (j, name) in self.columns.experience.iter().enumerate() {
            series.push(Series::new(
                name,
                self.users.iter().map(|u| u.experience[j]).collect::<Vec<_>>(),
            ));
        }

        series.push(Series::new(
            "EngagementCluster",
            self.users
                .iter()
                .map(|u| u.engagement_cluster as u32)
                .collect::<Vec<_>>(),
        ));
        series.push(Series::new(
            "ExperienceCluster",
            self.users
                .iter()
                .map(|u| u.experience_cluster as u32)
                .collect::<Vec<_>>(),
        ));
        series.push(Series::new(
            ENGAGEMENT_COLUMN,
            self.users.iter().map(|u| u.engagement_score).collect::<Vec<_>>(),
        ));
        series.push(Series::new(
            EXPERIENCE_COLUMN,
            self.users.iter().map(|u| u.experience_score).collect::<Vec<_>>(),
        ));
        series.push(Series::new(
            SATISFACTION_COLUMN,
            self.users.iter().map(|u| u.satisfaction_score).collect::<Vec<_>>(),
        ));

        Ok(DataFrame::new(series)?)
    }

    /// Top-N ranking as (id, satisfaction)
    pub fn ranking_frame(&self) -> Result<DataFrame> {
        let top = self.top();
        let frame = DataFrame::new(vec![
            Series::new(
                &self.columns.id,
                top.iter().map(|u| u.user_id.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                SATISFACTION_COLUMN,
                top.iter().map(|u| u.satisfaction_score).collect::<Vec<_>>(),
            ),
        ])?;
        Ok(frame)
    }

    /// Per engagement cluster averages
    pub fn summary_frame(&self) -> Result<DataFrame> {
        let summaries = self.cluster_summaries();
        let frame = DataFrame::new(vec![
            Series::new(
                "cluster",
                summaries.iter().map(|s| s.cluster as u32).collect::<Vec<_>>(),
            ),
            Series::new(
                "users",
                summaries.iter().map(|s| s.users as u32).collect::<Vec<_>>(),
            ),
            Series::new(
                "Average Satisfaction",
                summaries.iter().map(|s| s.mean_satisfaction).collect::<Vec<_>>(),
            ),
            Series::new(
                "Average Experience",
                summaries.iter().map(|s| s.mean_experience).collect::<Vec<_>>(),
            ),
            Series::new(
                "Average Engagement",
                summaries.iter().map(|s| s.mean_engagement).collect::<Vec<_>>(),
            ),
        ])?;
        Ok(frame)
    }

    /// The exported table: id, satisfaction, experience, engagement
    pub fn export_frame(&self) -> Result<DataFrame> {
        let frame = DataFrame::new(vec![
            Series::new(
                &self.columns.id,
                self.users.iter().map(|u| u.user_id.as_str()).collect::<Vec<_>>(),
            ),
            Series::new(
                SATISFACTION_COLUMN,
                self.users.iter().map(|u| u.satisfaction_score).collect::<Vec<_>>(),
            ),
            Series::new(
                EXPERIENCE_COLUMN,
                self.users.iter().map(|u| u.experience_score).collect::<Vec<_>>(),
            ),
            Series::new(
                ENGAGEMENT_COLUMN,
                self.users.iter().map(|u| u.engagement_score).collect::<Vec<_>>(),
            ),
        ])?;
        Ok(frame)
    }

    /// Write the export table as CSV with a header row
    pub fn write_scores_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut frame = self.export_frame()?;
        let mut file = File::create(path.as_ref())?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut frame)?;

        tracing::info!(
            path = %path.as_ref().display(),
            rows = frame.height(),
            "satisfaction scores written"
        );
        Ok(())
    }
}

/// Clustering and scores of one feature set
#[derive(Debug, Clone)]
pub struct ScoredDimension {
    pub model: KMeansModel,
    /// Distance of each joined user to the reference centroid
    pub scores: Array1<f64>,
}

/// Build per-user scores from the merged data and both scored dimensions
pub fn build_report(
    columns: ColumnNames,
    merged: &MergedData,
    engagement: ScoredDimension,
    experience: ScoredDimension,
    references: ReferenceClusters,
    top_n: usize,
) -> Result<ScoreReport> {
    let n = merged.len();
    let aligned = [
        merged.engagement.nrows(),
        merged.experience.nrows(),
        engagement.scores.len(),
        experience.scores.len(),
        engagement.model.labels.len(),
        experience.model.labels.len(),
    ]
    .iter()
    .all(|&len| len == n);
    if !aligned {
        return Err(SatisfactionError::Config(
            "score inputs are not aligned with the joined users".to_string(),
        ));
    }

    let users = (0..n)
        .map(|i| UserScore {
            user_id: merged.user_ids[i].clone(),
            engagement: merged.engagement.row(i).to_vec(),
            experience: merged.experience.row(i).to_vec(),
            engagement_cluster: engagement.model.labels[i],
            experience_cluster: experience.model.labels[i],
            engagement_score: engagement.scores[i],
            experience_score: experience.scores[i],
            satisfaction_score: satisfaction(engagement.scores[i], experience.scores[i]),
        })
        .collect();

    Ok(ScoreReport {
        columns,
        users,
        references,
        engagement_model: engagement.model,
        experience_model: experience.model,
        top_n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn model(labels: Vec<usize>, centroids: Array2<f64>) -> KMeansModel {
        KMeansModel {
            n_clusters: centroids.nrows(),
            labels: Array1::from(labels),
            centroids,
            inertia: 0.0,
            n_iter: 1,
            empty_clusters: Vec::new(),
        }
    }

    fn sample_report(top_n: usize) -> ScoreReport {
        let merged = MergedData {
            user_ids: ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect(),
            engagement: array![[1.0], [2.0], [3.0], [4.0]],
            experience: array![[1.0], [1.0], [1.0], [1.0]],
        };
        build_report(
            ColumnNames {
                id: "MSISDN/Number".to_string(),
                engagement: vec!["SessionDuration".to_string()],
                experience: vec!["AvgRTT".to_string()],
            },
            &merged,
            ScoredDimension {
                model: model(vec![0, 1, 1, 1], array![[1.0], [3.0], [9.0]]),
                scores: array![1.0, 3.0, 2.0, 3.0],
            },
            ScoredDimension {
                model: model(vec![0, 0, 0, 0], array![[1.0], [1.0], [1.0]]),
                scores: array![1.0, 1.0, 0.0, 1.0],
            },
            ReferenceClusters {
                engagement: 0,
                experience: 0,
            },
            top_n,
        )
        .unwrap()
    }

    #[test]
    fn test_satisfaction_is_mean_of_scores() {
        let report = sample_report(10);
        for user in &report.users {
            assert_eq!(
                user.satisfaction_score,
                (user.engagement_score + user.experience_score) / 2.0
            );
        }
        assert_eq!(report.users[1].satisfaction_score, 2.0);
    }

    #[test]
    fn test_ranking_is_descending_and_stable() {
        let report = sample_report(10);
        let ids: Vec<&str> = report.ranked().iter().map(|u| u.user_id.as_str()).collect();
        // b and d tie at 2.0, b came first
        assert_eq!(ids, vec!["b", "d", "a", "c"]);

        assert_eq!(sample_report(2).top().len(), 2);
        assert_eq!(sample_report(10).top().len(), 4);
    }

    #[test]
    fn test_cluster_summaries_cover_every_cluster() {
        let report = sample_report(10);
        let summaries = report.cluster_summaries();

        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].users, 1);
        assert_eq!(summaries[0].mean_satisfaction, Some(1.0));
        assert_eq!(summaries[1].users, 3);
        assert_eq!(summaries[1].mean_experience, Some(2.0 / 3.0));
        assert_eq!(summaries[2].users, 0);
        assert_eq!(summaries[2].mean_satisfaction, None);
    }

    #[test]
    fn test_frames_have_expected_shape() {
        let report = sample_report(3);

        let full = report.to_frame().unwrap();
        assert_eq!(full.height(), 4);
        assert_eq!(full.width(), 1 + 1 + 1 + 2 + 3);

        let ranking = report.ranking_frame().unwrap();
        assert_eq!(ranking.height(), 3);

        let summary = report.summary_frame().unwrap();
        assert_eq!(summary.height(), 3);

        let export = report.export_frame().unwrap();
        let names: Vec<String> = export
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(
            names,
            vec!["MSISDN/Number", SATISFACTION_COLUMN, EXPERIENCE_COLUMN, ENGAGEMENT_COLUMN]
        );
    }

    #[test]
    fn test_score_user_against_references() {
        let report = sample_report(10);
        let estimate = report.score_user(&[4.0], &[1.0]).unwrap();

        assert_eq!(estimate.engagement_cluster, 1);
        assert_eq!(estimate.engagement_score, 3.0);
        assert_eq!(estimate.experience_score, 0.0);
        assert_eq!(estimate.satisfaction_score, 1.5);

        assert!(report.score_user(&[4.0, 1.0], &[1.0]).is_err());
    }

    #[test]
    fn test_misaligned_inputs_are_rejected() {
        let merged = MergedData {
            user_ids: vec!["a".to_string()],
            engagement: array![[1.0], [2.0]],
            experience: array![[1.0]],
        };
        let result = build_report(
            ColumnNames {
                id: "id".to_string(),
                engagement: vec!["x".to_string()],
                experience: vec!["y".to_string()],
            },
            &merged,
            ScoredDimension {
                model: model(vec![0], array![[1.0]]),
                scores: array![1.0],
            },
            ScoredDimension {
                model: model(vec![0], array![[1.0]]),
                scores: array![1.0],
            },
            ReferenceClusters {
                engagement: 0,
                experience: 0,
            },
            10,
        );
        assert!(result.is_err());
    }
}
