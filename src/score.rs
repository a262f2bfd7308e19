//! Reference-cluster selection and distance-based scores

use crate::config::ReferencePolicy;
use crate::error::{Result, SatisfactionError};
use crate::model::KMeansModel;
use linfa_nn::distance::{Distance, L2Dist};
use ndarray::{Array1, Array2, ArrayView1};

/// Reference (worst) cluster id chosen for each feature set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceClusters {
    pub engagement: usize,
    pub experience: usize,
}

/// Composite magnitude per row: the mean of its features, with
/// lower-is-better columns negated.
pub fn composite_magnitudes(features: &Array2<f64>, lower_is_better: &[bool]) -> Array1<f64> {
    let dims = features.ncols().max(1) as f64;
    features
        .outer_iter()
        .map(|row| {
            row.iter()
                .zip(lower_is_better.iter().chain(std::iter::repeat(&false)))
                .map(|(&value, &inverted)| if inverted { -value } else { value })
                .sum::<f64>()
                / dims
        })
        .collect()
}

/// Cluster with the lowest mean composite magnitude.
/// Empty clusters are skipped; ties go to the lowest id.
pub fn worst_cluster(composites: &Array1<f64>, labels: &Array1<usize>, n_clusters: usize) -> Result<usize> {
    let mut sums = vec![0.0; n_clusters];
    let mut counts = vec![0usize; n_clusters];
    for (&value, &label) in composites.iter().zip(labels.iter()) {
        sums[label] += value;
        counts[label] += 1;
    }

    let mut worst: Option<(usize, f64)> = None;
    for cluster in (0..n_clusters).filter(|&c| counts[c] > 0) {
        let mean = sums[cluster] / counts[cluster] as f64;
        tracing::debug!(cluster, mean, size = counts[cluster], "cluster composite");
        match worst {
            Some((_, lowest)) if mean >= lowest => {}
            _ => worst = Some((cluster, mean)),
        }
    }

    worst
        .map(|(cluster, _)| cluster)
        .ok_or_else(|| SatisfactionError::Config("cannot select a reference cluster from zero rows".to_string()))
}

/// Pick the engagement reference, then the experience reference according to `policy`
pub fn select_references(
    engagement: (&Array2<f64>, &KMeansModel, &[bool]),
    experience: (&Array2<f64>, &KMeansModel, &[bool]),
    policy: ReferencePolicy,
) -> Result<ReferenceClusters> {
    let (eng_features, eng_model, eng_orientation) = engagement;
    let engagement_ref = worst_cluster(
        &composite_magnitudes(eng_features, eng_orientation),
        &eng_model.labels,
        eng_model.n_clusters,
    )?;

    let (exp_features, exp_model, exp_orientation) = experience;
    let experience_ref = match policy {
        ReferencePolicy::CrossReferenced => {
            if engagement_ref >= exp_model.n_clusters {
                return Err(SatisfactionError::Config(format!(
                    "engagement reference cluster {} has no experience counterpart (k = {})",
                    engagement_ref, exp_model.n_clusters
                )));
            }
            engagement_ref
        }
        ReferencePolicy::Independent => worst_cluster(
            &composite_magnitudes(exp_features, exp_orientation),
            &exp_model.labels,
            exp_model.n_clusters,
        )?,
    };

    tracing::info!(
        engagement = engagement_ref,
        experience = experience_ref,
        ?policy,
        "reference clusters selected"
    );

    Ok(ReferenceClusters {
        engagement: engagement_ref,
        experience: experience_ref,
    })
}

/// Euclidean distance from every row to `reference`
pub fn distance_scores(features: &Array2<f64>, reference: ArrayView1<f64>) -> Array1<f64> {
    features
        .outer_iter()
        .map(|row| L2Dist.distance(row, reference))
        .collect()
}
