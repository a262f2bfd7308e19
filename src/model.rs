//! K-Means clustering with k-means++ seeding and seeded restarts

use crate::config::EmptyClusterPolicy;
use crate::error::{Result, SatisfactionError};
use linfa_nn::distance::{Distance, L2Dist};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Parameters for one clustering of a feature matrix
#[derive(Debug, Clone)]
pub struct KMeansParams {
    pub n_clusters: usize,
    /// Independent restarts; the lowest inertia wins
    pub n_init: usize,
    /// Iteration cap for a single restart
    pub max_iters: usize,
    /// Base seed, restart `r` uses `seed + r`
    pub seed: u64,
    pub empty_clusters: EmptyClusterPolicy,
}

impl KMeansParams {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            n_init: 10,
            max_iters: 300,
            seed: 42,
            empty_clusters: EmptyClusterPolicy::default(),
        }
    }
}

/// Fitted K-Means model
#[derive(Debug, Clone)]
pub struct KMeansModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignment for each training row
    pub labels: Array1<usize>,
    /// Cluster centroids (n_clusters, n_features) in raw feature space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
    /// Lloyd iterations used by the winning restart
    pub n_iter: usize,
    /// Clusters that ended with no members and had their centroid repaired
    pub empty_clusters: Vec<usize>,
}

impl KMeansModel {
    /// Nearest centroid for a new point
    pub fn predict(&self, features: ArrayView1<f64>) -> Result<usize> {
        if features.len() != self.centroids.ncols() {
            return Err(SatisfactionError::Config(format!(
                "feature vector has {} values, model expects {}",
                features.len(),
                self.centroids.ncols()
            )));
        }

        // Repaired empty clusters share a centroid with a populated one and never win
        let mut min_distance = f64::INFINITY;
        let mut closest_cluster = None;
        for (cluster_idx, centroid) in self.centroids.outer_iter().enumerate() {
            if self.empty_clusters.contains(&cluster_idx) {
                continue;
            }
            let distance = L2Dist.rdistance(features, centroid);
            if distance < min_distance {
                min_distance = distance;
                closest_cluster = Some(cluster_idx);
            }
        }

        Ok(closest_cluster.unwrap_or_else(|| nearest_centroid(features, &self.centroids)))
    }

    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            sizes[label] += 1;
        }
        sizes
    }

    /// Mean silhouette coefficient over the first `sample_size` rows
    pub fn compute_silhouette_sample(&self, features: &Array2<f64>, sample_size: usize) -> f64 {
        let n_samples = features.nrows().min(sample_size);
        if n_samples < 2 {
            return 0.0;
        }

        let mut silhouette_sum = 0.0;

        for i in 0..n_samples {
            let point = features.row(i);
            let cluster_label = self.labels[i];

            let mut same_cluster = (0.0, 0usize);
            let mut other_clusters = vec![(0.0, 0usize); self.n_clusters];

            for j in (0..n_samples).filter(|&j| j != i) {
                let distance = L2Dist.distance(point, features.row(j));
                let slot = if self.labels[j] == cluster_label {
                    &mut same_cluster
                } else {
                    &mut other_clusters[self.labels[j]]
                };
                slot.0 += distance;
                slot.1 += 1;
            }

            let a_i = if same_cluster.1 == 0 {
                0.0
            } else {
                same_cluster.0 / same_cluster.1 as f64
            };

            // b(i): smallest mean distance to another cluster
            let b_i = other_clusters
                .iter()
                .filter(|(_, count)| *count > 0)
                .map(|(sum, count)| sum / *count as f64)
                .fold(f64::INFINITY, f64::min);

            silhouette_sum += if b_i.is_infinite() || (a_i == 0.0 && b_i == 0.0) {
                0.0
            } else {
                (b_i - a_i) / a_i.max(b_i)
            };
        }

        silhouette_sum / n_samples as f64
    }
}

/// Outcome of a single seeded Lloyd run
#[derive(Debug)]
struct LloydRun {
    run: usize,
    labels: Array1<usize>,
    centroids: Array2<f64>,
    counts: Vec<usize>,
    inertia: f64,
    n_iter: usize,
}

/// Fit K-Means on a feature matrix.
///
/// # Arguments
/// * `features` - Raw feature matrix (n_rows, n_features)
/// * `params` - Cluster count, restarts, iteration cap, seed and empty-cluster policy
/// * `feature_set` - Name used in logs and errors
///
/// # Returns
/// * The lowest-inertia model over all restarts
pub fn fit_kmeans(
    features: &Array2<f64>,
    params: &KMeansParams,
    feature_set: &str,
) -> Result<KMeansModel> {
    let n_rows = features.nrows();
    if params.n_clusters == 0 {
        return Err(SatisfactionError::Config(
            "number of clusters must be at least 1".to_string(),
        ));
    }
    if n_rows < params.n_clusters {
        return Err(SatisfactionError::Config(format!(
            "number of rows ({}) must be at least the number of clusters ({})",
            n_rows, params.n_clusters
        )));
    }
    if params.n_init == 0 || params.max_iters == 0 {
        return Err(SatisfactionError::Config(
            "n_init and max_iters must be at least 1".to_string(),
        ));
    }

    let best = (0..params.n_init)
        .into_par_iter()
        .map(|run| {
            let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(run as u64));
            lloyd(features.view(), params, run, &mut rng)
        })
        .min_by(|a, b| a.inertia.total_cmp(&b.inertia).then(a.run.cmp(&b.run)))
        .ok_or_else(|| SatisfactionError::Config("no k-means restarts were run".to_string()))?;

    tracing::debug!(
        feature_set,
        run = best.run,
        inertia = best.inertia,
        n_iter = best.n_iter,
        "selected k-means restart"
    );

    let LloydRun {
        labels,
        mut centroids,
        counts,
        inertia,
        n_iter,
        ..
    } = best;

    let empty_clusters: Vec<usize> = (0..params.n_clusters).filter(|&c| counts[c] == 0).collect();
    if let Some(&cluster) = empty_clusters.first() {
        match params.empty_clusters {
            EmptyClusterPolicy::Fail => {
                return Err(SatisfactionError::DegenerateCluster {
                    feature_set: feature_set.to_string(),
                    cluster,
                })
            }
            EmptyClusterPolicy::ReuseNearest => {
                tracing::warn!(
                    feature_set,
                    ?empty_clusters,
                    "empty clusters take the centroid of their nearest populated cluster"
                );
                reuse_nearest_centroids(&mut centroids, &counts);
            }
        }
    }

    Ok(KMeansModel {
        n_clusters: params.n_clusters,
        labels,
        centroids,
        inertia,
        n_iter,
        empty_clusters,
    })
}

/// Run Lloyd's algorithm from one k-means++ seeding
fn lloyd(features: ArrayView2<f64>, params: &KMeansParams, run: usize, rng: &mut StdRng) -> LloydRun {
    let mut centroids = kmeans_plusplus(features, params.n_clusters, rng);
    let mut labels = Array1::from_elem(features.nrows(), usize::MAX);
    let mut counts = vec![0; params.n_clusters];
    let mut n_iter = 0;

    while n_iter < params.max_iters {
        n_iter += 1;
        if !assign_labels(features, &centroids, &mut labels) {
            break;
        }
        counts = update_centroids(features, &labels, &mut centroids);
    }

    // The iteration cap can stop right after an update; labels stay nearest-centroid.
    if assign_labels(features, &centroids, &mut labels) {
        counts = vec![0; params.n_clusters];
        for &label in labels.iter() {
            counts[label] += 1;
        }
    }

    let inertia = compute_inertia(features, &labels, &centroids);
    tracing::debug!(run, inertia, n_iter, "k-means restart finished");

    LloydRun {
        run,
        labels,
        centroids,
        counts,
        inertia,
        n_iter,
    }
}

/// k-means++ seeding: each new centroid is drawn with probability proportional
/// to its squared distance from the nearest centroid chosen so far
fn kmeans_plusplus(features: ArrayView2<f64>, n_clusters: usize, rng: &mut StdRng) -> Array2<f64> {
    let n_rows = features.nrows();
    let mut centroids = Array2::zeros((n_clusters, features.ncols()));

    let first = rng.gen_range(0..n_rows);
    centroids.row_mut(0).assign(&features.row(first));

    let mut min_dists: Vec<f64> = features
        .outer_iter()
        .map(|point| L2Dist.rdistance(point, centroids.row(0)))
        .collect();

    for c in 1..n_clusters {
        // All weights are zero when every point sits on a chosen centroid
        let next = match WeightedIndex::new(&min_dists) {
            Ok(weights) => weights.sample(rng),
            Err(_) => rng.gen_range(0..n_rows),
        };
        centroids.row_mut(c).assign(&features.row(next));

        for (dist, point) in min_dists.iter_mut().zip(features.outer_iter()) {
            *dist = dist.min(L2Dist.rdistance(point, centroids.row(c)));
        }
    }

    centroids
}

/// Index of the nearest centroid, ties going to the lowest index
fn nearest_centroid(point: ArrayView1<f64>, centroids: &Array2<f64>) -> usize {
    let mut min_distance = f64::INFINITY;
    let mut closest_cluster = 0;

    for (cluster_idx, centroid) in centroids.outer_iter().enumerate() {
        let distance = L2Dist.rdistance(point, centroid);
        if distance < min_distance {
            min_distance = distance;
            closest_cluster = cluster_idx;
        }
    }

    closest_cluster
}

/// Reassign every row; returns whether any label changed
fn assign_labels(features: ArrayView2<f64>, centroids: &Array2<f64>, labels: &mut Array1<usize>) -> bool {
    let mut changed = false;
    for (point, label) in features.outer_iter().zip(labels.iter_mut()) {
        let nearest = nearest_centroid(point, centroids);
        if *label != nearest {
            *label = nearest;
            changed = true;
        }
    }
    changed
}

/// Move each centroid to the mean of its rows; empty clusters keep their position
fn update_centroids(
    features: ArrayView2<f64>,
    labels: &Array1<usize>,
    centroids: &mut Array2<f64>,
) -> Vec<usize> {
    let mut sums = Array2::<f64>::zeros(centroids.raw_dim());
    let mut counts = vec![0usize; centroids.nrows()];

    for (point, &label) in features.outer_iter().zip(labels.iter()) {
        let mut sum = sums.row_mut(label);
        sum += &point;
        counts[label] += 1;
    }

    for (cluster, &count) in counts.iter().enumerate() {
        if count > 0 {
            let mean = &sums.row(cluster) / count as f64;
            centroids.row_mut(cluster).assign(&mean);
        }
    }

    counts
}

/// Point each empty cluster at the centroid of the nearest populated cluster
fn reuse_nearest_centroids(centroids: &mut Array2<f64>, counts: &[usize]) {
    let populated: Vec<usize> = (0..counts.len()).filter(|&c| counts[c] > 0).collect();

    for cluster in (0..counts.len()).filter(|&c| counts[c] == 0) {
        let nearest = populated
            .iter()
            .copied()
            .min_by(|&a, &b| {
                let da = L2Dist.rdistance(centroids.row(cluster), centroids.row(a));
                let db = L2Dist.rdistance(centroids.row(cluster), centroids.row(b));
                da.total_cmp(&db)
            });

        if let Some(source) = nearest {
            let centroid = centroids.row(source).to_owned();
            centroids.row_mut(cluster).assign(&centroid);
        }
    }
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(features: ArrayView2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    features
        .outer_iter()
        .zip(labels.iter())
        .map(|(point, &cluster)| L2Dist.rdistance(point, centroids.row(cluster)))
        .sum()
}
