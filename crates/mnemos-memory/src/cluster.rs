//! K-means clustering over embeddings.
//!
//! Lloyd iterations from k-means++ seeds, restarted several times; the
//! partition with the lowest inertia (sum of squared distances to the
//! assigned centroid) wins. Results depend on the RNG, so callers should only
//! rely on structural properties: every point gets a label below `k`, and
//! there are at most `k` distinct labels.

use mnemos_types::squared_l2;
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

/// Parameters of one clustering call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeansConfig {
    /// Number of clusters requested.
    pub k: usize,
    /// Independent runs; the best one is kept.
    pub restarts: usize,
    /// Cap on Lloyd iterations per run.
    pub max_iterations: usize,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: 3,
            restarts: 10,
            max_iterations: 50,
        }
    }
}

/// Result of [`kmeans`].
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// Cluster label of each input point, in input order.
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vec<f32>>,
    pub inertia: f32,
}

impl Clustering {
    /// Indices of the input points grouped by label, empty clusters dropped.
    /// Indices within a group keep input order.
    pub fn groups(&self) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.centroids.len()];
        for (point, &label) in self.assignments.iter().enumerate() {
            groups[label].push(point);
        }
        groups.retain(|g| !g.is_empty());
        groups
    }
}

/// Partition `points` into at most `config.k` clusters.
///
/// Returns `None` when `k` is zero or there are fewer points than `k`. All
/// points must have the same length.
pub fn kmeans<R: Rng + ?Sized>(points: &[&[f32]], config: &KMeansConfig, rng: &mut R) -> Option<Clustering> {
    if config.k == 0 || points.len() < config.k {
        return None;
    }
    (0..config.restarts.max(1))
        .map(|_| lloyd(points, config, rng))
        .min_by(|a, b| a.inertia.total_cmp(&b.inertia))
}

fn lloyd<R: Rng + ?Sized>(points: &[&[f32]], config: &KMeansConfig, rng: &mut R) -> Clustering {
    let mut centroids = seed_plus_plus(points, config.k, rng);
    let mut assignments = vec![usize::MAX; points.len()];

    for _ in 0..config.max_iterations.max(1) {
        let mut changed = false;
        for (point, label) in points.iter().zip(assignments.iter_mut()) {
            let nearest = nearest_centroid(point, &centroids).0;
            if *label != nearest {
                *label = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        update_centroids(points, &assignments, &mut centroids);
    }

    let inertia = points
        .iter()
        .zip(&assignments)
        .map(|(p, &label)| squared_l2(p, &centroids[label]))
        .sum();
    Clustering {
        assignments,
        centroids,
        inertia,
    }
}

/// k-means++ seeding: each further seed is drawn with probability
/// proportional to its squared distance from the nearest seed so far.
fn seed_plus_plus<R: Rng + ?Sized>(points: &[&[f32]], k: usize, rng: &mut R) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())].to_vec());
    while centroids.len() < k {
        let weights: Vec<f32> = points.iter().map(|p| nearest_centroid(p, &centroids).1).collect();
        // All weights zero means every point coincides with a seed.
        let next = match WeightedIndex::new(&weights) {
            Ok(dist) => dist.sample(rng),
            Err(_) => rng.gen_range(0..points.len()),
        };
        centroids.push(points[next].to_vec());
    }
    centroids
}

fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> (usize, f32) {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_l2(point, c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((0, 0.0))
}

/// Move each centroid to the mean of its members. A centroid that lost all
/// its members stays where it was.
fn update_centroids(points: &[&[f32]], assignments: &[usize], centroids: &mut [Vec<f32>]) {
    let dim = centroids.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0f32; dim]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];
    for (point, &label) in points.iter().zip(assignments) {
        counts[label] += 1;
        for (s, x) in sums[label].iter_mut().zip(point.iter()) {
            *s += x;
        }
    }
    for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
        if count > 0 {
            *centroid = sum.into_iter().map(|s| s / count as f32).collect();
        }
    }
}
