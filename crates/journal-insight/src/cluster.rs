//! Thematic clustering of journal entries via seeded k-means.
//!
//! Entries are embedded, then partitioned around exactly `k` centroids with
//! k-means++ initialisation and Lloyd iterations. The seed is explicit, so the
//! same input and configuration always produce the same partition.
//!
//! When there are no more entries than requested groups, each entry becomes
//! its own group and nothing is embedded.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use journal_core::config::ClusteringConfig;
use journal_core::entry::Entry;
use journal_core::error::JournalError;
use journal_vector::embedding::{DynEmbeddingService, EmbeddingService};

use crate::error::InsightError;

/// Parameters of the centroid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Seed for centroid initialisation.
    pub seed: u64,
    /// Upper bound on Lloyd iterations.
    pub max_iterations: usize,
    /// Converged once no centroid moves further than this (Euclidean).
    pub tolerance: f32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_iterations: 300,
            tolerance: 1e-4,
        }
    }
}

impl From<&ClusteringConfig> for ClusterConfig {
    fn from(config: &ClusteringConfig) -> Self {
        Self {
            seed: config.seed,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
        }
    }
}

/// Result of a k-means run.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansOutcome {
    /// Centroid index for each input vector.
    pub assignments: Vec<usize>,
    /// Exactly `k` centroids. A centroid nobody is nearest to keeps its last
    /// position.
    pub centroids: Vec<Vec<f32>>,
    pub iterations: usize,
    pub converged: bool,
    /// Sum of squared distances from each vector to its centroid.
    pub inertia: f32,
}

/// Partition `vectors` around `k` centroids.
///
/// Requires `1 <= k <= vectors.len()` and vectors of one dimension.
pub fn kmeans(
    vectors: &[Vec<f32>],
    k: usize,
    config: &ClusterConfig,
) -> Result<KMeansOutcome, InsightError> {
    if k == 0 {
        return Err(InsightError::Config("k must be > 0".to_string()));
    }
    if vectors.len() < k {
        return Err(InsightError::Config(format!(
            "k ({}) must be <= number of vectors ({})",
            k,
            vectors.len()
        )));
    }
    if config.max_iterations == 0 {
        return Err(InsightError::Config(
            "max_iterations must be > 0".to_string(),
        ));
    }
    let dimension = vectors[0].len();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(JournalError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        }
        .into());
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut centroids = kmeans_plus_plus(vectors, k, &mut rng);
    let mut assignments = vec![0usize; vectors.len()];
    let mut iterations = 0;
    let mut converged = false;

    for iter in 1..=config.max_iterations {
        iterations = iter;
        assign(vectors, &centroids, &mut assignments);

        let updated = recompute_centroids(vectors, &assignments, &centroids);
        let max_shift = centroids
            .iter()
            .zip(updated.iter())
            .map(|(old, new)| squared_distance(old, new).sqrt())
            .fold(0.0f32, f32::max);
        centroids = updated;

        if max_shift <= config.tolerance {
            converged = true;
            break;
        }
    }

    // Final membership against the settled centroids.
    assign(vectors, &centroids, &mut assignments);
    let inertia = vectors
        .iter()
        .zip(assignments.iter())
        .map(|(v, &c)| squared_distance(v, &centroids[c]))
        .sum();

    debug!(k, n = vectors.len(), iterations, converged, inertia, "k-means finished");

    Ok(KMeansOutcome {
        assignments,
        centroids,
        iterations,
        converged,
        inertia,
    })
}

/// k-means++ seeding: each further centroid is drawn with probability
/// proportional to its squared distance from the nearest chosen one.
fn kmeans_plus_plus(vectors: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let n = vectors.len();
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(vectors[rng.gen_range(0..n)].clone());

    let mut nearest = vec![f64::INFINITY; n];
    while centroids.len() < k {
        if let Some(last) = centroids.last() {
            for (slot, v) in nearest.iter_mut().zip(vectors) {
                *slot = slot.min(f64::from(squared_distance(v, last)));
            }
        }

        let total: f64 = nearest.iter().sum();
        let next = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            nearest
                .iter()
                .position(|&d| {
                    cumulative += d;
                    d > 0.0 && cumulative >= target
                })
                .or_else(|| nearest.iter().rposition(|&d| d > 0.0))
                .unwrap_or(0)
        } else {
            // Every point coincides with a chosen centroid.
            rng.gen_range(0..n)
        };
        centroids.push(vectors[next].clone());
    }

    centroids
}

/// Nearest centroid per vector; ties go to the lower centroid index.
fn assign(vectors: &[Vec<f32>], centroids: &[Vec<f32>], assignments: &mut [usize]) {
    for (slot, v) in assignments.iter_mut().zip(vectors) {
        let mut best = 0;
        let mut best_dist = f32::INFINITY;
        for (c, centroid) in centroids.iter().enumerate() {
            let d = squared_distance(v, centroid);
            if d < best_dist {
                best_dist = d;
                best = c;
            }
        }
        *slot = best;
    }
}

fn recompute_centroids(
    vectors: &[Vec<f32>],
    assignments: &[usize],
    previous: &[Vec<f32>],
) -> Vec<Vec<f32>> {
    let dimension = previous.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0f32; dimension]; previous.len()];
    let mut counts = vec![0usize; previous.len()];

    for (v, &c) in vectors.iter().zip(assignments) {
        counts[c] += 1;
        for (acc, x) in sums[c].iter_mut().zip(v) {
            *acc += x;
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((mut sum, count), old)| {
            if count == 0 {
                return old.clone();
            }
            for x in &mut sum {
                *x /= count as f32;
            }
            sum
        })
        .collect()
}

#[inline]
fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// One thematic group of entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster<'a> {
    /// `None` for singleton groups produced without clustering.
    pub centroid: Option<Vec<f32>>,
    /// Members in input order. May be empty: no entry was nearest to this
    /// centroid, which means "no content for this theme".
    pub members: Vec<&'a Entry>,
}

impl<'a> Cluster<'a> {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn texts(&self) -> Vec<&'a str> {
        self.members.iter().map(|e| e.text.as_str()).collect()
    }

    /// Member texts separated by newlines, the form handed to a summarizer.
    pub fn joined_text(&self) -> String {
        self.texts().join("\n")
    }
}

/// Ordered groups covering every input entry exactly once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition<'a> {
    pub clusters: Vec<Cluster<'a>>,
}

impl<'a> Partition<'a> {
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cluster<'a>> {
        self.clusters.iter()
    }

    /// Groups that received at least one entry.
    pub fn non_empty(&self) -> impl Iterator<Item = &Cluster<'a>> {
        self.clusters.iter().filter(|c| !c.is_empty())
    }
}

/// Partitions a caller's entries into up to `k` themes.
pub struct Clusterer {
    embedder: Arc<dyn DynEmbeddingService>,
    config: ClusterConfig,
}

impl Clusterer {
    pub fn new(embedder: impl EmbeddingService + 'static, config: ClusterConfig) -> Self {
        Self::with_shared(Arc::new(embedder), config)
    }

    pub fn with_shared(embedder: Arc<dyn DynEmbeddingService>, config: ClusterConfig) -> Self {
        Self { embedder, config }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Group `entries` around `k` centroids.
    ///
    /// - no entries: an empty partition
    /// - at most `k` entries: one singleton group per entry, in input order
    /// - otherwise: exactly `k` groups, some possibly empty
    ///
    /// Embedding failures propagate unchanged.
    pub async fn cluster<'a, I>(&self, entries: I, k: usize) -> Result<Partition<'a>, InsightError>
    where
        I: IntoIterator<Item = &'a Entry>,
    {
        if k == 0 {
            return Err(InsightError::Config("k must be > 0".to_string()));
        }
        let entries: Vec<&'a Entry> = entries.into_iter().collect();

        if entries.is_empty() {
            return Ok(Partition::default());
        }

        if entries.len() <= k {
            debug!(n = entries.len(), k, "Too few entries to cluster, using singletons");
            return Ok(Partition {
                clusters: entries
                    .into_iter()
                    .map(|e| Cluster {
                        centroid: None,
                        members: vec![e],
                    })
                    .collect(),
            });
        }

        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        let vectors = self.embedder.embed_batch_boxed(&texts).await?;
        if vectors.len() != entries.len() {
            return Err(JournalError::EmbeddingProvider(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                entries.len()
            ))
            .into());
        }

        let outcome = kmeans(&vectors, k, &self.config)?;

        let mut clusters: Vec<Cluster<'a>> = outcome
            .centroids
            .into_iter()
            .map(|centroid| Cluster {
                centroid: Some(centroid),
                members: Vec::new(),
            })
            .collect();
        for (entry, &c) in entries.iter().zip(outcome.assignments.iter()) {
            clusters[c].members.push(*entry);
        }

        info!(
            entries = entries.len(),
            k,
            empty_groups = clusters.iter().filter(|c| c.is_empty()).count(),
            iterations = outcome.iterations,
            converged = outcome.converged,
            "Clustered entries"
        );

        Ok(Partition { clusters })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journal_vector::embedding::MockEmbedding;

    fn blobs() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![100.0, 100.0],
            vec![100.0, 101.0],
            vec![200.0, 0.0],
            vec![201.0, 0.0],
        ]
    }

    #[test]
    fn test_kmeans_separates_blobs() {
        let outcome = kmeans(&blobs(), 3, &ClusterConfig::default()).unwrap();
        let a = &outcome.assignments;

        assert_eq!(outcome.centroids.len(), 3);
        assert_eq!(a[0], a[1]);
        assert_eq!(a[2], a[3]);
        assert_eq!(a[4], a[5]);
        assert_ne!(a[0], a[2]);
        assert_ne!(a[2], a[4]);
        assert_ne!(a[0], a[4]);
        assert!(outcome.converged);
        assert!((outcome.inertia - 1.5).abs() < 1e-4);
    }

    #[test]
    fn test_kmeans_is_reproducible() {
        let config = ClusterConfig {
            seed: 7,
            ..Default::default()
        };
        let first = kmeans(&blobs(), 2, &config).unwrap();
        let second = kmeans(&blobs(), 2, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_kmeans_identical_points_leave_empty_group() {
        let vectors = vec![vec![1.0, 1.0]; 4];
        let outcome = kmeans(&vectors, 2, &ClusterConfig::default()).unwrap();
        assert_eq!(outcome.assignments, vec![0, 0, 0, 0]);
        assert_eq!(outcome.centroids.len(), 2);
        assert_eq!(outcome.inertia, 0.0);
    }

    #[test]
    fn test_kmeans_rejects_bad_input() {
        let config = ClusterConfig::default();
        assert!(matches!(
            kmeans(&blobs(), 0, &config),
            Err(InsightError::Config(_))
        ));
        assert!(matches!(
            kmeans(&blobs()[..2], 3, &config),
            Err(InsightError::Config(_))
        ));
        let mixed = vec![vec![0.0, 0.0], vec![1.0]];
        assert!(matches!(
            kmeans(&mixed, 1, &config),
            Err(InsightError::Core(JournalError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn test_kmeans_stops_at_max_iterations() {
        let config = ClusterConfig {
            max_iterations: 1,
            tolerance: 0.0,
            ..Default::default()
        };
        let outcome = kmeans(&blobs(), 3, &config).unwrap();
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn test_config_from_section() {
        let section = ClusteringConfig {
            k: 4,
            seed: 9,
            max_iterations: 50,
            tolerance: 0.5,
        };
        let config = ClusterConfig::from(&section);
        assert_eq!(config.seed, 9);
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.tolerance, 0.5);
    }

    #[tokio::test]
    async fn test_cluster_empty_input() {
        let clusterer = Clusterer::new(MockEmbedding::new(), ClusterConfig::default());
        let partition = clusterer.cluster(&[] as &[Entry], 3).await.unwrap();
        assert!(partition.is_empty());
    }

    #[tokio::test]
    async fn test_cluster_zero_k() {
        let clusterer = Clusterer::new(MockEmbedding::new(), ClusterConfig::default());
        let entries = vec![Entry::new("u", "a")];
        assert!(matches!(
            clusterer.cluster(&entries, 0).await,
            Err(InsightError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_cluster_embedding_failure_propagates() {
        let clusterer = Clusterer::new(MockEmbedding::new(), ClusterConfig::default());
        // The mock refuses blank text.
        let entries = vec![
            Entry::new("u", "a"),
            Entry::new("u", "b"),
            Entry::new("u", " "),
        ];
        let err = clusterer.cluster(&entries, 2).await.unwrap_err();
        assert!(matches!(
            err,
            InsightError::Core(JournalError::EmbeddingProvider(_))
        ));
    }

    #[test]
    fn test_cluster_text_helpers() {
        let a = Entry::new("u", "first");
        let b = Entry::new("u", "second");
        let cluster = Cluster {
            centroid: None,
            members: vec![&a, &b],
        };
        assert_eq!(cluster.texts(), vec!["first", "second"]);
        assert_eq!(cluster.joined_text(), "first\nsecond");
        assert_eq!(cluster.len(), 2);
    }
}
