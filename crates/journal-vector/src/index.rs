//! Exact nearest-neighbor index over journal entry embeddings.
//!
//! Every query scans all stored vectors and ranks them by squared Euclidean
//! distance, so results are exact. Position `i` in the vector store and
//! position `i` in the entry store always describe the same entry. The index
//! is built once and never mutated afterwards, which makes it safe to share
//! behind an `Arc` across concurrent readers without locking.

use std::cmp::Ordering;

use rayon::prelude::*;
use tracing::{debug, info};

use journal_core::entry::Entry;
use journal_core::error::{JournalError, Result};

use crate::embedding::DynEmbeddingService;

/// Indexes at least this large compute distances on the rayon pool.
const PARALLEL_SCAN_THRESHOLD: usize = 4_096;

/// Texts handed to the embedding provider per call during `build`.
pub const BUILD_BATCH_SIZE: usize = 32;

/// A single hit returned from a vector search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    /// Position of the matching entry in build order.
    pub position: usize,
    /// Squared Euclidean distance to the query.
    pub distance: f32,
}

/// Immutable, position-addressable collection of `(vector, entry)` pairs.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingIndex {
    vectors: Vec<Vec<f32>>,
    entries: Vec<Entry>,
    dimension: Option<usize>,
}

impl EmbeddingIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Embed every entry and append `(vector, entry)` in input order.
    ///
    /// Entries are validated first, then embedded in batches of
    /// [`BUILD_BATCH_SIZE`]. Fails with a configuration error if the provider
    /// returns vectors of differing lengths, and propagates provider failures
    /// unchanged.
    pub async fn build(entries: Vec<Entry>, embedder: &dyn DynEmbeddingService) -> Result<Self> {
        let entries = entries
            .into_iter()
            .map(Entry::validated)
            .collect::<Result<Vec<_>>>()?;

        let mut vectors = Vec::with_capacity(entries.len());
        let mut dimension: Option<usize> = None;

        for chunk in entries.chunks(BUILD_BATCH_SIZE) {
            let texts: Vec<&str> = chunk.iter().map(|e| e.text.as_str()).collect();
            let batch = embedder.embed_batch_boxed(&texts).await?;
            if batch.len() != chunk.len() {
                return Err(JournalError::EmbeddingProvider(format!(
                    "provider returned {} vectors for {} texts",
                    batch.len(),
                    chunk.len()
                )));
            }

            for (entry, vector) in chunk.iter().zip(batch) {
                match dimension {
                    None => dimension = Some(vector.len()),
                    Some(d) if d != vector.len() => {
                        return Err(JournalError::Config(format!(
                            "entry {} embedded to {} dimensions, earlier entries have {}",
                            entry.id,
                            vector.len(),
                            d
                        )));
                    }
                    Some(_) => {}
                }
                vectors.push(vector);
            }
        }

        info!(
            entries = entries.len(),
            dimension = dimension.unwrap_or(0),
            "Built embedding index"
        );

        Ok(Self {
            vectors,
            entries,
            dimension,
        })
    }

    /// Assemble an index from already aligned vectors and entries.
    ///
    /// Rejects sequences of different lengths and vectors of mixed dimension.
    pub fn from_parts(vectors: Vec<Vec<f32>>, entries: Vec<Entry>) -> Result<Self> {
        if vectors.len() != entries.len() {
            return Err(JournalError::Config(format!(
                "{} vectors but {} entries",
                vectors.len(),
                entries.len()
            )));
        }

        let dimension = vectors.first().map(Vec::len);
        if let Some(d) = dimension {
            if let Some((pos, bad)) = vectors.iter().enumerate().find(|(_, v)| v.len() != d) {
                return Err(JournalError::Config(format!(
                    "vector at position {} has {} dimensions, expected {}",
                    pos,
                    bad.len(),
                    d
                )));
            }
        }

        Ok(Self {
            vectors,
            entries,
            dimension,
        })
    }

    /// Find the `k` stored vectors closest to `query`.
    ///
    /// Returns `min(k, len)` hits ordered by ascending distance, ties broken by
    /// ascending position. An empty index yields no hits for any query.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(JournalError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = if self.vectors.len() >= PARALLEL_SCAN_THRESHOLD {
            self.vectors
                .par_iter()
                .enumerate()
                .map(|(position, v)| SearchHit {
                    position,
                    distance: squared_euclidean(query, v),
                })
                .collect()
        } else {
            self.vectors
                .iter()
                .enumerate()
                .map(|(position, v)| SearchHit {
                    position,
                    distance: squared_euclidean(query, v),
                })
                .collect()
        };

        if k < hits.len() {
            hits.select_nth_unstable_by(k - 1, rank);
            hits.truncate(k);
        }
        hits.sort_by(rank);

        debug!(k, returned = hits.len(), scanned = self.vectors.len(), "Index search");
        Ok(hits)
    }

    /// Entry stored at `position`.
    pub fn entry(&self, position: usize) -> Option<&Entry> {
        self.entries.get(position)
    }

    /// Vector stored at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.vectors.get(position).map(Vec::as_slice)
    }

    /// All entries in build order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// All vectors in build order, aligned with [`EmbeddingIndex::entries`].
    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Vector dimension, or `None` for an index built from no entries.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Return the number of entries stored in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return true if the index contains no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Total order used for ranking: distance first, then position.
fn rank(a: &SearchHit, b: &SearchHit) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.position.cmp(&b.position))
}

/// Squared Euclidean distance between two vectors of equal length.
#[inline]
fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
