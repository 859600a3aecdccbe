//! Similarity retrieval over a published index, optionally scoped to one user.
//!
//! The retriever embeds the query, asks the index for twice as many
//! candidates as requested, and keeps the ones owned by the filtering user in
//! rank order. It never widens the candidate set: when a user's entries are
//! sparse relative to the whole index, fewer than `top_k` results come back.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use journal_core::entry::Entry;
use journal_core::error::{JournalError, Result};

use crate::embedding::{DynEmbeddingService, EmbeddingService};
use crate::index::EmbeddingIndex;

/// Candidates requested from the index per result wanted.
pub const CANDIDATE_MULTIPLIER: usize = 2;

/// A retrieved entry with its rank information.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedEntry<'a> {
    /// Position of the entry in the index.
    pub position: usize,
    /// Squared Euclidean distance to the query embedding.
    pub distance: f32,
    pub entry: &'a Entry,
}

/// Turns free text into a ranked list of related past entries.
///
/// Holds a shared, read-only index; any number of retrievers (or concurrent
/// calls on one retriever) may query it at once.
pub struct Retriever {
    index: Arc<EmbeddingIndex>,
    embedder: Arc<dyn DynEmbeddingService>,
}

impl Retriever {
    /// Create a retriever over a shared index and an embedding service.
    pub fn new(index: Arc<EmbeddingIndex>, embedder: impl EmbeddingService + 'static) -> Self {
        Self::with_shared(index, Arc::new(embedder))
    }

    /// Create a retriever from an already shared dynamic embedding service.
    pub fn with_shared(index: Arc<EmbeddingIndex>, embedder: Arc<dyn DynEmbeddingService>) -> Self {
        if let Some(dimension) = index.dimension() {
            if dimension != embedder.dimensions() {
                warn!(
                    index = dimension,
                    embedder = embedder.dimensions(),
                    "Embedding service reports a different dimension than the index"
                );
            }
        }
        Self { index, embedder }
    }

    /// Load the published index under `path` and build a retriever over it.
    ///
    /// Any failure to load surfaces as `IndexUnavailable`.
    pub fn open(path: &Path, embedder: Arc<dyn DynEmbeddingService>) -> Result<Self> {
        let load = EmbeddingIndex::load(path).map_err(|e| match e {
            JournalError::IndexUnavailable(_) => e,
            other => JournalError::IndexUnavailable(format!("{}: {}", path.display(), other)),
        })?;
        if load.skipped > 0 {
            warn!(
                path = %path.display(),
                skipped = load.skipped,
                "Index loaded with skipped records"
            );
        }
        Ok(Self::with_shared(Arc::new(load.index), embedder))
    }

    /// Texts of the entries most similar to `query`, most similar first.
    ///
    /// With `user_filter` set, only that user's entries are returned. At most
    /// `top_k` texts come back, and possibly fewer (see module docs).
    pub async fn retrieve(
        &self,
        query: &str,
        user_filter: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<String>> {
        let hits = self.retrieve_entries(query, user_filter, top_k).await?;
        Ok(hits.into_iter().map(|hit| hit.entry.text.clone()).collect())
    }

    /// Same as [`Retriever::retrieve`] but returns positions, distances and
    /// the borrowed entries.
    pub async fn retrieve_entries(
        &self,
        query: &str,
        user_filter: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<RetrievedEntry<'_>>> {
        if top_k == 0 {
            return Err(JournalError::Config("top_k must be > 0".to_string()));
        }

        let query_vec = self.embedder.embed_boxed(query).await?;
        let candidates = top_k.saturating_mul(CANDIDATE_MULTIPLIER);
        let hits = self.index.search(&query_vec, candidates)?;
        let scanned = hits.len();

        let mut results = Vec::with_capacity(top_k.min(hits.len()));
        for hit in hits {
            let Some(entry) = self.index.entry(hit.position) else {
                continue;
            };
            if user_filter.is_some_and(|user| user != entry.user_id) {
                continue;
            }

            results.push(RetrievedEntry {
                position: hit.position,
                distance: hit.distance,
                entry,
            });

            if results.len() >= top_k {
                break;
            }
        }

        debug!(
            user = user_filter.unwrap_or("*"),
            top_k,
            candidates = scanned,
            returned = results.len(),
            "Retrieved similar entries"
        );
        Ok(results)
    }

    /// Get a reference to the underlying index.
    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;

    async fn make_retriever(entries: Vec<Entry>) -> Retriever {
        let embedder = MockEmbedding::with_dimensions(16);
        let index = EmbeddingIndex::build(entries, &embedder).await.unwrap();
        Retriever::new(Arc::new(index), embedder)
    }

    #[tokio::test]
    async fn test_retrieve_empty_index() {
        let retriever = Retriever::new(Arc::new(EmbeddingIndex::new()), MockEmbedding::new());
        let results = retriever.retrieve("query", None, 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_exact_text_ranks_first() {
        let retriever = make_retriever(vec![
            Entry::new("a", "rainy walk home"),
            Entry::new("b", "job interview nerves"),
            Entry::new("a", "dinner with my sister"),
        ])
        .await;

        let hits = retriever
            .retrieve_entries("job interview nerves", None, 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].entry.text, "job interview nerves");
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_user_filter() {
        let retriever = make_retriever(vec![
            Entry::new("a", "one"),
            Entry::new("b", "two"),
            Entry::new("a", "three"),
            Entry::new("b", "four"),
        ])
        .await;

        let hits = retriever.retrieve_entries("two", Some("a"), 2).await.unwrap();
        assert!(hits.iter().all(|h| h.entry.user_id == "a"));
        assert!(hits.len() <= 2);
    }

    #[tokio::test]
    async fn test_zero_top_k_rejected() {
        let retriever = make_retriever(vec![Entry::new("a", "one")]).await;
        let err = retriever.retrieve("one", None, 0).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_huge_top_k_returns_whole_index() {
        let retriever =
            make_retriever(vec![Entry::new("a", "one"), Entry::new("b", "two")]).await;

        let texts = retriever.retrieve("one", None, usize::MAX / 2).await.unwrap();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0], "one");
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch() {
        let index = EmbeddingIndex::build(
            vec![Entry::new("a", "one")],
            &MockEmbedding::with_dimensions(8),
        )
        .await
        .unwrap();
        let retriever = Retriever::new(Arc::new(index), MockEmbedding::with_dimensions(4));

        let err = retriever.retrieve("one", None, 1).await.unwrap_err();
        assert!(matches!(
            err,
            JournalError::DimensionMismatch {
                expected: 8,
                actual: 4
            }
        ));
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let retriever = make_retriever(vec![Entry::new("a", "one")]).await;
        let err = retriever.retrieve("  ", None, 1).await.unwrap_err();
        assert!(matches!(err, JournalError::EmbeddingProvider(_)));
    }

    #[test]
    fn test_open_missing_index() {
        let embedder: Arc<dyn DynEmbeddingService> = Arc::new(MockEmbedding::new());
        let err = Retriever::open(Path::new("/nonexistent/index"), embedder)
            .err()
            .unwrap();
        assert!(matches!(err, JournalError::IndexUnavailable(_)));
    }
}
