use crate::embeddings::Embedder;
use crate::error::RagError;
use crate::models::RetrievalHit;
use crate::store::VectorIndex;
use crate::traits::CollectionBackend;

/// Single-stage retriever: one query embedding, one nearest-neighbour
/// lookup, hits ranked in the order the index returns them.
pub struct Retriever<'a, E: ?Sized, B> {
    embedder: &'a E,
    index: &'a VectorIndex<B>,
}

impl<'a, E, B> Retriever<'a, E, B>
where
    E: Embedder + ?Sized,
    B: CollectionBackend,
{
    pub fn new(embedder: &'a E, index: &'a VectorIndex<B>) -> Self {
        Self { embedder, index }
    }

    /// Returns at most `top_k` hits with `score = 1 - distance` and 1-based
    /// ranks. A blank query returns nothing without touching the model or the
    /// index. Model and storage faults propagate; anything else is logged and
    /// reported as no hits.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalHit>, RagError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        match self.search(query, top_k) {
            Ok(hits) => Ok(hits),
            Err(error) if error.is_structural() => Err(error),
            Err(error) => {
                tracing::warn!(%error, top_k, "retrieval degraded to no hits");
                Ok(Vec::new())
            }
        }
    }

    fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalHit>, RagError> {
        let embeddings = self.embedder.generate(&[query.to_string()])?;
        let vector = embeddings.row(0).ok_or_else(|| {
            RagError::GenerationFailed("embedder returned no row for the query".to_string())
        })?;

        let hits = self
            .index
            .query(vector, top_k)?
            .into_iter()
            .enumerate()
            .map(|(position, hit)| RetrievalHit {
                content: hit.content,
                metadata: hit.metadata,
                score: hit.distance.map(|distance| 1.0 - distance),
                rank: position + 1,
            })
            .collect::<Vec<_>>();

        tracing::debug!(hits = hits.len(), top_k, "retrieved");
        Ok(hits)
    }
}

/// Joins hit contents into one context block, best hit first.
pub fn context_from_hits(hits: &[RetrievalHit]) -> String {
    hits.iter()
        .map(|hit| hit.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
