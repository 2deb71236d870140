use crate::error::RagError;
use crate::models::{Chunk, Document, IndexedRecord, MetadataValue, RawHit};

/// Storage engine behind a [`crate::VectorIndex`]. Implementations own the
/// records of exactly one collection and rank by cosine distance.
pub trait CollectionBackend {
    fn collection_name(&self) -> &str;

    /// Fixed once the first record is stored.
    fn dimensions(&self) -> Option<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records whose metadata `key` equals `value`.
    fn count_where(&self, key: &str, value: &MetadataValue) -> Result<usize, RagError>;

    /// Stores one batch. Records with an existing id replace the stored one.
    fn insert(&mut self, batch: Vec<IndexedRecord>) -> Result<(), RagError>;

    /// Up to `top_k` records by increasing distance to `vector`.
    fn nearest(&self, vector: &[f32], top_k: usize) -> Result<Vec<RawHit>, RagError>;
}

pub trait TextSplitter {
    fn split(&self, documents: &[Document]) -> Vec<Chunk>;
}

pub trait AnswerComposer {
    fn generate(&self, query: &str, context: &str, max_length: usize) -> Result<String, RagError>;
}
