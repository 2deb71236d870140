use crate::embeddings::Embeddings;
use crate::error::RagError;
use crate::models::{Chunk, IndexedRecord, MetadataValue, RawHit, SOURCE_FILE_KEY};
use crate::stores::DiskCollection;
use crate::traits::CollectionBackend;
use std::path::Path;

pub const DEFAULT_BATCH_SIZE: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddSummary {
    pub records: usize,
    pub batches: usize,
}

/// Chunk-level operations over one collection: id assignment, batched
/// insertion, per-file existence checks and nearest-neighbour queries.
#[derive(Debug)]
pub struct VectorIndex<B> {
    backend: B,
}

impl VectorIndex<DiskCollection> {
    pub fn open(persist_dir: impl AsRef<Path>, collection_name: &str) -> Result<Self, RagError> {
        DiskCollection::open(persist_dir, collection_name).map(Self::new)
    }
}

impl<B: CollectionBackend> VectorIndex<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn collection_name(&self) -> &str {
        self.backend.collection_name()
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.backend.dimensions()
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    /// True when any stored record came from `source_file`. This is a
    /// per-file check: a file whose indexing stopped part way still counts.
    pub fn file_exists(&self, source_file: &str) -> Result<bool, RagError> {
        if source_file.is_empty() {
            return Ok(false);
        }
        let value = MetadataValue::Text(source_file.to_string());
        Ok(self.backend.count_where(SOURCE_FILE_KEY, &value)? > 0)
    }

    /// Inserts `chunks` with their aligned `vectors` in sequential batches of
    /// at most `batch_size`. Chunks without an id get one, written back into
    /// their metadata. A failed batch leaves earlier batches stored.
    pub fn add(
        &mut self,
        chunks: &mut [Chunk],
        vectors: &Embeddings,
        batch_size: usize,
    ) -> Result<AddSummary, RagError> {
        if chunks.len() != vectors.len() {
            return Err(RagError::ShapeMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }
        if batch_size == 0 {
            return Err(RagError::InvalidArgument(
                "batch size must be greater than zero".to_string(),
            ));
        }

        let total = chunks.len();
        let batches = total.div_ceil(batch_size);
        tracing::info!(
            collection = %self.backend.collection_name(),
            records = total,
            batch_size,
            "adding vectors"
        );

        let mut inserted = 0usize;
        for (index, (chunk_batch, start)) in chunks
            .chunks_mut(batch_size)
            .zip((0..total).step_by(batch_size))
            .enumerate()
        {
            let batch = chunk_batch
                .iter_mut()
                .enumerate()
                .map(|(offset, chunk)| IndexedRecord {
                    id: chunk.ensure_id(),
                    vector: vectors
                        .row(start + offset)
                        .map(<[f32]>::to_vec)
                        .unwrap_or_default(),
                    text: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                })
                .collect::<Vec<_>>();
            let size = batch.len();

            tracing::info!(batch = index + 1, batches, size, "inserting batch");
            self.backend
                .insert(batch)
                .map_err(|source| RagError::BatchFailed {
                    batch: index + 1,
                    batches,
                    inserted,
                    source: Box::new(source),
                })?;
            inserted += size;
        }

        tracing::info!(records = inserted, batches, "added all vectors");
        Ok(AddSummary {
            records: inserted,
            batches,
        })
    }

    /// Up to `top_k` stored chunks closest to `query_vector`, best first.
    pub fn query(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<RawHit>, RagError> {
        if top_k == 0 {
            return Err(RagError::InvalidArgument(
                "top_k must be greater than zero".to_string(),
            ));
        }
        self.backend.nearest(query_vector, top_k)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Metadata, ID_KEY};
    use crate::stores::MemoryCollection;
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;

    /// Memory backend that records every call made against it.
    #[derive(Default)]
    pub(crate) struct CountingBackend {
        pub inner: MemoryCollection,
        pub count_calls: Cell<usize>,
        pub nearest_calls: Cell<usize>,
        pub insert_sizes: RefCell<Vec<usize>>,
        pub fail_on_insert: Option<usize>,
    }

    impl CollectionBackend for CountingBackend {
        fn collection_name(&self) -> &str {
            "counting"
        }

        fn dimensions(&self) -> Option<usize> {
            self.inner.dimensions()
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn count_where(&self, key: &str, value: &MetadataValue) -> Result<usize, RagError> {
            self.count_calls.set(self.count_calls.get() + 1);
            self.inner.count_where(key, value)
        }

        fn insert(&mut self, batch: Vec<IndexedRecord>) -> Result<(), RagError> {
            let call = self.insert_sizes.borrow().len() + 1;
            self.insert_sizes.borrow_mut().push(batch.len());
            if self.fail_on_insert == Some(call) {
                return Err(RagError::StorageUnavailable("disk full".to_string()));
            }
            self.inner.insert(batch)
        }

        fn nearest(&self, vector: &[f32], top_k: usize) -> Result<Vec<RawHit>, RagError> {
            self.nearest_calls.set(self.nearest_calls.get() + 1);
            self.inner.nearest(vector, top_k)
        }
    }

    fn chunks(count: usize, source: &str) -> Vec<Chunk> {
        (0..count)
            .map(|index| Chunk::new(format!("chunk {index}"), source, "txt"))
            .collect()
    }

    fn unit_vectors(count: usize) -> Embeddings {
        let rows = (0..count)
            .map(|index| vec![1.0, index as f32 / count.max(1) as f32])
            .collect();
        match Embeddings::from_rows(2, rows) {
            Ok(embeddings) => embeddings,
            Err(error) => panic!("test vectors are well formed: {error}"),
        }
    }

    #[test]
    fn file_exists_short_circuits_empty_name() -> Result<(), RagError> {
        let index = VectorIndex::new(CountingBackend::default());
        assert!(!index.file_exists("")?);
        assert_eq!(index.backend().count_calls.get(), 0);
        Ok(())
    }

    #[test]
    fn file_exists_after_indexing() -> Result<(), RagError> {
        let mut index = VectorIndex::new(CountingBackend::default());
        let mut batch = chunks(4, "a.txt");
        index.add(&mut batch, &unit_vectors(4), 10)?;

        assert!(index.file_exists("a.txt")?);
        assert!(!index.file_exists("b.txt")?);
        assert_eq!(index.backend().count_calls.get(), 2);
        Ok(())
    }

    #[test]
    fn add_assigns_unique_ids_once() -> Result<(), RagError> {
        let mut index = VectorIndex::new(MemoryCollection::new("docs"));
        let mut batch = chunks(3, "a.txt");
        batch[1].metadata.insert(ID_KEY.to_string(), "kept".into());

        index.add(&mut batch, &unit_vectors(3), 2)?;

        let ids: Vec<String> = batch
            .iter()
            .filter_map(|chunk| chunk.id())
            .collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[1], "kept");
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 3);
        Ok(())
    }

    #[test]
    fn re_adding_same_chunks_overwrites() -> Result<(), RagError> {
        let mut index = VectorIndex::new(MemoryCollection::new("docs"));
        let mut batch = chunks(3, "a.txt");
        index.add(&mut batch, &unit_vectors(3), 5)?;
        let ids: Vec<Option<String>> = batch
            .iter()
            .map(|chunk| chunk.id())
            .collect();

        batch[0].text = "rewritten".to_string();
        index.add(&mut batch, &unit_vectors(3), 5)?;

        assert_eq!(index.len(), 3);
        let after: Vec<Option<String>> = batch
            .iter()
            .map(|chunk| chunk.id())
            .collect();
        assert_eq!(ids, after);
        let first_id = after[0].clone().unwrap_or_default();
        assert_eq!(
            index.backend().get(&first_id).map(|record| record.text.as_str()),
            Some("rewritten")
        );
        Ok(())
    }

    #[test]
    fn shape_mismatch_is_checked_before_any_write() {
        let mut index = VectorIndex::new(CountingBackend::default());
        let mut batch = chunks(3, "a.txt");
        let result = index.add(&mut batch, &unit_vectors(2), 1);

        assert!(matches!(
            result,
            Err(RagError::ShapeMismatch {
                chunks: 3,
                vectors: 2
            })
        ));
        assert!(index.backend().insert_sizes.borrow().is_empty());
        assert!(batch.iter().all(|chunk| chunk.id().is_none()));
    }

    #[test]
    fn batches_are_sequential_and_bounded() -> Result<(), RagError> {
        let mut index = VectorIndex::new(CountingBackend::default());
        let mut batch = chunks(12_000, "big.txt");
        let summary = index.add(&mut batch, &unit_vectors(12_000), DEFAULT_BATCH_SIZE)?;

        assert_eq!(*index.backend().insert_sizes.borrow(), vec![5_000, 5_000, 2_000]);
        assert_eq!(
            summary,
            AddSummary {
                records: 12_000,
                batches: 3
            }
        );
        assert_eq!(index.len(), 12_000);
        Ok(())
    }

    #[test]
    fn failed_batch_keeps_earlier_batches() -> Result<(), RagError> {
        let backend = CountingBackend {
            fail_on_insert: Some(2),
            ..CountingBackend::default()
        };
        let mut index = VectorIndex::new(backend);
        let mut batch = chunks(5, "a.txt");
        let result = index.add(&mut batch, &unit_vectors(5), 2);

        match result {
            Err(RagError::BatchFailed {
                batch,
                batches,
                inserted,
                ..
            }) => {
                assert_eq!((batch, batches, inserted), (2, 3, 2));
            }
            other => panic!("expected batch failure, got {other:?}"),
        }
        assert_eq!(index.len(), 2);
        assert_eq!(*index.backend().insert_sizes.borrow(), vec![2, 2]);

        // The partial write is visible: the file already counts as indexed.
        assert!(index.file_exists("a.txt")?);
        let vectors = unit_vectors(1);
        let query = vectors.row(0).unwrap_or_default();
        assert_eq!(index.query(query, 10)?.len(), 2);
        Ok(())
    }

    #[test]
    fn empty_add_issues_no_inserts() -> Result<(), RagError> {
        let mut index = VectorIndex::new(CountingBackend::default());
        let summary = index.add(&mut [], &Embeddings::empty(2), 10)?;
        assert_eq!(summary.batches, 0);
        assert!(index.backend().insert_sizes.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut index = VectorIndex::new(MemoryCollection::new("docs"));
        let mut batch = chunks(1, "a.txt");
        let result = index.add(&mut batch, &unit_vectors(1), 0);
        assert!(matches!(result, Err(RagError::InvalidArgument(_))));
    }

    #[test]
    fn query_orders_results_and_caps_at_top_k() -> Result<(), RagError> {
        let mut index = VectorIndex::new(MemoryCollection::new("docs"));
        let mut batch = vec![
            Chunk::with_metadata("east", Metadata::new()),
            Chunk::with_metadata("north", Metadata::new()),
            Chunk::with_metadata("north-east", Metadata::new()),
        ];
        let vectors = Embeddings::from_rows(
            2,
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
        )?;
        index.add(&mut batch, &vectors, 10)?;

        let hits = index.query(&[1.0, 0.2], 2)?;
        let texts: Vec<_> = hits.iter().map(|hit| hit.content.as_str()).collect();
        assert_eq!(texts, vec!["east", "north-east"]);

        assert!(matches!(
            index.query(&[1.0, 0.0], 0),
            Err(RagError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn query_on_empty_collection_is_empty() -> Result<(), RagError> {
        let index = VectorIndex::new(MemoryCollection::new("docs"));
        assert!(index.query(&[1.0, 0.0, 0.0], 4)?.is_empty());
        Ok(())
    }
}
