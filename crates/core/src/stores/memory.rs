use crate::error::RagError;
use crate::models::{IndexedRecord, MetadataValue, RawHit};
use crate::stores::cosine_distance;
use crate::traits::CollectionBackend;
use std::cmp::Ordering;
use std::collections::HashMap;

/// In-process collection. Also the live state of [`crate::DiskCollection`].
#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    name: String,
    dimensions: Option<usize>,
    records: Vec<IndexedRecord>,
    positions: HashMap<String, usize>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn with_dimensions(name: impl Into<String>, dimensions: Option<usize>) -> Self {
        Self {
            name: name.into(),
            dimensions,
            ..Self::default()
        }
    }

    pub fn get(&self, id: &str) -> Option<&IndexedRecord> {
        self.positions.get(id).map(|position| &self.records[*position])
    }

    pub fn records(&self) -> &[IndexedRecord] {
        &self.records
    }

    /// Dimension check for a batch without touching the stored records.
    pub(crate) fn check_batch(&self, batch: &[IndexedRecord]) -> Result<Option<usize>, RagError> {
        let mut expected = self.dimensions;
        for record in batch {
            match expected {
                Some(dimensions) if dimensions != record.vector.len() => {
                    return Err(RagError::DimensionMismatch {
                        expected: dimensions,
                        actual: record.vector.len(),
                    });
                }
                Some(_) => {}
                None if record.vector.is_empty() => {
                    return Err(RagError::InvalidArgument(format!(
                        "record {} has an empty vector",
                        record.id
                    )));
                }
                None => expected = Some(record.vector.len()),
            }
        }
        Ok(expected)
    }

    pub(crate) fn apply(&mut self, batch: Vec<IndexedRecord>) {
        for record in batch {
            if self.dimensions.is_none() {
                self.dimensions = Some(record.vector.len());
            }
            match self.positions.get(&record.id).copied() {
                Some(position) => self.records[position] = record,
                None => {
                    self.positions.insert(record.id.clone(), self.records.len());
                    self.records.push(record);
                }
            }
        }
    }
}

impl CollectionBackend for MemoryCollection {
    fn collection_name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn count_where(&self, key: &str, value: &MetadataValue) -> Result<usize, RagError> {
        Ok(self
            .records
            .iter()
            .filter(|record| record.metadata.get(key) == Some(value))
            .count())
    }

    fn insert(&mut self, batch: Vec<IndexedRecord>) -> Result<(), RagError> {
        self.check_batch(&batch)?;
        self.apply(batch);
        Ok(())
    }

    fn nearest(&self, vector: &[f32], top_k: usize) -> Result<Vec<RawHit>, RagError> {
        if self.records.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        if let Some(dimensions) = self.dimensions {
            if dimensions != vector.len() {
                return Err(RagError::DimensionMismatch {
                    expected: dimensions,
                    actual: vector.len(),
                });
            }
        }

        let mut scored: Vec<(Option<f32>, &IndexedRecord)> = self
            .records
            .iter()
            .map(|record| (cosine_distance(vector, &record.vector), record))
            .collect();

        // Stable sort keeps insertion order among equal distances; undefined
        // distances go last.
        scored.sort_by(|(left, _), (right, _)| match (left, right) {
            (Some(left), Some(right)) => left.total_cmp(right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(distance, record)| RawHit {
                content: record.text.clone(),
                metadata: record.metadata.clone(),
                distance,
            })
            .collect())
    }
}
