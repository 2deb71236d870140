use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const ID_KEY: &str = "id";
pub const SOURCE_FILE_KEY: &str = "source_file";
pub const FILE_TYPE_KEY: &str = "file_type";

/// Scalar metadata value. Serialized untagged so stored metadata reads as
/// plain JSON (`{"page": 3, "source_file": "a.pdf"}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(value) => write!(f, "{value}"),
            MetadataValue::Int(value) => write!(f, "{value}"),
            MetadataValue::Float(value) => write!(f, "{value}"),
            MetadataValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

fn text_value<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(MetadataValue::as_str)
}

/// Loaded source text before splitting: one page, row, sheet or whole file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(
        text: impl Into<String>,
        source_file: impl Into<String>,
        file_type: impl Into<String>,
    ) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_FILE_KEY.to_string(), source_file.into().into());
        metadata.insert(FILE_TYPE_KEY.to_string(), file_type.into().into());
        Self {
            text: text.into(),
            metadata,
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn source_file(&self) -> Option<&str> {
        text_value(&self.metadata, SOURCE_FILE_KEY)
    }
}

/// Unit of embedding and retrieval. Metadata always carries `source_file`
/// and `file_type`; `id` is filled in on first indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(
        text: impl Into<String>,
        source_file: impl Into<String>,
        file_type: impl Into<String>,
    ) -> Self {
        let Document { text, metadata } = Document::new(text, source_file, file_type);
        Self { text, metadata }
    }

    pub fn with_metadata(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// The id this chunk is indexed under. Non-text scalar ids are used in
    /// their display form; an empty text id counts as missing.
    pub fn id(&self) -> Option<String> {
        match self.metadata.get(ID_KEY)? {
            MetadataValue::Text(id) if id.is_empty() => None,
            value => Some(value.to_string()),
        }
    }

    pub fn source_file(&self) -> Option<&str> {
        text_value(&self.metadata, SOURCE_FILE_KEY)
    }

    pub fn file_type(&self) -> Option<&str> {
        text_value(&self.metadata, FILE_TYPE_KEY)
    }

    /// Returns [`Chunk::id`], generating and storing a UUID v4 when missing.
    pub fn ensure_id(&mut self) -> String {
        match self.id() {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                self.metadata
                    .insert(ID_KEY.to_string(), MetadataValue::Text(id.clone()));
                id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

/// Row returned by a collection query, best match first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHit {
    pub content: String,
    pub metadata: Metadata,
    pub distance: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub content: String,
    pub metadata: Metadata,
    pub score: Option<f32>,
    pub rank: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub persist_dir: PathBuf,
    pub collection_name: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub top_k: usize,
    pub answer_max_length: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            persist_dir: PathBuf::from("data").join("vector_store"),
            collection_name: "documents".to_string(),
            chunk_size: 1_000,
            chunk_overlap: 200,
            batch_size: 5_000,
            top_k: 5,
            answer_max_length: 512,
        }
    }
}
