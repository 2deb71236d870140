use crate::error::RagError;
use std::fmt;
use std::hash::Hasher;
use std::path::PathBuf;
use std::str::FromStr;
use twox_hash::XxHash64;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;
pub const DEFAULT_MODEL_NAME: &str = "all-MiniLM-L6-v2";
const DEFAULT_NGRAM: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    Accelerated,
    #[default]
    Cpu,
}

impl FromStr for Device {
    type Err = RagError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "accelerated" | "gpu" | "cuda" | "metal" => Ok(Device::Accelerated),
            "cpu" => Ok(Device::Cpu),
            other => Err(RagError::InvalidArgument(format!(
                "unknown device '{other}', expected 'accelerated' or 'cpu'"
            ))),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Accelerated => f.write_str("accelerated"),
            Device::Cpu => f.write_str("cpu"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbedderOptions {
    pub model_name: String,
    pub model_dir: Option<PathBuf>,
    pub device: Device,
    pub dimensions: usize,
}

impl EmbedderOptions {
    pub fn on_device(&self, device: Device) -> Self {
        Self {
            device,
            ..self.clone()
        }
    }
}

impl Default for EmbedderOptions {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            model_dir: None,
            device: Device::Accelerated,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

/// Row-major batch of embeddings with shape `(len, dimensions)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    dimensions: usize,
    rows: usize,
    data: Vec<f32>,
}

impl Embeddings {
    pub fn empty(dimensions: usize) -> Self {
        Self {
            dimensions,
            rows: 0,
            data: Vec::new(),
        }
    }

    pub fn from_rows(dimensions: usize, rows: Vec<Vec<f32>>) -> Result<Self, RagError> {
        let count = rows.len();
        let mut data = Vec::with_capacity(count * dimensions);
        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != dimensions {
                return Err(RagError::GenerationFailed(format!(
                    "embedding row {index} has {} values, expected {dimensions}",
                    row.len()
                )));
            }
            data.extend(row);
        }

        Ok(Self {
            dimensions,
            rows: count,
            data,
        })
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.dimensions)
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.dimensions;
        Some(&self.data[start..start + self.dimensions])
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> + '_ {
        (0..self.rows).filter_map(move |index| self.row(index))
    }
}

pub trait Embedder {
    fn dimensions(&self) -> usize;

    /// Embeds `texts` in order. Empty input yields a `(0, dimensions)` batch.
    fn generate(&self, texts: &[String]) -> Result<Embeddings, RagError>;
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn generate(&self, texts: &[String]) -> Result<Embeddings, RagError> {
        (**self).generate(texts)
    }
}

/// Character n-gram feature hashing into a fixed number of buckets,
/// L2-normalised. CPU only.
///
/// This is a deterministic stand-in, not a semantic model: texts that share
/// spelling land close together, paraphrases do not. It is opt-in only, for
/// tests and for `--embedder ngram` when no model files are at hand.
#[derive(Debug, Clone, Copy)]
pub struct NgramHashEmbedder {
    dimensions: usize,
    ngram: usize,
}

impl Default for NgramHashEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            ngram: DEFAULT_NGRAM,
        }
    }
}

impl NgramHashEmbedder {
    pub fn new(dimensions: usize) -> Result<Self, RagError> {
        if dimensions == 0 {
            return Err(RagError::ModelUnavailable(
                "ngram embedder needs at least one dimension".to_string(),
            ));
        }
        Ok(Self {
            dimensions,
            ngram: DEFAULT_NGRAM,
        })
    }

    pub fn load(options: &EmbedderOptions) -> Result<Self, RagError> {
        if options.device == Device::Accelerated {
            return Err(RagError::ModelUnavailable(
                "ngram embedder has no accelerated backend".to_string(),
            ));
        }
        let embedder = Self::new(options.dimensions)?;
        tracing::info!(dimensions = embedder.dimensions, "ngram embedder ready");
        Ok(embedder)
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        if chars.is_empty() {
            return vector;
        }

        let width = self.ngram.min(chars.len());
        for window in chars.windows(width) {
            let mut hasher = XxHash64::with_seed(0);
            for ch in window {
                hasher.write_u32(u32::from(*ch));
            }
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Embedder for NgramHashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn generate(&self, texts: &[String]) -> Result<Embeddings, RagError> {
        if texts.is_empty() {
            return Ok(Embeddings::empty(self.dimensions));
        }

        let rows = texts.iter().map(|text| self.embed_one(text)).collect();
        let embeddings = Embeddings::from_rows(self.dimensions, rows)?;
        tracing::debug!(shape = ?embeddings.shape(), "generated embeddings");
        Ok(embeddings)
    }
}
