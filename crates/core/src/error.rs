use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::XlsxError),

    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("shape mismatch: {chunks} chunks but {vectors} vectors")]
    ShapeMismatch { chunks: usize, vectors: usize },

    #[error("vector dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("insert of batch {batch}/{batches} failed after {inserted} records: {source}")]
    BatchFailed {
        batch: usize,
        batches: usize,
        inserted: usize,
        #[source]
        source: Box<RagError>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl RagError {
    /// Errors that signal a broken model or store rather than an unanswerable
    /// query. These must reach the caller instead of degrading to "no hits".
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            RagError::GenerationFailed(_)
                | RagError::StorageUnavailable(_)
                | RagError::BatchFailed { .. }
        )
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
