pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod retriever;
pub mod store;
pub mod stores;
pub mod traits;
#[cfg(feature = "candle")]
pub mod transformer;

pub use chunking::{ChunkingConfig, RecursiveCharacterSplitter};
pub use embeddings::{
    Device, Embedder, EmbedderOptions, Embeddings, NgramHashEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_MODEL_NAME,
};
pub use error::{IngestError, RagError};
pub use extractor::{load_file, FileType};
pub use ingest::{discover_files, load_folder_best_effort, LoadReport, SkippedFile};
pub use llm::{HttpAnswerComposer, DEFAULT_LLM_MODEL, DEFAULT_LLM_URL};
pub use models::{
    Chunk, Document, IndexedRecord, Metadata, MetadataValue, PipelineOptions, RawHit,
    RetrievalHit,
};
pub use pipeline::{
    answer, index_documents, ingest_folder, load_embedder_with_fallback, Answer, IndexingReport,
    IngestSummary, NO_DOCUMENTS_MESSAGE,
};
pub use retriever::{context_from_hits, Retriever};
pub use store::{AddSummary, VectorIndex, DEFAULT_BATCH_SIZE};
pub use stores::{CollectionConfig, DiskCollection, DistanceMetric, MemoryCollection};
pub use traits::{AnswerComposer, CollectionBackend, TextSplitter};
#[cfg(feature = "candle")]
pub use transformer::SentenceEmbedder;
