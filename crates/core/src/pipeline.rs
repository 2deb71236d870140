use crate::chunking::{ChunkingConfig, RecursiveCharacterSplitter};
use crate::embeddings::{Device, Embedder, EmbedderOptions};
use crate::error::RagError;
use crate::ingest::{load_folder_best_effort, LoadReport};
use crate::models::{Chunk, Document, PipelineOptions, RetrievalHit};
use crate::retriever::{context_from_hits, Retriever};
use crate::store::VectorIndex;
use crate::traits::{AnswerComposer, CollectionBackend, TextSplitter};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

pub const NO_DOCUMENTS_MESSAGE: &str = "No relevant documents found.";

/// Loads an embedder on the requested device and retries once on the CPU
/// when the accelerated device is unavailable.
pub fn load_embedder_with_fallback<E, F>(options: &EmbedderOptions, load: F) -> Result<E, RagError>
where
    F: Fn(&EmbedderOptions) -> Result<E, RagError>,
{
    match load(options) {
        Ok(embedder) => Ok(embedder),
        Err(RagError::ModelUnavailable(reason)) if options.device == Device::Accelerated => {
            tracing::warn!(%reason, "accelerated embedder unavailable, falling back to cpu");
            load(&options.on_device(Device::Cpu))
        }
        Err(error) => Err(error),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexingReport {
    pub documents: usize,
    pub chunks: usize,
    pub already_indexed: Vec<String>,
    pub records: usize,
    pub batches: usize,
}

/// Splits `documents`, drops chunks whose source file is already in the
/// index, embeds the rest and adds them in batches.
pub fn index_documents<S, E, B>(
    documents: &[Document],
    splitter: &S,
    embedder: &E,
    index: &mut VectorIndex<B>,
    batch_size: usize,
) -> Result<IndexingReport, RagError>
where
    S: TextSplitter + ?Sized,
    E: Embedder + ?Sized,
    B: CollectionBackend,
{
    let chunks = splitter.split(documents);
    let mut report = IndexingReport {
        documents: documents.len(),
        chunks: chunks.len(),
        ..IndexingReport::default()
    };

    let mut known: HashMap<String, bool> = HashMap::new();
    let mut already_indexed = BTreeSet::new();
    let mut fresh: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let source = chunk.source_file().unwrap_or_default().to_string();
        let exists = match known.get(&source) {
            Some(exists) => *exists,
            None => {
                let exists = index.file_exists(&source)?;
                known.insert(source.clone(), exists);
                exists
            }
        };

        if exists {
            already_indexed.insert(source);
        } else {
            fresh.push(chunk);
        }
    }
    report.already_indexed = already_indexed.into_iter().collect();

    for source in &report.already_indexed {
        tracing::info!(source_file = %source, "already indexed, skipping");
    }
    if fresh.is_empty() {
        tracing::info!("nothing new to index");
        return Ok(report);
    }

    let texts: Vec<String> = fresh.iter().map(|chunk| chunk.text.clone()).collect();
    let vectors = embedder.generate(&texts)?;
    tracing::debug!(shape = ?vectors.shape(), "embedded chunks");

    let summary = index.add(&mut fresh, &vectors, batch_size)?;
    report.records = summary.records;
    report.batches = summary.batches;
    Ok(report)
}

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub load: LoadReport,
    pub indexing: IndexingReport,
}

/// Best-effort load of `folder` followed by [`index_documents`] with the
/// chunking and batch settings from `options`.
pub fn ingest_folder<E, B>(
    folder: &Path,
    options: &PipelineOptions,
    embedder: &E,
    index: &mut VectorIndex<B>,
) -> Result<IngestSummary, RagError>
where
    E: Embedder + ?Sized,
    B: CollectionBackend,
{
    let config = ChunkingConfig::new(options.chunk_size, options.chunk_overlap)?;
    let splitter = RecursiveCharacterSplitter::new(config);
    let load = load_folder_best_effort(folder);
    let indexing = index_documents(
        &load.documents,
        &splitter,
        embedder,
        index,
        options.batch_size,
    )?;

    tracing::info!(
        folder = %folder.display(),
        documents = indexing.documents,
        chunks = indexing.chunks,
        records = indexing.records,
        skipped_files = load.skipped.len(),
        "ingestion finished"
    );
    Ok(IngestSummary { load, indexing })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    /// Text produced by the language model from the retrieved context.
    Generated {
        answer: String,
        hits: Vec<RetrievalHit>,
    },
    /// No language model available, so the retrieved context itself.
    Context {
        context: String,
        hits: Vec<RetrievalHit>,
    },
    NoDocuments,
}

impl Answer {
    pub fn text(&self) -> &str {
        match self {
            Answer::Generated { answer, .. } => answer,
            Answer::Context { context, .. } => context,
            Answer::NoDocuments => NO_DOCUMENTS_MESSAGE,
        }
    }

    pub fn hits(&self) -> &[RetrievalHit] {
        match self {
            Answer::Generated { hits, .. } | Answer::Context { hits, .. } => hits,
            Answer::NoDocuments => &[],
        }
    }
}

/// Retrieves context for `query` and asks `composer` for an answer. Without a
/// composer, or when generation fails, the context is returned as is.
pub fn answer<E, B>(
    retriever: &Retriever<'_, E, B>,
    composer: Option<&dyn AnswerComposer>,
    query: &str,
    top_k: usize,
    max_length: usize,
) -> Result<Answer, RagError>
where
    E: Embedder + ?Sized,
    B: CollectionBackend,
{
    let hits = retriever.retrieve(query, top_k)?;
    if hits.is_empty() {
        return Ok(Answer::NoDocuments);
    }

    let context = context_from_hits(&hits);
    let Some(composer) = composer else {
        return Ok(Answer::Context { context, hits });
    };

    match composer.generate(query, &context, max_length) {
        Ok(answer) => Ok(Answer::Generated { answer, hits }),
        Err(error) => {
            tracing::warn!(%error, "answer generation failed, returning context");
            Ok(Answer::Context { context, hits })
        }
    }
}
