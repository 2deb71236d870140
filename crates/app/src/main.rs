use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use intellirag_core::{
    answer, ingest_folder, load_embedder_with_fallback, Answer, AnswerComposer, Device,
    DiskCollection, Embedder, EmbedderOptions, HttpAnswerComposer, NgramHashEmbedder,
    PipelineOptions, Retriever, VectorIndex, DEFAULT_LLM_MODEL, DEFAULT_LLM_URL,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "intellirag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persisted collections.
    #[arg(
        long,
        global = true,
        env = "INTELLIRAG_PERSIST_DIR",
        default_value = "data/vector_store"
    )]
    persist_dir: PathBuf,

    /// Collection to read from and write to.
    #[arg(long, global = true, env = "INTELLIRAG_COLLECTION", default_value = "documents")]
    collection: String,

    /// Preferred embedding device; falls back to cpu when unavailable.
    #[arg(long, global = true, env = "INTELLIRAG_DEVICE", default_value = "accelerated")]
    device: Device,

    #[arg(
        long,
        global = true,
        env = "INTELLIRAG_EMBEDDER",
        value_enum,
        default_value_t = EmbedderKind::Sentence
    )]
    embedder: EmbedderKind,

    /// Directory with config.json, tokenizer.json and model.safetensors.
    #[arg(long, global = true, env = "INTELLIRAG_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Base URL of an Ollama-compatible server.
    #[arg(long, global = true, env = "INTELLIRAG_LLM_URL", default_value = DEFAULT_LLM_URL)]
    llm_url: String,

    #[arg(long, global = true, env = "INTELLIRAG_LLM_MODEL", default_value = DEFAULT_LLM_MODEL)]
    llm_model: String,

    /// Answer with retrieved context only.
    #[arg(long, global = true, env = "INTELLIRAG_NO_LLM", default_value_t = false)]
    no_llm: bool,

    #[arg(
        long,
        global = true,
        env = "INTELLIRAG_CHUNK_SIZE",
        default_value_t = PipelineOptions::default().chunk_size
    )]
    chunk_size: usize,

    #[arg(
        long,
        global = true,
        env = "INTELLIRAG_CHUNK_OVERLAP",
        default_value_t = PipelineOptions::default().chunk_overlap
    )]
    chunk_overlap: usize,

    #[arg(
        long,
        global = true,
        env = "INTELLIRAG_BATCH_SIZE",
        default_value_t = PipelineOptions::default().batch_size
    )]
    batch_size: usize,

    /// Number of chunks retrieved per question.
    #[arg(
        long,
        global = true,
        env = "INTELLIRAG_TOP_K",
        default_value_t = PipelineOptions::default().top_k
    )]
    top_k: usize,

    /// Token budget for generated answers.
    #[arg(
        long,
        global = true,
        env = "INTELLIRAG_ANSWER_MAX_LENGTH",
        default_value_t = PipelineOptions::default().answer_max_length
    )]
    answer_max_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    /// BERT sentence encoder loaded from `--model-dir`.
    Sentence,
    /// Character trigram hashing. A deterministic stand-in with no semantic
    /// understanding; only used when asked for explicitly.
    Ngram,
}

#[derive(Subcommand)]
enum Command {
    /// Load a folder, skip files already indexed and index the rest.
    Ingest {
        /// Folder searched recursively for pdf, docx, txt, csv and xlsx files.
        #[arg(long)]
        data_dir: PathBuf,
    },
    /// Answer one question from the indexed documents.
    Ask {
        #[arg(long)]
        query: String,
        /// Print the answer and hits as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Ask questions interactively until `exit` or `quit`.
    Chat,
    /// Show what the collection holds.
    Status,
}

impl Cli {
    fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            persist_dir: self.persist_dir.clone(),
            collection_name: self.collection.clone(),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            batch_size: self.batch_size,
            top_k: self.top_k,
            answer_max_length: self.answer_max_length,
        }
    }

    fn embedder_options(&self) -> EmbedderOptions {
        EmbedderOptions {
            model_dir: self.model_dir.clone(),
            device: self.device,
            ..EmbedderOptions::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "intellirag boot"
    );

    let options = cli.pipeline_options();
    let mut index = VectorIndex::open(&options.persist_dir, &options.collection_name)
        .with_context(|| format!("opening collection {}", options.collection_name))?;

    match &cli.command {
        Command::Status => {
            println!("collection: {}", index.collection_name());
            println!("location: {}", index.backend().directory().display());
            println!("records: {}", index.len());
            match index.dimensions() {
                Some(dimensions) => println!("dimensions: {dimensions}"),
                None => println!("dimensions: unset (empty collection)"),
            }
        }
        Command::Ingest { data_dir } => {
            let embedder = load_embedder(&cli, &index)?;
            let summary = ingest_folder(data_dir, &options, embedder.as_ref(), &mut index)?;

            for skipped in &summary.load.skipped {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
                println!("skipped: {} ({})", skipped.path.display(), skipped.reason);
            }
            for source in &summary.indexing.already_indexed {
                println!("already indexed: {source}");
            }
            println!(
                "{} files loaded, {} documents, {} chunks, {} records added in {} batches at {}",
                summary.load.files_loaded,
                summary.indexing.documents,
                summary.indexing.chunks,
                summary.indexing.records,
                summary.indexing.batches,
                Utc::now().to_rfc3339()
            );
        }
        Command::Ask { query, json } => {
            let embedder = load_embedder(&cli, &index)?;
            let composer = connect_composer(&cli, false);
            let retriever = Retriever::new(embedder.as_ref(), &index);
            let result = answer(
                &retriever,
                composer.as_ref().map(|composer| composer as &dyn AnswerComposer),
                query,
                options.top_k,
                options.answer_max_length,
            )?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_answer(&result);
            }
        }
        Command::Chat => {
            let embedder = load_embedder(&cli, &index)?;
            let composer = connect_composer(&cli, true);
            let retriever = Retriever::new(embedder.as_ref(), &index);

            let stdin = io::stdin();
            let mut stdout = io::stdout();
            loop {
                print!("\nAsk a question (or 'exit' to quit): ");
                stdout.flush()?;

                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break;
                }
                let query = line.trim();
                if query.eq_ignore_ascii_case("exit") || query.eq_ignore_ascii_case("quit") {
                    break;
                }
                if query.is_empty() {
                    continue;
                }

                let result = answer(
                    &retriever,
                    composer.as_ref().map(|composer| composer as &dyn AnswerComposer),
                    query,
                    options.top_k,
                    options.answer_max_length,
                )?;
                print_answer(&result);
            }
        }
    }

    Ok(())
}

fn load_embedder(
    cli: &Cli,
    index: &VectorIndex<DiskCollection>,
) -> anyhow::Result<Box<dyn Embedder>> {
    let options = cli.embedder_options();
    let embedder: Box<dyn Embedder> = match cli.embedder {
        EmbedderKind::Ngram => Box::new(load_embedder_with_fallback(
            &options,
            NgramHashEmbedder::load,
        )?),
        EmbedderKind::Sentence => load_sentence_embedder(&options)?,
    };

    if let Some(stored) = index.dimensions() {
        if stored != embedder.dimensions() {
            bail!(
                "collection {} holds {stored}-dimensional vectors but the embedder produces {}",
                index.collection_name(),
                embedder.dimensions()
            );
        }
    }
    Ok(embedder)
}

#[cfg(feature = "candle")]
fn load_sentence_embedder(options: &EmbedderOptions) -> anyhow::Result<Box<dyn Embedder>> {
    Ok(Box::new(load_embedder_with_fallback(
        options,
        intellirag_core::SentenceEmbedder::load,
    )?))
}

#[cfg(not(feature = "candle"))]
fn load_sentence_embedder(_options: &EmbedderOptions) -> anyhow::Result<Box<dyn Embedder>> {
    bail!(
        "this build has no sentence embedder; \
         rebuild with the default `candle` feature or pass `--embedder ngram`"
    )
}

fn connect_composer(cli: &Cli, instructed: bool) -> Option<HttpAnswerComposer> {
    if cli.no_llm {
        return None;
    }
    match HttpAnswerComposer::connect(&cli.llm_url, cli.llm_model.clone()) {
        Ok(composer) => Some(composer.with_instruction(instructed)),
        Err(error) => {
            warn!(%error, url = %cli.llm_url, "language model unavailable, answering with context");
            None
        }
    }
}

fn print_answer(result: &Answer) {
    match result {
        Answer::Generated { .. } => println!("\nAnswer:\n{}", result.text()),
        Answer::Context { .. } => println!("\nRetrieved context:\n{}", result.text()),
        Answer::NoDocuments => println!("\n{}", result.text()),
    }

    for hit in result.hits() {
        let source = hit
            .metadata
            .get("source_file")
            .map(ToString::to_string)
            .unwrap_or_default();
        match hit.score {
            Some(score) => println!("  [{}] score={score:.4} source={source}", hit.rank),
            None => println!("  [{}] score=n/a source={source}", hit.rank),
        }
    }
}
