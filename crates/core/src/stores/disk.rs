use crate::error::RagError;
use crate::models::{IndexedRecord, MetadataValue, RawHit};
use crate::stores::{DistanceMetric, MemoryCollection};
use crate::traits::CollectionBackend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "collection.json";
const RECORDS_FILE: &str = "records.jsonl";
const FORMAT_VERSION: u32 = 1;
/// Rewrite the log on open once it holds this many lines per live record.
const COMPACTION_RATIO: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    pub metric: DistanceMetric,
    pub dimensions: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub format_version: u32,
}

/// Collection persisted under `persist_dir/<name>/`.
///
/// `collection.json` holds the configuration and is replaced atomically.
/// `records.jsonl` is an append-only log with one record per line; every
/// inserted batch is appended with a single write and synced before it
/// becomes visible. Reopening replays the log, later lines replacing earlier
/// ones with the same id. When overwrites leave more than
/// `COMPACTION_RATIO` lines per live record, open rewrites the log with only
/// the live records, through a temp file and rename.
///
/// There is no cross-process locking. Only one process may write to a
/// collection at a time; coordinating writers is up to the caller.
#[derive(Debug)]
pub struct DiskCollection {
    directory: PathBuf,
    config: CollectionConfig,
    state: MemoryCollection,
}

impl DiskCollection {
    pub fn open(persist_dir: impl AsRef<Path>, collection_name: &str) -> Result<Self, RagError> {
        validate_collection_name(collection_name)?;

        let persist_dir = persist_dir.as_ref();
        fs::create_dir_all(persist_dir).map_err(|error| storage_error(persist_dir, error))?;
        let directory = persist_dir.join(collection_name);
        fs::create_dir_all(&directory).map_err(|error| storage_error(&directory, error))?;

        let config_path = directory.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            read_config(&config_path, collection_name)?
        } else {
            let config = CollectionConfig {
                name: collection_name.to_string(),
                metric: DistanceMetric::Cosine,
                dimensions: None,
                created_at: Utc::now(),
                format_version: FORMAT_VERSION,
            };
            write_config(&config_path, &config)?;
            config
        };

        let log_path = directory.join(RECORDS_FILE);
        let (state, log_lines) = replay_log(&log_path, &config)?;
        if log_lines > COMPACTION_RATIO * state.len() {
            compact_log(&log_path, state.records())?;
            tracing::info!(
                collection = %config.name,
                log_lines,
                records = state.len(),
                "compacted record log"
            );
        }
        if state.dimensions() != config.dimensions {
            config.dimensions = state.dimensions();
            write_config(&config_path, &config)?;
        }

        tracing::info!(
            collection = %config.name,
            directory = %directory.display(),
            records = state.len(),
            "opened collection"
        );

        Ok(Self {
            directory,
            config,
            state,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn records(&self) -> &[IndexedRecord] {
        self.state.records()
    }

    pub fn get(&self, id: &str) -> Option<&IndexedRecord> {
        self.state.get(id)
    }

    fn log_path(&self) -> PathBuf {
        self.directory.join(RECORDS_FILE)
    }
}

impl CollectionBackend for DiskCollection {
    fn collection_name(&self) -> &str {
        &self.config.name
    }

    fn dimensions(&self) -> Option<usize> {
        self.state.dimensions()
    }

    fn len(&self) -> usize {
        self.state.len()
    }

    fn count_where(&self, key: &str, value: &MetadataValue) -> Result<usize, RagError> {
        self.state.count_where(key, value)
    }

    fn insert(&mut self, batch: Vec<IndexedRecord>) -> Result<(), RagError> {
        if batch.is_empty() {
            return Ok(());
        }

        let dimensions = self.state.check_batch(&batch)?;

        let mut buffer = Vec::new();
        for record in &batch {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }

        let path = self.log_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|error| storage_error(&path, error))?;
        file.write_all(&buffer)
            .and_then(|()| file.sync_data())
            .map_err(|error| storage_error(&path, error))?;

        self.state.apply(batch);

        // The dimension is only recorded once a batch is durably in the log.
        if self.config.dimensions.is_none() && dimensions.is_some() {
            self.config.dimensions = dimensions;
            write_config(&self.directory.join(CONFIG_FILE), &self.config)?;
        }
        Ok(())
    }

    fn nearest(&self, vector: &[f32], top_k: usize) -> Result<Vec<RawHit>, RagError> {
        self.state.nearest(vector, top_k)
    }
}

fn validate_collection_name(name: &str) -> Result<(), RagError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(RagError::InvalidArgument(format!(
            "invalid collection name '{name}'"
        )))
    }
}

fn storage_error(path: &Path, error: io::Error) -> RagError {
    RagError::StorageUnavailable(format!("{}: {error}", path.display()))
}

fn read_config(path: &Path, expected_name: &str) -> Result<CollectionConfig, RagError> {
    let bytes = fs::read(path).map_err(|error| storage_error(path, error))?;
    let config: CollectionConfig = serde_json::from_slice(&bytes).map_err(|error| {
        RagError::StorageUnavailable(format!(
            "unreadable collection config {}: {error}",
            path.display()
        ))
    })?;

    if config.name != expected_name {
        return Err(RagError::StorageUnavailable(format!(
            "collection config {} names '{}', expected '{expected_name}'",
            path.display(),
            config.name
        )));
    }
    if config.format_version != FORMAT_VERSION {
        return Err(RagError::StorageUnavailable(format!(
            "collection format version {} is not supported",
            config.format_version
        )));
    }

    Ok(config)
}

fn write_config(path: &Path, config: &CollectionConfig) -> Result<(), RagError> {
    let bytes = serde_json::to_vec_pretty(config)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, bytes).map_err(|error| storage_error(&tmp_path, error))?;
    fs::rename(&tmp_path, path).map_err(|error| storage_error(path, error))
}

/// Rebuilds the collection from the log. Also returns how many record lines
/// the log held, overwritten ones included.
fn replay_log(
    path: &Path,
    config: &CollectionConfig,
) -> Result<(MemoryCollection, usize), RagError> {
    let mut state = MemoryCollection::with_dimensions(config.name.clone(), config.dimensions);
    let mut record_lines = 0usize;

    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok((state, 0)),
        Err(error) => return Err(storage_error(path, error)),
    };

    let mut offset = 0usize;
    let mut line_number = 0usize;
    while offset < raw.len() {
        line_number += 1;
        let (line, next, terminated) = match raw[offset..].iter().position(|byte| *byte == b'\n') {
            Some(end) => (&raw[offset..offset + end], offset + end + 1, true),
            None => (&raw[offset..], raw.len(), false),
        };

        if line.iter().all(u8::is_ascii_whitespace) {
            offset = next;
            continue;
        }

        match serde_json::from_slice::<IndexedRecord>(line) {
            Ok(record) => {
                state.insert(vec![record]).map_err(|error| {
                    RagError::StorageUnavailable(format!(
                        "{} line {line_number}: {error}",
                        path.display()
                    ))
                })?;
                record_lines += 1;
                if !terminated {
                    append_newline(path)?;
                }
            }
            Err(error) if !terminated => {
                tracing::warn!(
                    path = %path.display(),
                    line = line_number,
                    %error,
                    "dropping torn record at end of log"
                );
                truncate_log(path, offset)?;
            }
            Err(error) => {
                return Err(RagError::StorageUnavailable(format!(
                    "corrupt record in {} line {line_number}: {error}",
                    path.display()
                )));
            }
        }

        offset = next;
    }

    Ok((state, record_lines))
}

fn compact_log(path: &Path, records: &[IndexedRecord]) -> Result<(), RagError> {
    let mut buffer = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buffer, record)?;
        buffer.push(b'\n');
    }

    let tmp_path = path.with_extension("jsonl.tmp");
    let mut file = fs::File::create(&tmp_path).map_err(|error| storage_error(&tmp_path, error))?;
    file.write_all(&buffer)
        .and_then(|()| file.sync_data())
        .map_err(|error| storage_error(&tmp_path, error))?;
    fs::rename(&tmp_path, path).map_err(|error| storage_error(path, error))
}

fn truncate_log(path: &Path, length: usize) -> Result<(), RagError> {
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_len(length as u64))
        .map_err(|error| storage_error(path, error))
}

fn append_newline(path: &Path) -> Result<(), RagError> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(b"\n"))
        .map_err(|error| storage_error(path, error))
}
