//! On-disk form of an [`EmbeddingIndex`] and its atomic publication.
//!
//! Layout under a destination directory:
//!
//! ```text
//! <dest>/CURRENT                      name of the published generation
//! <dest>/gen-<seq>/manifest.json
//! <dest>/gen-<seq>/vectors.bin        bincode Vec<Vec<f32>>, build order
//! <dest>/gen-<seq>/metadata.jsonl     one Entry per line, same order
//! ```
//!
//! A generation directory is written and synced completely before `CURRENT`
//! is replaced by renaming a temp file over it. Readers only ever follow
//! `CURRENT`, so they see either the previous generation or the new one.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use journal_core::entry::Entry;
use journal_core::error::{JournalError, Result};

use crate::index::EmbeddingIndex;

const FORMAT_VERSION: u32 = 1;
const CURRENT_FILE: &str = "CURRENT";
const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.jsonl";
const GENERATION_PREFIX: &str = "gen-";

/// Generations kept after a publish when the caller does not say otherwise.
pub const DEFAULT_RETAIN_GENERATIONS: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    dimension: Option<usize>,
    count: usize,
    built_at: DateTime<Utc>,
}

/// A loaded index plus what was dropped on the way in.
#[derive(Debug)]
pub struct IndexLoad {
    pub index: EmbeddingIndex,
    /// Aligned `(vector, entry)` pairs dropped because one side was malformed.
    pub skipped: usize,
    /// Generation directory the index was read from.
    pub generation: String,
}

fn unavailable(path: &Path, e: impl std::fmt::Display) -> JournalError {
    JournalError::IndexUnavailable(format!("{}: {}", path.display(), e))
}

impl EmbeddingIndex {
    /// Publish this index under `destination`, keeping the default number of
    /// older generations.
    pub fn persist(&self, destination: &Path) -> Result<PathBuf> {
        self.persist_with_retention(destination, DEFAULT_RETAIN_GENERATIONS)
    }

    /// Publish this index under `destination` and prune all but the newest
    /// `retain` generations (the new one included). Returns the generation path.
    pub fn persist_with_retention(&self, destination: &Path, retain: usize) -> Result<PathBuf> {
        fs::create_dir_all(destination)?;

        let sequence = list_generations(destination)?
            .iter()
            .filter_map(|name| generation_sequence(name))
            .max()
            .unwrap_or(0)
            + 1;
        let generation = format!("{}{:010}", GENERATION_PREFIX, sequence);
        let gen_dir = destination.join(&generation);
        // create_dir fails if another builder claimed the same sequence.
        fs::create_dir(&gen_dir)?;

        write_vectors(&gen_dir.join(VECTORS_FILE), self.vectors())?;
        write_metadata(&gen_dir.join(METADATA_FILE), self.entries())?;

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            dimension: self.dimension(),
            count: self.len(),
            built_at: Utc::now(),
        };
        let manifest_file = File::create(gen_dir.join(MANIFEST_FILE))?;
        serde_json::to_writer_pretty(&manifest_file, &manifest)?;
        manifest_file.sync_all()?;
        sync_dir(&gen_dir);

        // Swap the pointer only once the generation is complete on disk.
        let mut pointer = NamedTempFile::new_in(destination)?;
        pointer.write_all(generation.as_bytes())?;
        pointer.as_file().sync_all()?;
        pointer
            .persist(destination.join(CURRENT_FILE))
            .map_err(|e| JournalError::Io(e.error))?;
        sync_dir(destination);

        info!(
            path = %gen_dir.display(),
            entries = self.len(),
            "Published embedding index"
        );

        prune_generations(destination, &generation, retain.max(1));
        Ok(gen_dir)
    }

    /// Load the generation currently published under `source`.
    ///
    /// Missing or unreadable files are `IndexUnavailable`. Sequences whose
    /// lengths disagree are a configuration error. A metadata line that does
    /// not parse, or a vector of the wrong dimension, drops that aligned pair
    /// and is counted in [`IndexLoad::skipped`].
    pub fn load(source: &Path) -> Result<IndexLoad> {
        let current_path = source.join(CURRENT_FILE);
        let generation = fs::read_to_string(&current_path)
            .map_err(|e| unavailable(&current_path, e))?
            .trim()
            .to_string();
        if generation_sequence(&generation).is_none() {
            return Err(unavailable(
                &current_path,
                format!("invalid generation name '{}'", generation),
            ));
        }
        let gen_dir = source.join(&generation);

        let manifest_path = gen_dir.join(MANIFEST_FILE);
        let manifest: Manifest = File::open(&manifest_path)
            .map_err(|e| unavailable(&manifest_path, e))
            .and_then(|f| {
                serde_json::from_reader(BufReader::new(f)).map_err(|e| unavailable(&manifest_path, e))
            })?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(unavailable(
                &manifest_path,
                format!("unsupported format version {}", manifest.format_version),
            ));
        }

        let vectors_path = gen_dir.join(VECTORS_FILE);
        let vectors: Vec<Vec<f32>> = File::open(&vectors_path)
            .map_err(|e| unavailable(&vectors_path, e))
            .and_then(|f| {
                bincode::deserialize_from(BufReader::new(f)).map_err(|e| unavailable(&vectors_path, e))
            })?;

        let metadata_path = gen_dir.join(METADATA_FILE);
        let lines: Vec<String> = File::open(&metadata_path)
            .map(BufReader::new)
            .and_then(|r| r.lines().collect::<std::io::Result<Vec<String>>>())
            .map_err(|e| unavailable(&metadata_path, e))?;

        if vectors.len() != lines.len() {
            return Err(JournalError::Config(format!(
                "{} vectors but {} metadata records in {}",
                vectors.len(),
                lines.len(),
                gen_dir.display()
            )));
        }
        if vectors.len() != manifest.count {
            return Err(JournalError::Config(format!(
                "manifest declares {} entries, found {} in {}",
                manifest.count,
                vectors.len(),
                gen_dir.display()
            )));
        }

        let mut kept_vectors = Vec::with_capacity(vectors.len());
        let mut kept_entries = Vec::with_capacity(vectors.len());
        let mut skipped = 0usize;

        for (position, (vector, line)) in vectors.into_iter().zip(lines).enumerate() {
            if manifest.dimension.is_some_and(|d| d != vector.len()) {
                warn!(
                    position,
                    found = vector.len(),
                    "Skipping index record with wrong vector dimension"
                );
                skipped += 1;
                continue;
            }
            let parsed = serde_json::from_str::<Entry>(&line)
                .map_err(JournalError::from)
                .and_then(Entry::validated);
            match parsed {
                Ok(entry) => {
                    kept_vectors.push(vector);
                    kept_entries.push(entry);
                }
                Err(e) => {
                    warn!(position, error = %e, "Skipping malformed index record");
                    skipped += 1;
                }
            }
        }

        let index = EmbeddingIndex::from_parts(kept_vectors, kept_entries)?;
        info!(
            generation = %generation,
            entries = index.len(),
            skipped,
            "Loaded embedding index"
        );
        Ok(IndexLoad {
            index,
            skipped,
            generation,
        })
    }
}

/// Sequence number of a generation directory name, if it is one.
fn generation_sequence(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
}

fn list_generations(destination: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(destination)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            if generation_sequence(&name).is_some() {
                names.push(name);
            }
        }
    }
    Ok(names)
}

fn write_vectors(path: &Path, vectors: &[Vec<f32>]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, vectors)
        .map_err(|e| JournalError::Serialization(e.to_string()))?;
    let file = writer.into_inner().map_err(|e| JournalError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

fn write_metadata(path: &Path, entries: &[Entry]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for entry in entries {
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
    }
    let file = writer.into_inner().map_err(|e| JournalError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

/// Flush directory entries so a rename survives a crash. Best effort; not
/// every platform allows opening a directory as a file.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(path = %dir.display(), error = %e, "Directory sync skipped");
    }
    #[cfg(not(unix))]
    let _ = dir;
}

/// Remove old generations, newest `retain` kept. The published generation is
/// never removed. Failures are logged, not returned: the publish already
/// succeeded.
fn prune_generations(destination: &Path, current: &str, retain: usize) {
    let mut older: Vec<(u64, String)> = match list_generations(destination) {
        Ok(names) => names
            .into_iter()
            .filter(|name| name != current)
            .filter_map(|name| generation_sequence(&name).map(|seq| (seq, name)))
            .collect(),
        Err(e) => {
            warn!(path = %destination.display(), error = %e, "Cannot list index generations");
            return;
        }
    };

    older.sort();
    let remove_count = older.len().saturating_sub(retain.saturating_sub(1));

    for (_, name) in older.into_iter().take(remove_count) {
        let path = destination.join(&name);
        match fs::remove_dir_all(&path) {
            Ok(()) => debug!(path = %path.display(), "Pruned index generation"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to prune index generation"),
        }
    }
}
