//! On-disk mapping and embedding tables.
//!
//! Both tables are written atomically (temp file, fsync, rename), so a reader sees either
//! the previous artifact or the complete new one. A missing file is a normal state that
//! loads as `None`.

use crate::error::ArtifactError;
use crate::models::{Document, EmbeddingRecord};
use crate::similarity::l2_norm;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const MAPPING_FILE: &str = "semantic-mapping.json";
pub const EMBEDDINGS_FILE: &str = "semantic-embeddings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingTable {
    pub generated_at: DateTime<Utc>,
    pub documents: Vec<Document>,
}

impl PartialEq for MappingTable {
    fn eq(&self, other: &Self) -> bool {
        self.documents == other.documents
    }
}

impl MappingTable {
    pub fn new(documents: Vec<Document>) -> Result<Self, ArtifactError> {
        let table = Self {
            generated_at: Utc::now(),
            documents,
        };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), ArtifactError> {
        let mut seen = HashSet::new();
        for document in &self.documents {
            if !seen.insert(document.id.as_str()) {
                return Err(ArtifactError::DuplicateId(document.id.clone()));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingTable {
    pub provider: String,
    pub embedding_dim: usize,
    pub generated_at: DateTime<Utc>,
    pub corpus_digest: String,
    pub records: Vec<EmbeddingRecord>,
}

impl PartialEq for EmbeddingTable {
    fn eq(&self, other: &Self) -> bool {
        self.provider == other.provider
            && self.embedding_dim == other.embedding_dim
            && self.corpus_digest == other.corpus_digest
            && self.records == other.records
    }
}

/// Wire form of the embedding table; `norm` may be missing in hand-edited files.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEmbeddingTable {
    provider: String,
    embedding_dim: usize,
    generated_at: DateTime<Utc>,
    #[serde(default)]
    corpus_digest: String,
    records: Vec<RawRecord>,
}

#[derive(Deserialize)]
struct RawRecord {
    id: String,
    vector: Vec<f32>,
    #[serde(default)]
    norm: Option<f32>,
}

impl EmbeddingTable {
    pub fn new(
        provider: impl Into<String>,
        embedding_dim: usize,
        corpus_digest: impl Into<String>,
        records: Vec<EmbeddingRecord>,
    ) -> Result<Self, ArtifactError> {
        let table = Self {
            provider: provider.into(),
            embedding_dim,
            generated_at: Utc::now(),
            corpus_digest: corpus_digest.into(),
            records,
        };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), ArtifactError> {
        let mut seen = HashSet::new();
        for record in &self.records {
            if !seen.insert(record.id.as_str()) {
                return Err(ArtifactError::DuplicateId(record.id.clone()));
            }
            if record.vector.len() != self.embedding_dim {
                return Err(ArtifactError::DimensionMismatch {
                    id: record.id.clone(),
                    expected: self.embedding_dim,
                    got: record.vector.len(),
                });
            }
            if record.vector.iter().any(|value| !value.is_finite()) {
                return Err(ArtifactError::NonFinite(record.id.clone()));
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&EmbeddingRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn from_raw(raw: RawEmbeddingTable) -> Result<Self, ArtifactError> {
        let records = raw
            .records
            .into_iter()
            .map(|record| {
                let norm = match record.norm {
                    Some(norm) if norm.is_finite() => norm,
                    _ => l2_norm(&record.vector),
                };
                EmbeddingRecord {
                    id: record.id,
                    vector: record.vector,
                    norm,
                }
            })
            .collect();

        let table = Self {
            provider: raw.provider,
            embedding_dim: raw.embedding_dim,
            generated_at: raw.generated_at,
            corpus_digest: raw.corpus_digest,
            records,
        };
        table.validate()?;
        Ok(table)
    }
}

/// Artifact locations under one data directory.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub mapping: PathBuf,
    pub embeddings: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            mapping: dir.join(MAPPING_FILE),
            embeddings: dir.join(EMBEDDINGS_FILE),
        }
    }
}

pub fn load_mapping(path: &Path) -> Result<Option<MappingTable>, ArtifactError> {
    let Some(raw) = read_optional(path)? else {
        return Ok(None);
    };
    let table: MappingTable = serde_json::from_str(&raw).map_err(|source| ArtifactError::Json {
        path: path.display().to_string(),
        source,
    })?;
    table.validate()?;
    Ok(Some(table))
}

pub fn load_embeddings(path: &Path) -> Result<Option<EmbeddingTable>, ArtifactError> {
    let Some(raw) = read_optional(path)? else {
        return Ok(None);
    };
    let parsed: RawEmbeddingTable =
        serde_json::from_str(&raw).map_err(|source| ArtifactError::Json {
            path: path.display().to_string(),
            source,
        })?;
    EmbeddingTable::from_raw(parsed).map(Some)
}

pub fn save_mapping(path: &Path, table: &MappingTable) -> Result<(), ArtifactError> {
    let bytes = serde_json::to_vec_pretty(table).map_err(|source| ArtifactError::Json {
        path: path.display().to_string(),
        source,
    })?;
    write_atomic(path, &bytes)
}

pub fn save_embeddings(path: &Path, table: &EmbeddingTable) -> Result<(), ArtifactError> {
    let bytes = serde_json::to_vec(table).map_err(|source| ArtifactError::Json {
        path: path.display().to_string(),
        source,
    })?;
    write_atomic(path, &bytes)
}

/// Removes an artifact left over from an earlier build. Absent files are fine.
pub fn remove_artifact(path: &Path) -> Result<(), ArtifactError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ArtifactError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, ArtifactError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ArtifactError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let io_error = |source| ArtifactError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let temp_path = path.with_extension("json.tmp");
    let written = (|| -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    })();

    if let Err(source) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(io_error(source));
    }

    fs::rename(&temp_path, path).map_err(io_error)
}
