//! On-disk form of an embedding index: one JSON document per index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 1;

/// Line metadata carried only by chunks of the code index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSpan {
    pub line_start: u32,
    pub line_end: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosing_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeSpan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub mtime: DateTime<Utc>,
    pub chunk_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFile {
    pub schema_version: u32,
    pub embedding_model_id: String,
    pub chunks: Vec<Chunk>,
    pub file_records: BTreeMap<String, FileRecord>,
    #[serde(default)]
    pub last_full_index_at: Option<DateTime<Utc>>,
}

impl IndexFile {
    pub fn empty(model_id: &str) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            embedding_model_id: model_id.to_string(),
            chunks: Vec::new(),
            file_records: BTreeMap::new(),
            last_full_index_at: None,
        }
    }
}

/// Read an index file.
///
/// A missing file, a file that does not parse, and a file written by another
/// schema version or embedding model all come back as an empty index; the
/// next save overwrites it.
pub async fn load(path: &Path, model_id: &str) -> IndexFile {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return IndexFile::empty(model_id);
        }
        Err(e) => {
            tracing::warn!("could not read index {}: {e}; starting empty", path.display());
            return IndexFile::empty(model_id);
        }
    };

    match serde_json::from_slice::<IndexFile>(&bytes) {
        Ok(file) if file.schema_version != SCHEMA_VERSION => {
            tracing::warn!(
                "index {} has schema v{}, expected v{SCHEMA_VERSION}; starting empty",
                path.display(),
                file.schema_version
            );
            IndexFile::empty(model_id)
        }
        Ok(file) if file.embedding_model_id != model_id => {
            tracing::warn!(
                "index {} was built with {}, now using {model_id}; starting empty",
                path.display(),
                file.embedding_model_id
            );
            IndexFile::empty(model_id)
        }
        Ok(file) => file,
        Err(e) => {
            tracing::warn!("index {} is corrupt ({e}); starting empty", path.display());
            IndexFile::empty(model_id)
        }
    }
}

/// Write the serialized index next to `path` and rename it into place, so a
/// reader or a crash never observes a half-written file.
pub async fn save_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp-{}", std::process::id()));
    path.with_file_name(name)
}
