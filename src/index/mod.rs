pub mod chunker;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::embed::{EmbeddingProvider, ProviderCache, cosine_similarity};
use crate::error::Result;

pub use chunker::{ChunkPolicy, ChunkWithLines};
pub use store::{Chunk, CodeSpan, FileRecord, IndexFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Plain overlapping windows over every eligible file
    Knowledge,
    /// Line-tracked windows over source files, labelled with their enclosing definition
    Code,
}

impl IndexKind {
    pub fn file_name(self) -> &'static str {
        match self {
            IndexKind::Knowledge => "knowledge.json",
            IndexKind::Code => "code.json",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub total_files: usize,
    pub last_full_index_at: Option<DateTime<Utc>>,
}

/// A search hit: the chunk without its vector, plus its cosine score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub id: String,
    pub file_path: String,
    pub content: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeSpan>,
}

struct SaveState {
    last_save: Option<Instant>,
}

/// A persistent, in-memory vector index for one (project, kind) pair.
///
/// Mutations are expected from a single indexing job at a time; searches may
/// run concurrently and see each file either before or after its chunks were
/// replaced.
pub struct EmbeddingIndex {
    kind: IndexKind,
    path: PathBuf,
    model_id: String,
    providers: Arc<ProviderCache>,
    policy: ChunkPolicy,
    save_interval: Duration,
    state: RwLock<IndexFile>,
    dirty: AtomicBool,
    save: Mutex<SaveState>,
}

impl EmbeddingIndex {
    pub async fn open(
        kind: IndexKind,
        path: PathBuf,
        model_id: &str,
        providers: Arc<ProviderCache>,
        policy: ChunkPolicy,
        save_interval: Duration,
    ) -> Self {
        let file = store::load(&path, model_id).await;
        tracing::debug!(
            "opened {:?} index {} ({} chunks)",
            kind,
            path.display(),
            file.chunks.len()
        );
        Self {
            kind,
            path,
            model_id: model_id.to_string(),
            providers,
            policy,
            save_interval,
            state: RwLock::new(file),
            dirty: AtomicBool::new(false),
            save: Mutex::new(SaveState { last_save: None }),
        }
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> &ChunkPolicy {
        &self.policy
    }

    async fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        self.providers.get(&self.model_id).await
    }

    /// Index `content` for `path` unless it is already indexed at `mtime`.
    /// Returns whether anything was (re)embedded.
    pub async fn index_file(
        &self,
        path: &str,
        content: &str,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        if let Some(m) = mtime {
            if !self.needs_reindex(path, m).await {
                return Ok(false);
            }
        }
        self.reindex_file(path, content, mtime).await?;
        Ok(true)
    }

    /// Embed `content` for `path` unconditionally, replacing whatever the
    /// index held for it. Returns the number of chunks stored.
    ///
    /// All windows are embedded before the index is touched; if the provider
    /// fails the previous chunks stay in place.
    pub async fn reindex_file(
        &self,
        path: &str,
        content: &str,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let windows = chunker::split_text(content, &self.policy);
        let mut embeddings = Vec::with_capacity(windows.len());
        if !windows.is_empty() {
            let provider = self.provider().await?;
            for window in &windows {
                embeddings.push(provider.embed(window).await?);
            }
        }

        let mtime = mtime.unwrap_or_else(Utc::now);
        let chunks: Vec<Chunk> = windows
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (content, embedding))| Chunk {
                id: format!("{path}#{i}"),
                file_path: path.to_string(),
                content,
                embedding,
                source_modified_at: Some(mtime),
                code: None,
            })
            .collect();
        let count = chunks.len();

        {
            let mut state = self.state.write().await;
            state.chunks.retain(|c| c.file_path != path);
            state.chunks.extend(chunks);
            state.file_records.insert(
                path.to_string(),
                FileRecord {
                    mtime,
                    chunk_count: count,
                    language: None,
                },
            );
        }
        self.dirty.store(true, Ordering::SeqCst);
        self.persist(false).await?;

        tracing::debug!("{:?}: indexed {path} ({count} chunks)", self.kind);
        Ok(count)
    }

    /// Embed one pre-computed window of a source file and append it.
    /// Does not save; the caller finishes its batch with [`Self::mark_full_index`].
    pub async fn index_code_chunk(
        &self,
        path: &str,
        window: &ChunkWithLines,
        enclosing_context: Option<String>,
        language: &str,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let embedding = self.provider().await?.embed(&window.content).await?;
        let mtime = mtime.unwrap_or_else(Utc::now);

        let mut state = self.state.write().await;
        let record = state
            .file_records
            .entry(path.to_string())
            .or_insert_with(|| FileRecord {
                mtime,
                chunk_count: 0,
                language: Some(language.to_string()),
            });
        let counter = record.chunk_count;
        record.chunk_count += 1;
        record.mtime = mtime;
        record.language = Some(language.to_string());

        state.chunks.push(code_chunk(
            path,
            counter,
            window,
            enclosing_context,
            language,
            mtime,
            embedding,
        ));
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Replace every window of a source file at once. Windows are embedded
    /// first; readers see the old windows until the swap, and a provider
    /// failure leaves them untouched.
    pub async fn replace_code_file(
        &self,
        path: &str,
        windows: &[(ChunkWithLines, Option<String>)],
        language: &str,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let mut embeddings = Vec::with_capacity(windows.len());
        if !windows.is_empty() {
            let provider = self.provider().await?;
            for (window, _) in windows {
                embeddings.push(provider.embed(&window.content).await?);
            }
        }

        let mtime = mtime.unwrap_or_else(Utc::now);
        let chunks: Vec<Chunk> = windows
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, ((window, context), embedding))| {
                code_chunk(path, i, window, context.clone(), language, mtime, embedding)
            })
            .collect();
        let count = chunks.len();

        {
            let mut state = self.state.write().await;
            state.chunks.retain(|c| c.file_path != path);
            state.chunks.extend(chunks);
            state.file_records.insert(
                path.to_string(),
                FileRecord {
                    mtime,
                    chunk_count: count,
                    language: Some(language.to_string()),
                },
            );
        }
        self.dirty.store(true, Ordering::SeqCst);
        self.persist(false).await?;
        Ok(count)
    }

    /// Line-tracked windows under this index's chunk policy.
    pub fn chunk_with_lines(&self, content: &str) -> Vec<ChunkWithLines> {
        chunker::split_with_lines(content, &self.policy)
    }

    /// Drop a file's chunks and record without saving. Returns whether the
    /// index held anything for it.
    pub async fn clear_file(&self, path: &str) -> bool {
        let mut state = self.state.write().await;
        let before = state.chunks.len();
        state.chunks.retain(|c| c.file_path != path);
        let removed_record = state.file_records.remove(path).is_some();
        let changed = removed_record || state.chunks.len() != before;
        if changed {
            self.dirty.store(true, Ordering::SeqCst);
        }
        changed
    }

    /// Remove every trace of `path` and save immediately if anything changed.
    pub async fn remove_file(&self, path: &str) -> Result<bool> {
        let changed = self.clear_file(path).await;
        if changed {
            self.persist(true).await?;
        }
        Ok(changed)
    }

    pub async fn needs_reindex(&self, path: &str, mtime: DateTime<Utc>) -> bool {
        let state = self.state.read().await;
        state
            .file_records
            .get(path)
            .is_none_or(|record| record.mtime != mtime)
    }

    /// Rank every stored chunk against `query` and return the best `limit`.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredChunk>> {
        if limit == 0 || self.state.read().await.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self.provider().await?.embed_query(query).await?;

        let state = self.state.read().await;
        let mut scored: Vec<(usize, f32)> = state
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(&query_vec, &c.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let c = &state.chunks[i];
                ScoredChunk {
                    id: c.id.clone(),
                    file_path: c.file_path.clone(),
                    content: c.content.clone(),
                    score,
                    code: c.code.clone(),
                }
            })
            .collect())
    }

    /// Stamp the end of a full pass and save immediately.
    pub async fn mark_full_index(&self) -> Result<()> {
        self.state.write().await.last_full_index_at = Some(Utc::now());
        self.dirty.store(true, Ordering::SeqCst);
        self.persist(true).await?;
        Ok(())
    }

    pub async fn stats(&self) -> IndexStats {
        let state = self.state.read().await;
        IndexStats {
            total_chunks: state.chunks.len(),
            total_files: state.file_records.len(),
            last_full_index_at: state.last_full_index_at,
        }
    }

    pub async fn indexed_files(&self) -> Vec<String> {
        self.state.read().await.file_records.keys().cloned().collect()
    }

    /// Save now if there are unsaved changes.
    pub async fn flush(&self) -> Result<bool> {
        self.persist(true).await
    }

    /// Forget everything and delete the backing file.
    pub async fn wipe(&self) -> Result<()> {
        let mut save = self.save.lock().await;
        *self.state.write().await = IndexFile::empty(&self.model_id);
        self.dirty.store(false, Ordering::SeqCst);
        save.last_save = None;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!("wiped {:?} index {}", self.kind, self.path.display());
        Ok(())
    }

    /// Write the index if it has unsaved changes and either `force` is set or
    /// the save interval has elapsed since the last write.
    async fn persist(&self, force: bool) -> Result<bool> {
        let mut save = self.save.lock().await;
        if !self.dirty.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if !force {
            if let Some(last) = save.last_save {
                if last.elapsed() < self.save_interval {
                    return Ok(false);
                }
            }
        }

        self.dirty.store(false, Ordering::SeqCst);
        let bytes = {
            let state = self.state.read().await;
            serde_json::to_vec(&*state)
        };
        let written = match bytes {
            Ok(bytes) => store::save_atomic(&self.path, &bytes).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }

        save.last_save = Some(Instant::now());
        tracing::trace!("saved {:?} index {}", self.kind, self.path.display());
        Ok(true)
    }
}

fn code_chunk(
    path: &str,
    n: usize,
    window: &ChunkWithLines,
    enclosing_context: Option<String>,
    language: &str,
    mtime: DateTime<Utc>,
    embedding: Vec<f32>,
) -> Chunk {
    Chunk {
        id: format!("{path}#{n}"),
        file_path: path.to_string(),
        content: window.content.clone(),
        embedding,
        source_modified_at: Some(mtime),
        code: Some(CodeSpan {
            line_start: window.line_start,
            line_end: window.line_end,
            enclosing_context,
            language: Some(language.to_string()),
        }),
    }
}
