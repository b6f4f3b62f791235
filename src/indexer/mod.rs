pub mod deletions;
pub mod parser;
pub mod walker;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::IndexConfig;
use crate::error::Result;
use crate::index::{ChunkWithLines, EmbeddingIndex};
use crate::jobs::{JobContext, ProgressUpdate};
use crate::registry::Project;

use deletions::DeletionSource;
use parser::{ContextExtractor, language_for};
use walker::SkipRules;

/// Per-file outcome counts of one indexing pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexingSummary {
    /// Files (re)embedded into at least one index
    pub indexed: usize,
    /// Files whose stored mtime matched
    pub unchanged: usize,
    /// Unreadable or non-UTF-8 files
    pub skipped: usize,
    /// Files the embedding provider failed on
    pub failed: usize,
    /// Stale files dropped from the indexes before the walk
    pub removed: usize,
}

/// Everything one full-project pass needs, owned so it can move into a job.
pub struct IndexRun {
    pub project: Project,
    pub knowledge: Arc<EmbeddingIndex>,
    pub code: Arc<EmbeddingIndex>,
    pub rules: Arc<SkipRules>,
    pub deletions: Arc<dyn DeletionSource>,
    pub context: Arc<dyn ContextExtractor>,
    pub config: IndexConfig,
    pub force: bool,
    pub clean: bool,
}

impl IndexRun {
    pub async fn run(self, ctx: JobContext) -> Result<IndexingSummary> {
        let result = self.execute(&ctx).await;
        if result.is_err() {
            // Work finished before the failure stays on disk.
            for index in [&self.knowledge, &self.code] {
                if let Err(e) = index.flush().await {
                    tracing::warn!("could not save {}: {e}", index.path().display());
                }
            }
        }
        result
    }

    async fn execute(&self, ctx: &JobContext) -> Result<IndexingSummary> {
        let name = &self.project.name;
        let mut summary = IndexingSummary::default();

        if self.clean {
            self.knowledge.wipe().await?;
            self.code.wipe().await?;
        }

        let rules = Arc::clone(&self.rules);
        let extensions = self.config.all_extensions();
        let files = tokio::task::spawn_blocking(move || walker::collect_files(&rules, &extensions))
            .await
            .map_err(|e| anyhow::anyhow!("file walk failed: {e}"))?;
        ctx.update(ProgressUpdate {
            items_done: Some(0),
            items_total: Some(files.len()),
            current_item: None,
        });
        tracing::info!("{name}: {} files eligible for indexing", files.len());

        summary.removed = self.remove_stale().await?;

        for (i, file) in files.iter().enumerate() {
            ctx.update(ProgressUpdate {
                current_item: Some(self.project.relative(file).display().to_string()),
                ..Default::default()
            });
            self.index_one(file, &mut summary).await;

            let done = i + 1;
            ctx.update(ProgressUpdate {
                items_done: Some(done),
                ..Default::default()
            });
            ctx.checkpoint(done).await?;
        }

        self.knowledge.mark_full_index().await?;
        self.code.mark_full_index().await?;

        tracing::info!(
            "{name}: {} indexed, {} unchanged, {} skipped, {} failed, {} removed",
            summary.indexed,
            summary.unchanged,
            summary.skipped,
            summary.failed,
            summary.removed
        );
        Ok(summary)
    }

    /// Drop indexed files that vanished, became ignored, or were reported
    /// deleted. Returns the number of distinct files dropped.
    async fn remove_stale(&self) -> Result<usize> {
        let deleted: HashSet<PathBuf> = self
            .deletions
            .list_deleted_paths(&self.project.data_dir)
            .into_iter()
            .collect();

        let mut removed = HashSet::new();
        for index in [&self.knowledge, &self.code] {
            let mut changed = false;
            for key in index.indexed_files().await {
                let path = Path::new(&key);
                let stale =
                    deleted.contains(path) || !path.is_file() || self.rules.should_skip_file(path);
                if stale && index.clear_file(&key).await {
                    tracing::debug!("removed stale {key} from {:?} index", index.kind());
                    changed = true;
                    removed.insert(key);
                }
            }
            if changed {
                index.flush().await?;
            }
        }
        Ok(removed.len())
    }

    async fn index_one(&self, file: &Path, summary: &mut IndexingSummary) {
        let key = file.to_string_lossy().into_owned();
        let mtime: DateTime<Utc> = match tokio::fs::metadata(file).await.and_then(|m| m.modified()) {
            Ok(t) => t.into(),
            Err(e) => {
                tracing::warn!("skipping {key}: {e}");
                summary.skipped += 1;
                return;
            }
        };

        let is_code = file
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.config.is_code_extension(e));
        let knowledge_due = self.force || self.knowledge.needs_reindex(&key, mtime).await;
        let code_due = is_code && (self.force || self.code.needs_reindex(&key, mtime).await);
        if !knowledge_due && !code_due {
            summary.unchanged += 1;
            return;
        }

        let content = match tokio::fs::read_to_string(file).await {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("skipping unreadable {key}: {e}");
                summary.skipped += 1;
                return;
            }
        };

        let mut ok = true;
        if knowledge_due {
            let result = if self.force {
                self.knowledge.reindex_file(&key, &content, Some(mtime)).await.map(|_| true)
            } else {
                self.knowledge.index_file(&key, &content, Some(mtime)).await
            };
            if let Err(e) = result {
                tracing::warn!("knowledge index failed for {key}: {e}");
                ok = false;
            }
        }
        if code_due {
            match self.index_code(file, &key, &content, mtime).await {
                Ok(n) => tracing::debug!("code: indexed {key} ({n} windows)"),
                Err(e) => {
                    tracing::warn!("code index failed for {key}: {e}");
                    ok = false;
                }
            }
        }

        if ok {
            summary.indexed += 1;
        } else {
            summary.failed += 1;
        }
    }

    /// Replace a source file's windows in the code index in one swap. On
    /// failure the previous windows and record stay, so the next pass sees a
    /// changed mtime and retries.
    async fn index_code(&self, file: &Path, key: &str, content: &str, mtime: DateTime<Utc>) -> Result<usize> {
        let language = language_for(file).unwrap_or("text");
        let windows: Vec<(ChunkWithLines, Option<String>)> = self
            .code
            .chunk_with_lines(content)
            .into_iter()
            .map(|window| {
                let context = self
                    .context
                    .extract_context(content, first_content_line(&window), language);
                (window, context)
            })
            .collect();
        self.code
            .replace_code_file(key, &windows, language, Some(mtime))
            .await
    }
}

/// The first non-blank line of a window; overlap often starts a window on a
/// blank separator line.
fn first_content_line(window: &ChunkWithLines) -> u32 {
    let offset = window
        .content
        .lines()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(0);
    window.line_start + offset as u32
}
