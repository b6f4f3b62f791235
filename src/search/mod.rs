//! Query-side composition: similarity search across projects, related-file
//! lookup, token budgets, freshness, and starting indexing jobs.

pub mod budget;
pub mod fallback;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::embed::ProviderCache;
use crate::embed::nomic::NomicLoader;
use crate::error::{AppError, Result};
use crate::graph::imports::normalize;
use crate::graph::{GraphCache, RelatedFile, RelatedOptions, find_related};
use crate::index::{ChunkPolicy, CodeSpan, EmbeddingIndex, IndexKind, IndexStats};
use crate::indexer::IndexRun;
use crate::indexer::deletions::{DeletedPathsFile, DeletionSource};
use crate::indexer::parser::{ContextExtractor, TreeSitterContext};
use crate::indexer::walker::SkipRulesCache;
use crate::jobs::{IndexingProgress, JobScheduler, StartOutcome};
use crate::registry::{Project, ProjectRegistry};

use budget::apply_budget;
use fallback::{LiteralMatch, literal_search};

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Falls back to `search.default_limit`
    pub limit: Option<usize>,
    pub min_score: Option<f32>,
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Semantic,
    Literal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub project: String,
    /// Relative to the project root
    pub file: PathBuf,
    pub score: f32,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeSpan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Freshness {
    pub project: String,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub index_age_seconds: Option<i64>,
    pub indexing_in_progress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub mode: SearchMode,
    pub hits: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub literal_matches: Vec<LiteralMatch>,
    pub truncated: bool,
    pub total_tokens: usize,
    pub freshness: Vec<Freshness>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub project: String,
    pub semantic_search: bool,
    pub progress: IndexingProgress,
    pub knowledge: IndexStats,
    pub code: IndexStats,
    pub freshness: Freshness,
}

#[derive(Clone)]
struct ProjectIndexes {
    knowledge: Arc<EmbeddingIndex>,
    code: Arc<EmbeddingIndex>,
}

impl ProjectIndexes {
    fn get(&self, kind: IndexKind) -> &Arc<EmbeddingIndex> {
        match kind {
            IndexKind::Knowledge => &self.knowledge,
            IndexKind::Code => &self.code,
        }
    }
}

/// Owns every cache and collaborator; the CLI and the HTTP server each hold
/// one of these.
pub struct Orchestrator {
    config: AppConfig,
    registry: ProjectRegistry,
    providers: Arc<ProviderCache>,
    scheduler: JobScheduler,
    graphs: GraphCache,
    skip_rules: SkipRulesCache,
    context: Arc<dyn ContextExtractor>,
    deletions: Arc<dyn DeletionSource>,
    indexes: Mutex<HashMap<String, ProjectIndexes>>,
}

impl Orchestrator {
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: AppConfig,
        registry: ProjectRegistry,
        providers: Arc<ProviderCache>,
        context: Arc<dyn ContextExtractor>,
        deletions: Arc<dyn DeletionSource>,
    ) -> Self {
        let scheduler = JobScheduler::new(config.index.yield_every);
        let graphs = GraphCache::new(
            Duration::from_secs(config.graph.cache_ttl_secs),
            config.graph.extensions.clone(),
            config.index.skip_dirs.clone(),
        );
        let skip_rules = SkipRulesCache::new(
            Duration::from_secs(config.index.skip_rules_ttl_secs),
            config.index.skip_dirs.clone(),
            config.index.default_excludes.clone(),
        );
        Self {
            config,
            registry,
            providers,
            scheduler,
            graphs,
            skip_rules,
            context,
            deletions,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    /// Candle embeddings, tree-sitter context and the deleted-paths file.
    pub fn with_defaults(config: AppConfig, registry: ProjectRegistry) -> Self {
        Self::new(
            config,
            registry,
            Arc::new(ProviderCache::new(Arc::new(NomicLoader))),
            Arc::new(TreeSitterContext),
            Arc::new(DeletedPathsFile),
        )
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    async fn indexes(&self, project: &Project) -> ProjectIndexes {
        let mut indexes = self.indexes.lock().await;
        if let Some(open) = indexes.get(&project.name) {
            return open.clone();
        }

        let policy = ChunkPolicy {
            size: self.config.index.chunk_size,
            overlap: self.config.index.chunk_overlap,
            min_len: self.config.index.min_chunk,
        };
        let interval = self.config.index.save_interval();
        let open = |kind: IndexKind| {
            EmbeddingIndex::open(
                kind,
                project.index_path(kind),
                &project.model_id,
                Arc::clone(&self.providers),
                policy,
                interval,
            )
        };
        let knowledge = Arc::new(open(IndexKind::Knowledge).await);
        let code = Arc::new(open(IndexKind::Code).await);

        let opened = ProjectIndexes { knowledge, code };
        indexes.insert(project.name.clone(), opened.clone());
        opened
    }

    pub async fn search_knowledge(
        &self,
        query: &str,
        project: Option<&str>,
        options: SearchOptions,
    ) -> Result<SearchResponse> {
        self.search(IndexKind::Knowledge, query, project, options).await
    }

    pub async fn search_code(
        &self,
        query: &str,
        project: Option<&str>,
        options: SearchOptions,
    ) -> Result<SearchResponse> {
        self.search(IndexKind::Code, query, project, options).await
    }

    async fn search(
        &self,
        kind: IndexKind,
        query: &str,
        project: Option<&str>,
        options: SearchOptions,
    ) -> Result<SearchResponse> {
        let scope = self.registry.scope(project)?;
        let limit = options.limit.unwrap_or(self.config.search.default_limit);
        let min_score = options.min_score.or(self.config.search.min_score);
        let max_tokens = options.max_tokens.or(self.config.search.max_tokens);

        let mut freshness = Vec::with_capacity(scope.len());
        for p in &scope {
            freshness.push(self.freshness(p).await);
        }

        let semantic: Vec<&Project> = scope.iter().copied().filter(|p| p.semantic_search).collect();
        if semantic.is_empty() {
            let matches = self.literal(kind, &scope, query, limit).await?;
            let budgeted = apply_budget(matches, max_tokens, |m| m.text.as_str());
            return Ok(SearchResponse {
                mode: SearchMode::Literal,
                hits: Vec::new(),
                literal_matches: budgeted.items,
                truncated: budgeted.truncated,
                total_tokens: budgeted.total_tokens,
                freshness,
            });
        }

        let mut hits = Vec::new();
        for p in semantic {
            let index = self.indexes(p).await.get(kind).clone();
            for chunk in index.search(query, limit).await? {
                if min_score.is_some_and(|min| chunk.score < min) {
                    continue;
                }
                hits.push(SearchHit {
                    project: p.name.clone(),
                    file: p.relative(Path::new(&chunk.file_path)),
                    score: chunk.score,
                    content: chunk.content,
                    code: chunk.code,
                });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);

        let budgeted = apply_budget(hits, max_tokens, |h| h.content.as_str());
        tracing::debug!(
            "{kind:?} search {query:?}: {} hits, {} tokens",
            budgeted.items.len(),
            budgeted.total_tokens
        );
        Ok(SearchResponse {
            mode: SearchMode::Semantic,
            hits: budgeted.items,
            literal_matches: Vec::new(),
            truncated: budgeted.truncated,
            total_tokens: budgeted.total_tokens,
            freshness,
        })
    }

    async fn literal(
        &self,
        kind: IndexKind,
        scope: &[&Project],
        query: &str,
        limit: usize,
    ) -> Result<Vec<LiteralMatch>> {
        let extensions = match kind {
            IndexKind::Knowledge => self.config.index.all_extensions(),
            IndexKind::Code => self.config.index.code_extensions.clone(),
        };
        let mut matches = Vec::new();
        for p in scope {
            let rules = self.skip_rules.rules_for(&p.root);
            let (extensions, query) = (extensions.clone(), query.to_string());
            let found = tokio::task::spawn_blocking(move || {
                literal_search(&rules, &extensions, &query, limit)
            })
            .await
            .map_err(|e| anyhow::anyhow!("literal search failed: {e}"))?;
            matches.extend(found);
        }
        Ok(matches)
    }

    /// Files related to `path` through resolved imports, relative to the
    /// project root. `path` may be relative to the root or absolute.
    pub async fn find_related_files(
        &self,
        path: &Path,
        project: &str,
        options: RelatedOptions,
    ) -> Result<Vec<RelatedFile>> {
        let project = self.registry.get(project)?;
        let absolute = normalize(&project.root.join(path));

        let graph = self.graphs.graph_for(&project.root).await?;
        Ok(find_related(&absolute, &graph, options)
            .into_iter()
            .map(|mut related| {
                related.file = project.relative(&related.file);
                related
            })
            .collect())
    }

    /// Start a background indexing pass for `project`. Fails without starting
    /// a job when the project is unknown, has semantic search disabled, or its
    /// root is gone.
    pub async fn run_indexing(&self, project: &str, force: bool, clean: bool) -> Result<StartOutcome> {
        let project = self.registry.get(project)?.clone();
        if !project.semantic_search {
            return Err(AppError::IndexingDisabled(project.name));
        }
        if !project.root.is_dir() {
            return Err(AppError::RootMissing(project.root.display().to_string()));
        }

        let indexes = self.indexes(&project).await;
        self.graphs.invalidate(&project.root);
        let name = project.name.clone();
        let run = IndexRun {
            rules: self.skip_rules.rules_for(&project.root),
            project,
            knowledge: indexes.knowledge,
            code: indexes.code,
            deletions: Arc::clone(&self.deletions),
            context: Arc::clone(&self.context),
            config: self.config.index.clone(),
            force,
            clean,
        };
        Ok(self
            .scheduler
            .start(&name, move |ctx| async move { run.run(ctx).await.map(|_| ()) }))
    }

    pub async fn freshness(&self, project: &Project) -> Freshness {
        let in_progress = self.scheduler.is_running(&project.name);
        let mut last = self.scheduler.last_completed_at(&project.name);
        if last.is_none() && project.semantic_search {
            last = self.indexes(project).await.knowledge.stats().await.last_full_index_at;
        }
        Freshness {
            project: project.name.clone(),
            last_indexed_at: last,
            index_age_seconds: last.map(|t| (Utc::now() - t).num_seconds().max(0)),
            indexing_in_progress: in_progress,
            advisory: in_progress.then(|| {
                format!(
                    "indexing of {} is in progress; results may be incomplete",
                    project.name
                )
            }),
        }
    }

    pub async fn index_status(&self, project: &str) -> Result<IndexStatus> {
        let project = self.registry.get(project)?;
        let indexes = self.indexes(project).await;
        Ok(IndexStatus {
            project: project.name.clone(),
            semantic_search: project.semantic_search,
            progress: self.scheduler.progress(&project.name),
            knowledge: indexes.knowledge.stats().await,
            code: indexes.code.stats().await,
            freshness: self.freshness(project).await,
        })
    }

    /// Drop cached graphs, skip rules and loaded models.
    pub async fn clear_caches(&self) {
        self.graphs.clear();
        self.skip_rules.clear();
        self.providers.clear().await;
    }

    /// Cancel running jobs, wait for them to stop, and save every open index.
    pub async fn shutdown(&self) {
        self.scheduler.abort_all();
        self.scheduler.join_all().await;
        let open: Vec<ProjectIndexes> = self.indexes.lock().await.values().cloned().collect();
        for indexes in open {
            for index in [&indexes.knowledge, &indexes.code] {
                if let Err(e) = index.flush().await {
                    tracing::warn!("could not save {}: {e}", index.path().display());
                }
            }
        }
        tracing::info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::embed::testing::hashing_cache;
    use crate::graph::Relationship;
    use crate::jobs::{JobState, StartStatus};
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn orchestrator(config: AppConfig, target: &Path) -> Orchestrator {
        let registry = ProjectRegistry::from_config(&config, target);
        Orchestrator::new(
            config,
            registry,
            hashing_cache(),
            Arc::new(TreeSitterContext),
            Arc::new(DeletedPathsFile),
        )
    }

    fn project_config(name: &str, root: &Path, semantic_search: bool) -> ProjectConfig {
        ProjectConfig {
            name: name.into(),
            root: root.to_path_buf(),
            semantic_search,
            model_id: None,
        }
    }

    fn shop_config(root: &Path) -> AppConfig {
        AppConfig {
            projects: vec![project_config("shop", root, true)],
            ..AppConfig::default()
        }
    }

    fn seed_shop(root: &Path) {
        write(
            root,
            "docs/payments.md",
            "Payments are captured by the billing worker after checkout completes.",
        );
        write(
            root,
            "docs/shipping.md",
            "Shipping labels are printed by the warehouse service each morning.",
        );
        write(
            root,
            "src/billing.ts",
            "import { capture } from './gateway';\nexport function charge() { return capture(); }\n",
        );
        write(root, "src/gateway.ts", "export function capture() { return 1; }\n");
    }

    fn files_of(related: &[RelatedFile]) -> Vec<PathBuf> {
        related.iter().map(|r| r.file.clone()).collect()
    }

    async fn indexed(orch: &Orchestrator, project: &str) {
        let outcome = orch.run_indexing(project, false, false).await.unwrap();
        assert_eq!(outcome.status, StartStatus::Started);
        orch.scheduler().wait(project).await;
        assert_eq!(orch.scheduler().progress(project).state, JobState::Complete);
    }

    #[tokio::test]
    async fn knowledge_search_ranks_and_relativizes() {
        let dir = TempDir::new().unwrap();
        seed_shop(dir.path());
        let orch = orchestrator(shop_config(dir.path()), dir.path());
        indexed(&orch, "shop").await;

        let response = orch
            .search_knowledge("billing worker payments checkout", Some("shop"), SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(response.mode, SearchMode::Semantic);
        assert_eq!(response.hits[0].file, PathBuf::from("docs/payments.md"));
        assert!(response.hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(!response.truncated);

        let fresh = &response.freshness[0];
        assert!(fresh.last_indexed_at.is_some());
        assert!(!fresh.indexing_in_progress);
        assert!(fresh.advisory.is_none());
    }

    #[tokio::test]
    async fn limits_scores_and_budget_shape_results() {
        let dir = TempDir::new().unwrap();
        seed_shop(dir.path());
        let orch = orchestrator(shop_config(dir.path()), dir.path());
        indexed(&orch, "shop").await;

        let one = orch
            .search_knowledge(
                "warehouse shipping labels",
                None,
                SearchOptions {
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(one.hits.len(), 1);

        let strict = orch
            .search_knowledge(
                "warehouse shipping labels",
                None,
                SearchOptions {
                    min_score: Some(0.99),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(strict.hits.iter().all(|h| h.score >= 0.99));

        let tight = orch
            .search_knowledge(
                "warehouse shipping labels",
                None,
                SearchOptions {
                    max_tokens: Some(20),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(tight.truncated);
        assert!(tight.total_tokens <= 20);
        assert!(tight.hits.len() < 4);
    }

    #[tokio::test]
    async fn code_search_carries_line_spans() {
        let dir = TempDir::new().unwrap();
        seed_shop(dir.path());
        let orch = orchestrator(shop_config(dir.path()), dir.path());
        indexed(&orch, "shop").await;

        let response = orch
            .search_code("capture gateway", Some("shop"), SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(response.hits.len(), 2);
        assert!(response.hits.iter().all(|h| h.file.starts_with("src")));
        let gateway = response
            .hits
            .iter()
            .find(|h| h.file == Path::new("src/gateway.ts"))
            .unwrap();
        let span = gateway.code.as_ref().unwrap();
        assert_eq!(span.line_start, 1);
        assert_eq!(span.enclosing_context.as_deref(), Some("capture"));
    }

    #[tokio::test]
    async fn disabled_projects_fall_back_to_literal_search() {
        let dir = TempDir::new().unwrap();
        let body: String = (1..=9).map(|i| format!("retry policy note {i}\n")).collect();
        write(dir.path(), "notes.md", &body);
        let config = AppConfig {
            projects: vec![project_config("notes", dir.path(), false)],
            ..AppConfig::default()
        };
        let orch = orchestrator(config, dir.path());

        let response = orch
            .search_knowledge("RETRY POLICY", Some("notes"), SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(response.mode, SearchMode::Literal);
        assert!(response.hits.is_empty());
        assert_eq!(response.literal_matches.len(), fallback::MAX_LINES_PER_FILE);
        assert_eq!(response.literal_matches[0].file, PathBuf::from("notes.md"));
        assert!(response.freshness[0].last_indexed_at.is_none());
    }

    #[tokio::test]
    async fn indexing_preconditions_fail_without_a_job() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            projects: vec![
                project_config("off", dir.path(), false),
                project_config("gone", &dir.path().join("missing"), true),
            ],
            ..AppConfig::default()
        };
        let orch = orchestrator(config, dir.path());

        assert!(matches!(
            orch.run_indexing("nope", false, false).await,
            Err(AppError::ProjectNotFound(_))
        ));
        assert!(matches!(
            orch.run_indexing("off", false, false).await,
            Err(AppError::IndexingDisabled(_))
        ));
        assert!(matches!(
            orch.run_indexing("gone", false, false).await,
            Err(AppError::RootMissing(_))
        ));
        assert_eq!(orch.scheduler().progress("gone").state, JobState::Idle);
        assert!(orch.search_knowledge("x", Some("nope"), SearchOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn overlapping_index_requests_share_one_job() {
        let dir = TempDir::new().unwrap();
        seed_shop(dir.path());
        let orch = orchestrator(shop_config(dir.path()), dir.path());

        let first = orch.run_indexing("shop", false, false).await.unwrap();
        let second = orch.run_indexing("shop", true, false).await.unwrap();
        assert_eq!(first.status, StartStatus::Started);
        assert_eq!(second.status, StartStatus::AlreadyRunning);

        let status = orch.index_status("shop").await.unwrap();
        assert!(status.freshness.indexing_in_progress);
        assert!(status.freshness.advisory.is_some());

        orch.scheduler().wait("shop").await;
        let status = orch.index_status("shop").await.unwrap();
        assert_eq!(status.progress.state, JobState::Complete);
        assert_eq!(status.knowledge.total_files, 4);
        assert_eq!(status.code.total_files, 2);
    }

    #[tokio::test]
    async fn related_files_are_project_relative() {
        let dir = TempDir::new().unwrap();
        seed_shop(dir.path());
        let orch = orchestrator(shop_config(dir.path()), dir.path());

        let related = orch
            .find_related_files(Path::new("src/gateway.ts"), "shop", RelatedOptions::default())
            .await
            .unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].file, PathBuf::from("src/billing.ts"));
        assert_eq!(related[0].relationship, Relationship::ImportedBy);
        assert_eq!(related[0].import_path, "./gateway");
    }

    #[tokio::test]
    async fn related_files_survive_unnormalized_roots() {
        let dir = TempDir::new().unwrap();
        seed_shop(dir.path());
        write(dir.path(), "src/refunds.ts", "import { bill } from './billing';\n");
        let config = shop_config(&dir.path().join("sub/.."));
        let orch = orchestrator(config, dir.path());
        assert_eq!(orch.registry().get("shop").unwrap().root, dir.path());

        for query in ["src/gateway.ts", "./src/gateway.ts", "src/../src/gateway.ts"] {
            let related = orch
                .find_related_files(Path::new(query), "shop", RelatedOptions::default())
                .await
                .unwrap();
            assert_eq!(files_of(&related), vec![PathBuf::from("src/billing.ts")], "{query}");
        }

        let chain = orch
            .find_related_files(
                Path::new("./src/gateway.ts"),
                "shop",
                RelatedOptions {
                    include_imports: false,
                    depth: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            chain.iter().map(|r| (r.file.clone(), r.depth)).collect::<Vec<_>>(),
            vec![(PathBuf::from("src/billing.ts"), 1), (PathBuf::from("src/refunds.ts"), 2)]
        );
    }

    #[tokio::test]
    async fn dot_prefixed_target_dir_keys_the_index_absolutely() {
        let dir = TempDir::new().unwrap();
        seed_shop(dir.path());
        let dotted = dir.path().join(".");
        let orch = orchestrator(AppConfig::default(), &dotted);
        let project = orch.registry().all()[0].clone();
        assert_eq!(project.root, dir.path());

        indexed(&orch, &project.name).await;
        let related = orch
            .find_related_files(Path::new("./src/gateway.ts"), &project.name, RelatedOptions::default())
            .await
            .unwrap();
        assert_eq!(files_of(&related), vec![PathBuf::from("src/billing.ts")]);

        let response = orch
            .search_knowledge("billing worker payments checkout", Some(&project.name), SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(response.hits[0].file, PathBuf::from("docs/payments.md"));
    }

    #[tokio::test]
    async fn cleared_caches_pick_up_new_importers() {
        let dir = TempDir::new().unwrap();
        seed_shop(dir.path());
        let orch = orchestrator(shop_config(dir.path()), dir.path());
        let lookup = || {
            orch.find_related_files(Path::new("src/gateway.ts"), "shop", RelatedOptions::default())
        };
        assert_eq!(lookup().await.unwrap().len(), 1);

        write(dir.path(), "src/refunds.ts", "import { capture } from './gateway';\n");
        assert_eq!(lookup().await.unwrap().len(), 1);

        orch.clear_caches().await;
        let related = lookup().await.unwrap();
        assert_eq!(related.len(), 2);
        assert!(related.iter().any(|r| r.file == PathBuf::from("src/refunds.ts")));
    }

    #[tokio::test]
    async fn freshness_survives_restart_via_index_file() {
        let dir = TempDir::new().unwrap();
        seed_shop(dir.path());
        {
            let orch = orchestrator(shop_config(dir.path()), dir.path());
            indexed(&orch, "shop").await;
            orch.shutdown().await;
        }

        let restarted = orchestrator(shop_config(dir.path()), dir.path());
        let project = restarted.registry().get("shop").unwrap();
        let fresh = restarted.freshness(project).await;
        assert!(fresh.last_indexed_at.is_some());
        assert!(fresh.index_age_seconds.unwrap() >= 0);
    }
}
