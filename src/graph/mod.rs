pub mod imports;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::Result;

pub use imports::parse_imports;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Static,
    Dynamic,
    ReExport,
}

/// One import statement. `target` is an absolute path when the import is
/// relative (resolved or not) and the raw module name otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyEdge {
    pub source: PathBuf,
    pub target: PathBuf,
    pub import_kind: ImportKind,
    pub raw_import_path: String,
    pub resolved: bool,
}

/// Immutable snapshot of a project's imports.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyGraph {
    pub files: BTreeSet<PathBuf>,
    pub edges: Vec<DependencyEdge>,
    pub built_at: DateTime<Utc>,
}

/// Parse every `(path, content)` pair independently.
pub fn build_graph(sources: &[(PathBuf, String)]) -> DependencyGraph {
    let mut files = BTreeSet::new();
    let mut edges = Vec::new();
    for (path, content) in sources {
        files.insert(path.clone());
        edges.extend(parse_imports(path, content));
    }
    DependencyGraph {
        files,
        edges,
        built_at: Utc::now(),
    }
}

/// Walk `root` (skipping dotfiles and `skip_dirs`) and build the graph of
/// every file with one of `extensions`. Unreadable files are left out.
pub fn scan_project(root: &Path, extensions: &[String], skip_dirs: &[String]) -> DependencyGraph {
    let sources: Vec<(PathBuf, String)> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || e.file_name()
                    .to_str()
                    .is_some_and(|n| !n.starts_with('.') && !skip_dirs.iter().any(|d| d == n))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| extensions.iter().any(|want| want == x))
        })
        .filter_map(|e| match std::fs::read_to_string(e.path()) {
            Ok(content) => Some((e.into_path(), content)),
            Err(err) => {
                tracing::debug!("graph: skipping {}: {err}", e.path().display());
                None
            }
        })
        .collect();

    let graph = build_graph(&sources);
    tracing::debug!(
        "graph: scanned {} ({} files, {} edges)",
        root.display(),
        graph.files.len(),
        graph.edges.len()
    );
    graph
}

#[derive(Debug, Clone, Copy)]
pub struct RelatedOptions {
    pub include_imports: bool,
    pub include_imported_by: bool,
    pub depth: usize,
}

impl Default for RelatedOptions {
    fn default() -> Self {
        Self {
            include_imports: true,
            include_imported_by: true,
            depth: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Imports,
    ImportedBy,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedFile {
    pub file: PathBuf,
    pub relationship: Relationship,
    pub import_path: String,
    pub depth: usize,
}

/// Breadth-first walk over resolved edges starting at `path`. Each file is
/// reported once, at the depth it was first reached; the start file never is.
pub fn find_related(path: &Path, graph: &DependencyGraph, options: RelatedOptions) -> Vec<RelatedFile> {
    let mut outgoing: HashMap<&Path, Vec<&DependencyEdge>> = HashMap::new();
    let mut incoming: HashMap<&Path, Vec<&DependencyEdge>> = HashMap::new();
    for edge in graph.edges.iter().filter(|e| e.resolved) {
        outgoing.entry(edge.source.as_path()).or_default().push(edge);
        incoming.entry(edge.target.as_path()).or_default().push(edge);
    }

    let mut visited: HashSet<&Path> = HashSet::from([path]);
    let mut queue: VecDeque<(&Path, usize)> = VecDeque::from([(path, 0)]);
    let mut related = Vec::new();

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= options.depth {
            continue;
        }
        if options.include_imports {
            for edge in outgoing.get(current).into_iter().flatten() {
                if visited.insert(edge.target.as_path()) {
                    related.push(RelatedFile {
                        file: edge.target.clone(),
                        relationship: Relationship::Imports,
                        import_path: edge.raw_import_path.clone(),
                        depth: depth + 1,
                    });
                    queue.push_back((edge.target.as_path(), depth + 1));
                }
            }
        }
        if options.include_imported_by {
            for edge in incoming.get(current).into_iter().flatten() {
                if visited.insert(edge.source.as_path()) {
                    related.push(RelatedFile {
                        file: edge.source.clone(),
                        relationship: Relationship::ImportedBy,
                        import_path: edge.raw_import_path.clone(),
                        depth: depth + 1,
                    });
                    queue.push_back((edge.source.as_path(), depth + 1));
                }
            }
        }
    }
    related
}

struct CachedGraph {
    graph: Arc<DependencyGraph>,
    built: Instant,
}

type Slot = Arc<tokio::sync::Mutex<Option<CachedGraph>>>;

/// Scan results per project root. Callers arriving while a root is being
/// scanned wait for that scan instead of starting their own.
pub struct GraphCache {
    ttl: Duration,
    extensions: Vec<String>,
    skip_dirs: Vec<String>,
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl GraphCache {
    pub fn new(ttl: Duration, extensions: Vec<String>, skip_dirs: Vec<String>) -> Self {
        Self {
            ttl,
            extensions,
            skip_dirs,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn graph_for(&self, root: &Path) -> Result<Arc<DependencyGraph>> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(root.to_path_buf()).or_default())
        };

        let mut entry = slot.lock().await;
        if let Some(cached) = entry.as_ref() {
            if cached.built.elapsed() < self.ttl {
                return Ok(Arc::clone(&cached.graph));
            }
        }

        let (scan_root, extensions, skip_dirs) =
            (root.to_path_buf(), self.extensions.clone(), self.skip_dirs.clone());
        let graph = tokio::task::spawn_blocking(move || scan_project(&scan_root, &extensions, &skip_dirs))
            .await
            .map_err(|e| anyhow::anyhow!("dependency scan of {} failed: {e}", root.display()))?;

        let graph = Arc::new(graph);
        *entry = Some(CachedGraph {
            graph: Arc::clone(&graph),
            built: Instant::now(),
        });
        Ok(graph)
    }

    pub fn invalidate(&self, root: &Path) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(root);
    }

    pub fn clear(&self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
