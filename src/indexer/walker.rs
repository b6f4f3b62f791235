use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use glob::Pattern;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use walkdir::WalkDir;

/// Which paths under a project root the indexer must not touch: dotfiles,
/// configured directory names, glob excludes, and the root `.gitignore`.
pub struct SkipRules {
    root: PathBuf,
    gitignore: Gitignore,
    skip_dirs: Vec<String>,
    excludes: Vec<Pattern>,
}

impl SkipRules {
    pub fn load(root: &Path, skip_dirs: &[String], excludes: &[String]) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        let gitignore_path = root.join(".gitignore");
        if gitignore_path.is_file() {
            if let Some(err) = builder.add(&gitignore_path) {
                tracing::warn!("partially parsed {}: {err}", gitignore_path.display());
            }
        }
        let gitignore = builder.build().unwrap_or_else(|e| {
            tracing::warn!("ignoring {}: {e}", gitignore_path.display());
            Gitignore::empty()
        });

        Self {
            root: root.to_path_buf(),
            gitignore,
            skip_dirs: skip_dirs.to_vec(),
            excludes: excludes
                .iter()
                .filter_map(|g| Pattern::new(g).ok())
                .collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn skipped_name(&self, name: &str) -> bool {
        name.starts_with('.') || self.skip_dirs.iter().any(|d| d == name)
    }

    fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }

    pub fn should_skip_dir(&self, path: &Path) -> bool {
        let Some(rel) = self.relative(path) else {
            return false;
        };
        if rel.as_os_str().is_empty() {
            return false;
        }
        if rel
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.skipped_name(n))
        {
            return true;
        }
        // Prune directories covered by any exclude pattern
        let probe = format!("{}/x", rel.to_string_lossy());
        if self.excludes.iter().any(|p| p.matches(&probe)) {
            return true;
        }
        self.gitignore.matched(path, true).is_ignore()
    }

    /// True for files the indexer would never have picked up: dotfiles, files
    /// below a skipped directory, glob excludes and gitignored paths.
    pub fn should_skip_file(&self, path: &Path) -> bool {
        let Some(rel) = self.relative(path) else {
            return false;
        };
        let in_skipped_dir = rel
            .parent()
            .into_iter()
            .flat_map(|p| p.components())
            .any(|c| match c {
                Component::Normal(name) => name.to_str().is_some_and(|n| self.skipped_name(n)),
                _ => false,
            });
        if in_skipped_dir {
            return true;
        }
        if rel
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'))
        {
            return true;
        }
        let rel_str = rel.to_string_lossy();
        if self.excludes.iter().any(|p| p.matches(&rel_str)) {
            return true;
        }
        self.gitignore
            .matched_path_or_any_parents(path, false)
            .is_ignore()
    }
}

/// Collect all indexable files under `rules.root()` whose extension is in
/// `extensions`, in a stable order.
pub fn collect_files(rules: &SkipRules, extensions: &[String]) -> Vec<PathBuf> {
    WalkDir::new(rules.root())
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_type().is_dir() || !rules.should_skip_dir(e.path()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let path = e.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !extensions.iter().any(|e| e == ext) {
                return None;
            }
            if rules.should_skip_file(path) {
                return None;
            }
            Some(path.to_path_buf())
        })
        .collect()
}

struct CachedRules {
    rules: Arc<SkipRules>,
    loaded_at: Instant,
    gitignore_mtime: Option<SystemTime>,
}

/// Parsed [`SkipRules`] per project root. An entry is reused while it is
/// younger than the TTL and the root `.gitignore` keeps its mtime.
pub struct SkipRulesCache {
    ttl: Duration,
    skip_dirs: Vec<String>,
    excludes: Vec<String>,
    entries: Mutex<HashMap<PathBuf, CachedRules>>,
}

impl SkipRulesCache {
    pub fn new(ttl: Duration, skip_dirs: Vec<String>, excludes: Vec<String>) -> Self {
        Self {
            ttl,
            skip_dirs,
            excludes,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn rules_for(&self, root: &Path) -> Arc<SkipRules> {
        let mtime = gitignore_mtime(root);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = entries.get(root) {
            if cached.loaded_at.elapsed() < self.ttl && cached.gitignore_mtime == mtime {
                return Arc::clone(&cached.rules);
            }
        }

        let rules = Arc::new(SkipRules::load(root, &self.skip_dirs, &self.excludes));
        entries.insert(
            root.to_path_buf(),
            CachedRules {
                rules: Arc::clone(&rules),
                loaded_at: Instant::now(),
                gitignore_mtime: mtime,
            },
        );
        rules
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn gitignore_mtime(root: &Path) -> Option<SystemTime> {
    std::fs::metadata(root.join(".gitignore"))
        .and_then(|m| m.modified())
        .ok()
}
