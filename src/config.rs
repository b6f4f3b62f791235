use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub embed: EmbedConfig,
    pub index: IndexConfig,
    pub graph: GraphConfig,
    pub search: SearchConfig,
    pub server: ServerConfig,
    /// Projects served by this process. When empty, the target directory is
    /// registered as a single project named after its directory.
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// HuggingFace model ID to use for embeddings.
    /// Defaults to "nomic-ai/CodeRankEmbed" (~550 MB, downloaded on first run).
    pub model_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Target window size in characters
    pub chunk_size: usize,
    /// Characters shared between consecutive windows
    pub chunk_overlap: usize,
    /// Windows whose trimmed text is shorter than this are dropped
    pub min_chunk: usize,
    /// Minimum wall-clock interval between debounced index saves
    pub save_interval_ms: u64,
    /// The indexing walk yields to the runtime every this many files
    pub yield_every: usize,
    /// Extensions fed to the knowledge index (code extensions are added on top)
    pub knowledge_extensions: Vec<String>,
    /// Extensions additionally fed to the line-aware code index
    pub code_extensions: Vec<String>,
    /// Directory names never descended into
    pub skip_dirs: Vec<String>,
    /// Glob patterns for paths to exclude from indexing
    pub default_excludes: Vec<String>,
    /// How long a parsed .gitignore stays cached when the file is unchanged
    pub skip_rules_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Lifetime of a cached dependency graph scan
    pub cache_ttl_secs: u64,
    /// Extensions considered by the dependency scanner
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub max_tokens: Option<usize>,
    pub min_score: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Re-index projects when their files change
    pub watch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub root: PathBuf,
    #[serde(default = "default_true")]
    pub semantic_search: bool,
    /// Overrides `embed.model_id` for this project
    #[serde(default)]
    pub model_id: Option<String>,
}

fn default_true() -> bool {
    true
}

impl IndexConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms)
    }

    pub fn is_code_extension(&self, ext: &str) -> bool {
        self.code_extensions.iter().any(|e| e == ext)
    }

    /// Every extension the indexing walk picks up.
    pub fn all_extensions(&self) -> Vec<String> {
        let mut exts = self.knowledge_extensions.clone();
        for ext in &self.code_extensions {
            if !exts.contains(ext) {
                exts.push(ext.clone());
            }
        }
        exts
    }
}

fn code_extensions() -> Vec<String> {
    [
        "rs", "py", "js", "cjs", "mjs", "jsx", "ts", "tsx", "go", "java", "cs", "fs", "fsx",
        "scala", "sc", "hs", "rb",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            embed: EmbedConfig {
                model_id: "nomic-ai/CodeRankEmbed".into(),
            },
            index: IndexConfig {
                chunk_size: 1000,
                chunk_overlap: 100,
                min_chunk: 50,
                save_interval_ms: 1000,
                yield_every: 10,
                knowledge_extensions: vec![
                    "md".into(),
                    "mdx".into(),
                    "txt".into(),
                    "rst".into(),
                    "adoc".into(),
                    "toml".into(),
                    "yaml".into(),
                    "yml".into(),
                ],
                code_extensions: code_extensions(),
                skip_dirs: vec![
                    "node_modules".into(),
                    "target".into(),
                    "dist".into(),
                    "build".into(),
                    "vendor".into(),
                    "__pycache__".into(),
                    "venv".into(),
                    "coverage".into(),
                ],
                default_excludes: vec![
                    // Haskell: Cabal and Stack
                    "dist-newstyle/**".into(),
                    // C# / F# (MSBuild)
                    "**/bin/Debug/**".into(),
                    "**/bin/Release/**".into(),
                    "**/obj/**".into(),
                    // Lock files carry no knowledge worth embedding
                    "**/*.lock".into(),
                ],
                skip_rules_ttl_secs: 30,
            },
            graph: GraphConfig {
                cache_ttl_secs: 30,
                extensions: vec![
                    "ts".into(),
                    "tsx".into(),
                    "js".into(),
                    "jsx".into(),
                    "mjs".into(),
                    "cjs".into(),
                    "py".into(),
                    "rs".into(),
                    "go".into(),
                    "rb".into(),
                    "java".into(),
                    "kt".into(),
                    "scala".into(),
                ],
            },
            search: SearchConfig {
                default_limit: 10,
                max_tokens: None,
                min_score: None,
            },
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 7420,
                watch: true,
            },
            projects: Vec::new(),
        }
    }
}

/// Returns the default global config path: ~/.vizier/vizier.toml
pub fn global_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vizier")
        .join("vizier.toml")
}

/// Returns the data directory of a project: <root>/.vizier
pub fn data_dir(project_root: &Path) -> PathBuf {
    project_root.join(".vizier")
}

/// Ensures the global config file exists, creating it with defaults on first launch.
/// Does nothing if the file already exists.
pub fn ensure_global_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_GLOBAL_CONFIG)?;
    Ok(())
}

const DEFAULT_GLOBAL_CONFIG: &str = r#"# vizier global configuration
# This file was created automatically. Edit as needed.
# Project-level overrides go in vizier.toml in the project directory.

[embed]
model_id = "nomic-ai/CodeRankEmbed"   # ~550 MB, downloaded from HuggingFace Hub on first run

[index]
chunk_size = 1000
chunk_overlap = 100
min_chunk = 50
save_interval_ms = 1000
yield_every = 10

[graph]
cache_ttl_secs = 30

[search]
default_limit = 10

[server]
host = "127.0.0.1"
port = 7420
watch = true

# [[projects]]
# name = "my-app"
# root = "/path/to/my-app"
# semantic_search = true
"#;

/// Load configuration using figment's layered system:
/// 1. Built-in Rust defaults (AppConfig::default)
/// 2. Global config file (~/.vizier/vizier.toml), silently ignored if missing
/// 3. Project config file (<target-dir>/vizier.toml), only merged if Some
/// 4. Environment variables prefixed with VIZIER_ (nested with __)
///    e.g. VIZIER_EMBED__MODEL_ID=nomic-ai/CodeRankEmbed
pub fn load(global_config: &Path, project_config: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(global_config));

    if let Some(proj) = project_config {
        figment = figment.merge(Toml::file(proj));
    }

    let config = figment
        .merge(Env::prefixed("VIZIER_").split("__"))
        .extract()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn project_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let global = dir.path().join("global.toml");
        let project = dir.path().join("vizier.toml");
        std::fs::write(&global, "[index]\nchunk_size = 800\n").unwrap();
        std::fs::write(
            &project,
            "[search]\ndefault_limit = 3\n\n[[projects]]\nname = \"app\"\nroot = \"/srv/app\"\nsemantic_search = false\n",
        )
        .unwrap();

        let cfg = load(&global, Some(&project)).unwrap();
        assert_eq!(cfg.index.chunk_size, 800);
        assert_eq!(cfg.index.chunk_overlap, 100);
        assert_eq!(cfg.search.default_limit, 3);
        assert_eq!(cfg.projects.len(), 1);
        assert!(!cfg.projects[0].semantic_search);
        assert!(cfg.projects[0].model_id.is_none());
    }

    #[test]
    fn missing_global_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = load(&dir.path().join("absent.toml"), None).unwrap();
        assert_eq!(cfg.embed.model_id, "nomic-ai/CodeRankEmbed");
        assert!(cfg.index.is_code_extension("rs"));
        assert!(!cfg.index.is_code_extension("md"));
        assert!(cfg.index.all_extensions().contains(&"md".to_string()));
    }
}
