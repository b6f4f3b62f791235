use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{self, AppConfig};
use crate::error::{AppError, Result};
use crate::graph::imports::normalize;
use crate::index::IndexKind;

/// A project vizier knows about, with every path it derives resolved.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub name: String,
    pub root: PathBuf,
    pub semantic_search: bool,
    pub model_id: String,
    pub data_dir: PathBuf,
}

impl Project {
    pub fn index_path(&self, kind: IndexKind) -> PathBuf {
        self.data_dir.join("index").join(kind.file_name())
    }

    /// `path` relative to the project root, or unchanged when outside it.
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

pub struct ProjectRegistry {
    projects: Vec<Project>,
}

impl ProjectRegistry {
    /// Projects from `[[projects]]`, or the target directory alone when none
    /// are configured. Relative roots are taken from `target_dir`; every root
    /// ends up absolute with `.` and `..` collapsed.
    pub fn from_config(cfg: &AppConfig, target_dir: &Path) -> Self {
        let base = absolute_root(target_dir);
        let projects = if cfg.projects.is_empty() {
            let name = base
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("default")
                .to_string();
            vec![Project {
                name,
                data_dir: config::data_dir(&base),
                root: base,
                semantic_search: true,
                model_id: cfg.embed.model_id.clone(),
            }]
        } else {
            cfg.projects
                .iter()
                .map(|p| {
                    let root = normalize(&base.join(&p.root));
                    Project {
                        name: p.name.clone(),
                        data_dir: config::data_dir(&root),
                        root,
                        semantic_search: p.semantic_search,
                        model_id: p.model_id.clone().unwrap_or_else(|| cfg.embed.model_id.clone()),
                    }
                })
                .collect()
        };
        Self { projects }
    }

    pub fn get(&self, name: &str) -> Result<&Project> {
        self.projects
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| AppError::ProjectNotFound(name.to_string()))
    }

    /// The named project, or the only one when no name is given.
    pub fn resolve(&self, name: Option<&str>) -> Result<&Project> {
        match (name, self.projects.as_slice()) {
            (Some(name), _) => self.get(name),
            (None, [only]) => Ok(only),
            (None, many) => Err(AppError::AmbiguousProject(many.len())),
        }
    }

    pub fn all(&self) -> &[Project] {
        &self.projects
    }

    /// One named project, or every project when `name` is `None`.
    pub fn scope(&self, name: Option<&str>) -> Result<Vec<&Project>> {
        match name {
            Some(name) => Ok(vec![self.get(name)?]),
            None => Ok(self.projects.iter().collect()),
        }
    }

    /// The project with the longest root that contains `path`.
    pub fn containing(&self, path: &Path) -> Option<&Project> {
        self.projects
            .iter()
            .filter(|p| path.starts_with(&p.root))
            .max_by_key(|p| p.root.components().count())
    }
}

/// `path` made absolute against the working directory and lexically
/// normalized. Symlinks are left alone so roots that do not exist yet work.
fn absolute_root(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|e| {
        tracing::warn!("cannot make {} absolute: {e}", path.display());
        path.to_path_buf()
    });
    normalize(&absolute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;

    fn cfg_with(projects: Vec<ProjectConfig>) -> AppConfig {
        AppConfig {
            projects,
            ..AppConfig::default()
        }
    }

    #[test]
    fn target_dir_is_the_default_project() {
        let registry = ProjectRegistry::from_config(&cfg_with(vec![]), Path::new("/work/shop"));
        let project = registry.get("shop").unwrap();
        assert_eq!(project.root, PathBuf::from("/work/shop"));
        assert_eq!(project.data_dir, PathBuf::from("/work/shop/.vizier"));
        assert_eq!(
            project.index_path(IndexKind::Code),
            PathBuf::from("/work/shop/.vizier/index/code.json")
        );
        assert!(project.semantic_search);
        assert_eq!(registry.resolve(None).unwrap().name, "shop");
        assert_eq!(project.model_id, AppConfig::default().embed.model_id);
    }

    #[test]
    fn configured_projects_resolve_roots_and_models() {
        let registry = ProjectRegistry::from_config(
            &cfg_with(vec![
                ProjectConfig {
                    name: "api".into(),
                    root: "services/api".into(),
                    semantic_search: true,
                    model_id: Some("local/tiny".into()),
                },
                ProjectConfig {
                    name: "docs".into(),
                    root: "/srv/docs".into(),
                    semantic_search: false,
                    model_id: None,
                },
            ]),
            Path::new("/work"),
        );

        let api = registry.get("api").unwrap();
        assert_eq!(api.root, PathBuf::from("/work/services/api"));
        assert_eq!(api.model_id, "local/tiny");
        assert!(!registry.get("docs").unwrap().semantic_search);

        assert!(matches!(registry.get("web"), Err(AppError::ProjectNotFound(_))));
        assert_eq!(registry.scope(None).unwrap().len(), 2);
        assert!(registry.scope(Some("web")).is_err());
        assert!(matches!(registry.resolve(None), Err(AppError::AmbiguousProject(2))));
        assert_eq!(registry.resolve(Some("docs")).unwrap().name, "docs");

        let owner = registry.containing(Path::new("/work/services/api/src/main.rs")).unwrap();
        assert_eq!(owner.name, "api");
        assert_eq!(owner.relative(Path::new("/work/services/api/src/main.rs")), PathBuf::from("src/main.rs"));
        assert!(registry.containing(Path::new("/elsewhere/x.rs")).is_none());
    }

    #[test]
    fn roots_are_absolute_and_collapsed() {
        let registry = ProjectRegistry::from_config(
            &cfg_with(vec![
                ProjectConfig {
                    name: "api".into(),
                    root: "./services/../api".into(),
                    semantic_search: true,
                    model_id: None,
                },
                ProjectConfig {
                    name: "web".into(),
                    root: "/srv/sub/../web/.".into(),
                    semantic_search: true,
                    model_id: None,
                },
            ]),
            Path::new("/work/./tools/.."),
        );
        let api = registry.get("api").unwrap();
        assert_eq!(api.root, PathBuf::from("/work/api"));
        assert_eq!(api.data_dir, PathBuf::from("/work/api/.vizier"));
        assert_eq!(registry.get("web").unwrap().root, PathBuf::from("/srv/web"));
        assert_eq!(
            registry.containing(Path::new("/work/api/src/lib.rs")).unwrap().name,
            "api"
        );

        let cwd = std::env::current_dir().unwrap();
        let here = ProjectRegistry::from_config(&cfg_with(vec![]), Path::new("."));
        let project = &here.all()[0];
        assert!(project.root.is_absolute());
        assert_eq!(project.root, normalize(&cwd));
        assert_ne!(project.name, "default");
    }
}
