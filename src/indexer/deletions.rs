use std::path::{Path, PathBuf};

/// Reports files known to have been deleted outside of vizier's view.
pub trait DeletionSource: Send + Sync {
    fn list_deleted_paths(&self, data_dir: &Path) -> Vec<PathBuf>;
}

/// Reads `deleted-paths.json` (a JSON array of absolute paths) from the
/// project data directory. A missing or malformed file reports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeletedPathsFile;

pub const DELETED_PATHS_FILE: &str = "deleted-paths.json";

impl DeletionSource for DeletedPathsFile {
    fn list_deleted_paths(&self, data_dir: &Path) -> Vec<PathBuf> {
        let path = data_dir.join(DELETED_PATHS_FILE);
        let Ok(bytes) = std::fs::read(&path) else {
            return Vec::new();
        };
        match serde_json::from_slice::<Vec<PathBuf>>(&bytes) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!("ignoring malformed {}: {e}", path.display());
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reads_listed_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(DELETED_PATHS_FILE),
            r#"["/p/old.md", "/p/src/gone.rs"]"#,
        )
        .unwrap();
        let paths = DeletedPathsFile.list_deleted_paths(dir.path());
        assert_eq!(paths, vec![PathBuf::from("/p/old.md"), PathBuf::from("/p/src/gone.rs")]);
    }

    #[test]
    fn missing_or_malformed_file_reports_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(DeletedPathsFile.list_deleted_paths(dir.path()).is_empty());
        std::fs::write(dir.path().join(DELETED_PATHS_FILE), "{oops").unwrap();
        assert!(DeletedPathsFile.list_deleted_paths(dir.path()).is_empty());
    }
}
