use std::path::PathBuf;

use serde::Serialize;

use crate::indexer::walker::{SkipRules, collect_files};

/// Matching lines kept per file.
pub const MAX_LINES_PER_FILE: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct LiteralMatch {
    /// Relative to the project root
    pub file: PathBuf,
    /// 1-based
    pub line: usize,
    pub text: String,
}

/// Case-insensitive substring scan of every eligible file under the rules'
/// root. Stops once `max_files` files have matched.
pub fn literal_search(
    rules: &SkipRules,
    extensions: &[String],
    query: &str,
    max_files: usize,
) -> Vec<LiteralMatch> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() || max_files == 0 {
        return Vec::new();
    }

    let mut matches = Vec::new();
    let mut files_matched = 0;
    for path in collect_files(rules, extensions) {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let rel = path
            .strip_prefix(rules.root())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|_| path.clone());

        let before = matches.len();
        matches.extend(
            content
                .lines()
                .enumerate()
                .filter(|(_, line)| line.to_lowercase().contains(&needle))
                .take(MAX_LINES_PER_FILE)
                .map(|(i, line)| LiteralMatch {
                    file: rel.clone(),
                    line: i + 1,
                    text: line.trim().to_string(),
                }),
        );
        if matches.len() > before {
            files_matched += 1;
            if files_matched >= max_files {
                break;
            }
        }
    }
    matches
}
