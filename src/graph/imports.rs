//! Per-language import extraction and on-disk resolution.
//!
//! Each language has an ordered list of regex rules. A raw import path is
//! reported once per file, by the first rule that yields it. Relative
//! specifiers are resolved against the importing file's directory by
//! probing candidate suffixes; bare module names are kept as-is and left
//! unresolved.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::{DependencyEdge, ImportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lang {
    Script,
    Python,
    Rust,
    Go,
    Ruby,
    Jvm,
}

impl Lang {
    fn for_path(path: &Path) -> Option<Self> {
        let lang = match path.extension()?.to_str()? {
            "ts" | "tsx" | "js" | "jsx" | "mjs" | "cjs" => Self::Script,
            "py" => Self::Python,
            "rs" => Self::Rust,
            "go" => Self::Go,
            "rb" => Self::Ruby,
            "java" | "kt" | "scala" => Self::Jvm,
            _ => return None,
        };
        Some(lang)
    }

    /// Suffixes tried after the literal path when resolving a relative import.
    fn candidates(self) -> &'static [&'static str] {
        match self {
            Self::Script => &[
                ".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", "/index.ts", "/index.tsx",
                "/index.js", "/index.jsx", "/index.mjs", "/index.cjs",
            ],
            Self::Python => &[".py", "/__init__.py"],
            Self::Rust => &[".rs", "/mod.rs"],
            Self::Ruby => &[".rb"],
            Self::Go | Self::Jvm => &[],
        }
    }
}

/// How a rule's capture group turns into raw import paths.
#[derive(Clone, Copy)]
enum Capture {
    /// Group 1 is the import path.
    Single,
    /// Group 1 is a comma separated list (`import os, sys as system`).
    List,
    /// Group 1 is a parenthesised block of quoted paths (Go).
    QuotedBlock,
    /// Group 1 is a path that is always relative to the file (`require_relative`).
    Relative,
    /// Group 1 is a Rust `mod` name.
    RustMod,
}

struct Rule {
    regex: Regex,
    kind: ImportKind,
    capture: Capture,
}

fn rule(pattern: &str, kind: ImportKind, capture: Capture) -> Rule {
    Rule {
        regex: Regex::new(pattern).expect("import rule patterns are valid"),
        kind,
        capture,
    }
}

static SCRIPT_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            r#"(?m)^\s*export\s+(?:type\s+)?(?:\*(?:\s+as\s+\w+)?|\{[^}]*\})\s*from\s*['"]([^'"]+)['"]"#,
            ImportKind::ReExport,
            Capture::Single,
        ),
        rule(
            r#"\bimport\s[^;'"()]*?\bfrom\s*['"]([^'"]+)['"]"#,
            ImportKind::Static,
            Capture::Single,
        ),
        rule(r#"(?m)^\s*import\s*['"]([^'"]+)['"]"#, ImportKind::Static, Capture::Single),
        rule(
            r#"\bimport\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
            ImportKind::Dynamic,
            Capture::Single,
        ),
        rule(
            r#"\brequire\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
            ImportKind::Static,
            Capture::Single,
        ),
    ]
});

static PYTHON_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(r"(?m)^\s*from\s+(\.*[\w.]*)\s+import\b", ImportKind::Static, Capture::Single),
        rule(r"(?m)^\s*import\s+([^\n#;]+)", ImportKind::Static, Capture::List),
    ]
});

static RUST_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(\w+)\s*;",
            ImportKind::Static,
            Capture::RustMod,
        ),
        rule(
            r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+((?:\w+::)*\w+)",
            ImportKind::Static,
            Capture::Single,
        ),
    ]
});

static GO_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            r#"(?m)^\s*import\s+(?:[\w.]+\s+)?"([^"]+)""#,
            ImportKind::Static,
            Capture::Single,
        ),
        rule(r"(?m)^\s*import\s*\(([^)]*)\)", ImportKind::Static, Capture::QuotedBlock),
    ]
});

static RUBY_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            r#"(?m)^\s*require_relative\s*\(?\s*['"]([^'"]+)['"]"#,
            ImportKind::Static,
            Capture::Relative,
        ),
        rule(
            r#"(?m)^\s*require\s*\(?\s*['"]([^'"]+)['"]"#,
            ImportKind::Static,
            Capture::Single,
        ),
    ]
});

static JVM_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![rule(
        r"(?m)^\s*import\s+(?:static\s+)?(\w+(?:\.\w+)*(?:\.\*)?)",
        ImportKind::Static,
        Capture::Single,
    )]
});

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)""#).expect("quoted path pattern is valid"));

fn rules_for(lang: Lang) -> &'static [Rule] {
    match lang {
        Lang::Script => &SCRIPT_RULES,
        Lang::Python => &PYTHON_RULES,
        Lang::Rust => &RUST_RULES,
        Lang::Go => &GO_RULES,
        Lang::Ruby => &RUBY_RULES,
        Lang::Jvm => &JVM_RULES,
    }
}

/// Extract the import edges of one file. `path` should be absolute so that
/// resolved targets are too. Files in unsupported languages yield nothing.
pub fn parse_imports(path: &Path, content: &str) -> Vec<DependencyEdge> {
    let Some(lang) = Lang::for_path(path) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut edges = Vec::new();
    for rule in rules_for(lang) {
        for caps in rule.regex.captures_iter(content) {
            let Some(group) = caps.get(1) else { continue };
            for raw in raw_paths(rule.capture, group.as_str()) {
                if !seen.insert(raw.clone()) {
                    continue;
                }
                let (target, resolved) = resolve(lang, rule.capture, path, &raw);
                edges.push(DependencyEdge {
                    source: path.to_path_buf(),
                    target,
                    import_kind: rule.kind,
                    raw_import_path: raw,
                    resolved,
                });
            }
        }
    }
    edges
}

fn raw_paths(capture: Capture, text: &str) -> Vec<String> {
    match capture {
        Capture::List => text
            .split(',')
            .filter_map(|item| item.split_whitespace().next())
            .map(String::from)
            .collect(),
        Capture::QuotedBlock => QUOTED
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect(),
        Capture::Single | Capture::Relative | Capture::RustMod => {
            let raw = text.trim();
            if raw.is_empty() {
                Vec::new()
            } else {
                vec![raw.to_string()]
            }
        }
    }
}

fn resolve(lang: Lang, capture: Capture, source: &Path, raw: &str) -> (PathBuf, bool) {
    let dir = source.parent().unwrap_or(Path::new(""));
    match capture {
        Capture::RustMod => resolve_rust_mod(source, raw),
        Capture::Relative => resolve_relative(&dir.join(raw), lang),
        _ if lang == Lang::Python && raw.starts_with('.') => {
            resolve_relative(&python_relative(dir, raw), lang)
        }
        _ if is_path_like(raw) && lang != Lang::Python => resolve_relative(&dir.join(raw), lang),
        _ => (PathBuf::from(raw), false),
    }
}

fn is_path_like(raw: &str) -> bool {
    raw.starts_with("./") || raw.starts_with("../") || raw.starts_with('/')
}

/// `..pkg.mod` relative to `dir`: one dot is the current package, each
/// further dot climbs one directory.
fn python_relative(dir: &Path, raw: &str) -> PathBuf {
    let module = raw.trim_start_matches('.');
    let levels = raw.len() - module.len();
    let mut base = dir.to_path_buf();
    for _ in 1..levels {
        base.push("..");
    }
    if !module.is_empty() {
        base.push(module.replace('.', "/"));
    }
    base
}

fn resolve_relative(joined: &Path, lang: Lang) -> (PathBuf, bool) {
    let joined = normalize(joined);
    if joined.extension().is_some() && joined.is_file() {
        return (joined, true);
    }
    let base = joined.to_string_lossy();
    for suffix in lang.candidates() {
        let candidate = PathBuf::from(format!("{base}{suffix}"));
        if candidate.is_file() {
            return (candidate, true);
        }
    }
    (joined, false)
}

/// `mod x;` lives beside crate roots and `mod.rs` files, and in the
/// `<stem>/` directory of any other module file.
fn resolve_rust_mod(source: &Path, name: &str) -> (PathBuf, bool) {
    let dir = source.parent().unwrap_or(Path::new(""));
    let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let module_dir = match stem {
        "lib" | "main" | "mod" => dir.to_path_buf(),
        other => dir.join(other),
    };
    let file = module_dir.join(format!("{name}.rs"));
    if file.is_file() {
        return (file, true);
    }
    let nested = module_dir.join(name).join("mod.rs");
    if nested.is_file() {
        return (nested, true);
    }
    (file, false)
}

/// Lexically collapse `.` and `..` components.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "").unwrap();
        path
    }

    fn raws(edges: &[DependencyEdge]) -> Vec<&str> {
        edges.iter().map(|e| e.raw_import_path.as_str()).collect()
    }

    #[test]
    fn typescript_import_forms() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let app = touch(root, "src/app.ts");
        let utils = touch(root, "src/utils.ts");
        let widgets = touch(root, "src/widgets/index.tsx");

        let content = r#"
import { helper } from './utils';
import React from "react";
import './styles.css';
export * from './widgets';
const lazy = () => import('./missing');
const fs = require('fs');
import {
  a,
  b,
} from './utils';
"#;
        let edges = parse_imports(&app, content);
        assert_eq!(
            raws(&edges),
            vec!["./widgets", "./utils", "react", "./styles.css", "./missing", "fs"]
        );

        let widgets_edge = &edges[0];
        assert_eq!(widgets_edge.import_kind, ImportKind::ReExport);
        assert!(widgets_edge.resolved);
        assert_eq!(widgets_edge.target, widgets);

        assert_eq!(edges[1].target, utils);
        assert!(edges[1].resolved);

        assert_eq!(edges[2].target, PathBuf::from("react"));
        assert!(!edges[2].resolved);

        // Relative but absent: best-effort absolute target.
        assert!(!edges[3].resolved);
        assert_eq!(edges[3].target, root.join("src/styles.css"));

        assert_eq!(edges[4].import_kind, ImportKind::Dynamic);
        assert_eq!(edges[4].target, root.join("src/missing"));
    }

    #[test]
    fn unterminated_exports_do_not_swallow_later_imports() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let app = touch(root, "src/app.ts");
        touch(root, "src/b.ts");
        touch(root, "src/c.ts");

        let content = "export const a = 1\nimport b from './b'\nexport {\n  c,\n} from './c'\nexport type { T } from './types'\n";
        let edges = parse_imports(&app, content);
        let kinds: Vec<_> = edges
            .iter()
            .map(|e| (e.raw_import_path.as_str(), e.import_kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("./c", ImportKind::ReExport),
                ("./types", ImportKind::ReExport),
                ("./b", ImportKind::Static),
            ]
        );
    }

    #[test]
    fn parent_directory_imports_are_normalized() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let page = touch(root, "src/pages/home.js");
        let api = touch(root, "src/lib/api.js");

        let edges = parse_imports(&page, "const api = require('../lib/api');\n");
        assert_eq!(edges.len(), 1);
        assert!(edges[0].resolved);
        assert_eq!(edges[0].target, api);
    }

    #[test]
    fn python_absolute_and_relative() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let views = touch(root, "pkg/web/views.py");
        let models = touch(root, "pkg/web/models.py");
        let core = touch(root, "pkg/core/__init__.py");

        let content = "\
import os, sys as system
from . import models
from .models import User
from ..core import settings
from collections import OrderedDict
";
        let edges = parse_imports(&views, content);
        assert_eq!(raws(&edges), vec![".", ".models", "..core", "collections", "os", "sys"]);

        // `from . import` points at the package itself, which has no __init__.py here.
        assert!(!edges[0].resolved);
        assert_eq!(edges[1].target, models);
        assert!(edges[1].resolved);
        assert_eq!(edges[2].target, core);
        assert!(edges[2].resolved);
        assert_eq!(edges[3].target, PathBuf::from("collections"));
        assert!(!edges[4].resolved);
    }

    #[test]
    fn rust_mod_declarations_resolve_on_disk() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let lib = touch(root, "src/lib.rs");
        let config = touch(root, "src/config.rs");
        let server = touch(root, "src/server/mod.rs");
        let handlers = touch(root, "src/config/handlers.rs");

        let content = "\
pub mod config;
mod server;
mod absent;
use std::collections::HashMap;
pub(crate) use crate::config::Settings;
";
        let edges = parse_imports(&lib, content);
        assert_eq!(
            raws(&edges),
            vec!["config", "server", "absent", "std::collections::HashMap", "crate::config::Settings"]
        );
        assert_eq!(edges[0].target, config);
        assert_eq!(edges[1].target, server);
        assert!(!edges[2].resolved);
        assert_eq!(edges[2].target, root.join("src/absent.rs"));
        assert!(!edges[3].resolved);

        let nested = parse_imports(&config, "mod handlers;\n");
        assert_eq!(nested[0].target, handlers);
        assert!(nested[0].resolved);
    }

    #[test]
    fn go_single_and_block_imports() {
        let content = r#"
package main

import "fmt"
import (
    "os"
    str "strings"
)
"#;
        let edges = parse_imports(Path::new("/p/main.go"), content);
        assert_eq!(raws(&edges), vec!["fmt", "os", "strings"]);
        assert!(edges.iter().all(|e| !e.resolved));
    }

    #[test]
    fn ruby_require_relative() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let app = touch(root, "lib/app.rb");
        let helper = touch(root, "lib/support/helper.rb");

        let content = "require 'json'\nrequire_relative 'support/helper'\n";
        let edges = parse_imports(&app, content);
        assert_eq!(raws(&edges), vec!["support/helper", "json"]);
        assert_eq!(edges[0].target, helper);
        assert!(edges[0].resolved);
        assert!(!edges[1].resolved);
    }

    #[test]
    fn jvm_imports_are_bare() {
        let content = "import java.util.List;\nimport static org.junit.Assert.*;\n";
        let edges = parse_imports(Path::new("/p/Main.java"), content);
        assert_eq!(raws(&edges), vec!["java.util.List", "org.junit.Assert.*"]);
    }

    #[test]
    fn unsupported_extension_yields_nothing() {
        assert!(parse_imports(Path::new("/p/README.md"), "import x from './y'").is_empty());
    }
}
