use std::path::Path;
use tree_sitter::{Language, Node, Parser};

#[cfg(test)]
#[path = "parser_tests.rs"]
mod parser_tests;

/// Labels a source position with the definitions that enclose it.
pub trait ContextExtractor: Send + Sync {
    /// `line` is 1-based. Returns e.g. `"Stack::push"`, or `None` when the
    /// line sits outside any recognised definition.
    fn extract_context(&self, content: &str, line: u32, language: &str) -> Option<String>;
}

// ── per-language node kinds that represent meaningful definitions ────────────

const RUST_KINDS: &[&str] = &[
    "function_item",
    "impl_item",
    "struct_item",
    "enum_item",
    "trait_item",
    "type_item",
    "const_item",
    "static_item",
    "mod_item",
    "macro_definition",
    "union_item",
];

const PYTHON_KINDS: &[&str] = &["function_definition", "class_definition"];

const JAVA_KINDS: &[&str] = &[
    "method_declaration",
    "class_declaration",
    "interface_declaration",
    "enum_declaration",
    "record_declaration",
    "annotation_type_declaration",
    "constructor_declaration",
];

const CSHARP_KINDS: &[&str] = &[
    "method_declaration",
    "class_declaration",
    "interface_declaration",
    "struct_declaration",
    "enum_declaration",
    "record_declaration",
    "delegate_declaration",
    "property_declaration",
    "constructor_declaration",
    "namespace_declaration",
];

const SCALA_KINDS: &[&str] = &[
    "function_definition",
    "class_definition",
    "object_definition",
    "trait_definition",
    "enum_definition",
    "given_definition",
    "extension_definition",
    "type_definition",
];

const HASKELL_KINDS: &[&str] = &[
    "function",
    "data_type",
    "newtype",
    "class",
    "instance_decl",
    "type_synomym",
    "type_family",
];

const JS_KINDS: &[&str] = &[
    "function_declaration",
    "class_declaration",
    "method_definition",
    "generator_function_declaration",
];

const TS_KINDS: &[&str] = &[
    "function_declaration",
    "class_declaration",
    "method_definition",
    "interface_declaration",
    "type_alias_declaration",
    "enum_declaration",
];

const GO_KINDS: &[&str] = &[
    "function_declaration",
    "method_declaration",
    "type_declaration",
];

const RUBY_KINDS: &[&str] = &["method", "class", "module", "singleton_method", "singleton_class"];

const FSHARP_KINDS: &[&str] = &["value_declaration", "type_defn", "module_defn", "namespace"];

// ─────────────────────────────────────────────────────────────────────────────

/// Language name for a source file, derived from its extension.
pub fn language_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension().and_then(|e| e.to_str())?;
    let lang = match ext {
        "rs" => "rust",
        "py" => "python",
        "java" => "java",
        "cs" => "csharp",
        "scala" | "sc" => "scala",
        "hs" => "haskell",
        "js" | "cjs" | "mjs" | "jsx" => "javascript",
        "ts" => "typescript",
        "tsx" => "tsx",
        "go" => "go",
        "rb" => "ruby",
        "fs" | "fsx" => "fsharp",
        _ => return None,
    };
    Some(lang)
}

fn grammar_for(language: &str) -> Option<(Language, &'static [&'static str])> {
    let grammar = match language {
        "rust" => (tree_sitter_rust::LANGUAGE.into(), RUST_KINDS),
        "python" => (tree_sitter_python::LANGUAGE.into(), PYTHON_KINDS),
        "java" => (tree_sitter_java::LANGUAGE.into(), JAVA_KINDS),
        "csharp" => (tree_sitter_c_sharp::LANGUAGE.into(), CSHARP_KINDS),
        "scala" => (tree_sitter_scala::LANGUAGE.into(), SCALA_KINDS),
        "haskell" => (tree_sitter_haskell::LANGUAGE.into(), HASKELL_KINDS),
        "javascript" => (tree_sitter_javascript::LANGUAGE.into(), JS_KINDS),
        "typescript" => (tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(), TS_KINDS),
        "tsx" => (tree_sitter_typescript::LANGUAGE_TSX.into(), TS_KINDS),
        "go" => (tree_sitter_go::LANGUAGE.into(), GO_KINDS),
        "ruby" => (tree_sitter_ruby::LANGUAGE.into(), RUBY_KINDS),
        "fsharp" => (tree_sitter_fsharp::LANGUAGE_FSHARP.into(), FSHARP_KINDS),
        _ => return None,
    };
    Some(grammar)
}

/// Tree-sitter backed [`ContextExtractor`]. Each call parses the whole file.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeSitterContext;

impl ContextExtractor for TreeSitterContext {
    fn extract_context(&self, content: &str, line: u32, language: &str) -> Option<String> {
        let (grammar, kinds) = grammar_for(language)?;
        let mut parser = Parser::new();
        parser.set_language(&grammar).ok()?;
        let tree = parser.parse(content, None)?;

        let row = line.checked_sub(1)? as usize;
        let names = enclosing_names(tree.root_node(), content, row, kinds);
        if names.is_empty() {
            None
        } else {
            Some(names.join("::"))
        }
    }
}

/// Descend from `root` through the children that span `row`, collecting the
/// names of definition nodes on the way down (outermost first).
fn enclosing_names(root: Node, content: &str, row: usize, kinds: &[&str]) -> Vec<String> {
    let mut names = Vec::new();
    let mut node = root;

    'descend: loop {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.start_position().row <= row && row <= child.end_position().row {
                if kinds.contains(&child.kind()) {
                    let name = get_node_name(&child, content);
                    if !name.is_empty() {
                        names.push(name);
                    }
                }
                node = child;
                continue 'descend;
            }
        }
        break;
    }

    names
}

/// Try to extract a human-readable name for a definition node. Returns an
/// empty string if none is found.
fn get_node_name(node: &Node, content: &str) -> String {
    // Grammars that expose a `name` field; Rust impl blocks name their `type`.
    for field in ["name", "type"] {
        if let Some(child) = node.child_by_field_name(field) {
            let text = &content[child.byte_range()];
            let bare = text.split('<').next().unwrap_or(text).trim();
            if !bare.is_empty() {
                return bare.to_string();
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            // Most languages: identifier or type-identifier node kinds
            "identifier" | "type_identifier" | "simple_identifier" | "name" => {
                return content[child.byte_range()].to_string();
            }
            // Ruby: class/module names are `constant` nodes
            "constant" => {
                return content[child.byte_range()].to_string();
            }
            // Haskell: function names are `variable` nodes
            "variable" => {
                return content[child.byte_range()].to_string();
            }
            // F#: function name is the first word of function_declaration_left /
            // value_declaration_left (e.g. "pow (b: int) (e: int)" → "pow")
            "function_declaration_left" | "value_declaration_left" => {
                let text = &content[child.byte_range()];
                return text.split_whitespace().next().unwrap_or("").to_string();
            }
            // F#: value_declaration wraps function_or_value_defn; delegate one level down
            "function_or_value_defn" => {
                let name = get_node_name(&child, content);
                if !name.is_empty() {
                    return name;
                }
            }
            _ => continue,
        }
    }
    String::new()
}
