//! Static test extraction from a single Go source file.
//!
//! The file is parsed with tree-sitter-go; only free `function_declaration`
//! nodes directly under the root are candidates. Anything the grammar flags as
//! an error, plus the few top-level rules tree-sitter is lenient about (package
//! clause first, declarations only, one declaration per line unless separated
//! by `;`), is reported as a syntax error. Nothing is executed or type-checked.

use crate::error::{Result, TaskGenError};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use tree_sitter::{Node, Parser, Tree};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }

    fn at(node: Node<'_>, message: impl Into<String>) -> Self {
        Self::new(node.start_position().row + 1, message)
    }
}

/// Top-level node kinds a Go file may contain besides comments.
const DECLARATION_KINDS: &[&str] = &[
    "package_clause",
    "import_declaration",
    "function_declaration",
    "method_declaration",
    "const_declaration",
    "var_declaration",
    "type_declaration",
];

/// Names of free (receiver-less) top-level functions in `path` matching
/// `pattern`, in declaration order, first occurrence wins.
pub fn find_tests_in_file(path: &Path, pattern: &Regex) -> Result<Vec<String>> {
    let raw = std::fs::read(path)
        .map_err(|e| TaskGenError::io(format!("read {}", path.display()), e))?;
    let src = String::from_utf8(raw).map_err(|_| TaskGenError::Parse {
        path: path.to_path_buf(),
        line: 1,
        message: "invalid UTF-8 encoding".to_string(),
    })?;
    find_tests_in_source(&src, pattern).map_err(|e| TaskGenError::Parse {
        path: path.to_path_buf(),
        line: e.line,
        message: e.message,
    })
}

pub fn find_tests_in_source(
    src: &str,
    pattern: &Regex,
) -> std::result::Result<Vec<String>, SyntaxError> {
    let src = src.strip_prefix('\u{feff}').unwrap_or(src);
    let tree = parse_go(src)?;
    let root = tree.root_node();
    if let Some(bad) = first_error(root) {
        return Err(describe_error(bad, src));
    }

    let mut seen = HashSet::new();
    Ok(top_level_funcs(root, src)?
        .into_iter()
        .filter(|name| pattern.is_match(name))
        .filter(|name| seen.insert(name.clone()))
        .collect())
}

fn parse_go(src: &str) -> std::result::Result<Tree, SyntaxError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_go::LANGUAGE.into())
        .map_err(|e| SyntaxError::new(1, format!("Go grammar unavailable: {}", e)))?;
    parser
        .parse(src, None)
        .ok_or_else(|| SyntaxError::new(1, "parser returned no tree"))
}

/// Depth-first search for the first ERROR or MISSING node.
fn first_error<'t>(node: Node<'t>) -> Option<Node<'t>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(bad) = first_error(child) {
            return Some(bad);
        }
    }
    Some(node)
}

fn describe_error(node: Node<'_>, src: &str) -> SyntaxError {
    if node.is_missing() {
        return SyntaxError::at(node, format!("syntax error: missing {}", node.kind()));
    }
    let text = node.utf8_text(src.as_bytes()).unwrap_or_default();
    let snippet: String = text.lines().next().unwrap_or_default().chars().take(32).collect();
    SyntaxError::at(node, format!("syntax error: unexpected {:?}", snippet.trim()))
}

/// Walks the root's children and returns free function names in order.
///
/// Tree-sitter's Go grammar also accepts top-level statements, a missing
/// package clause and declarations sharing a line; `go/parser` rejects all
/// three, so they are checked here.
fn top_level_funcs(root: Node<'_>, src: &str) -> std::result::Result<Vec<String>, SyntaxError> {
    let mut names = Vec::new();
    let mut seen_package = false;
    // end row of the previous declaration until a `;` separates it
    let mut open_line: Option<usize> = None;

    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        let kind = child.kind();
        if kind == ";" || kind == "\n" {
            open_line = None;
            continue;
        }
        if kind == "comment" || !child.is_named() {
            continue;
        }

        if !DECLARATION_KINDS.contains(&kind) {
            return Err(SyntaxError::at(
                child,
                "syntax error: non-declaration statement outside function body",
            ));
        }
        if !seen_package {
            if kind != "package_clause" {
                return Err(SyntaxError::at(
                    child,
                    "expected 'package', found declaration",
                ));
            }
            seen_package = true;
        } else if kind == "package_clause" {
            return Err(SyntaxError::at(child, "syntax error: duplicate package clause"));
        }
        if open_line == Some(child.start_position().row) {
            return Err(SyntaxError::at(
                child,
                "syntax error: unexpected declaration after top level declaration",
            ));
        }
        open_line = Some(child.end_position().row);

        if kind == "function_declaration" {
            if let Some(name) = child.child_by_field_name("name") {
                let name = name.utf8_text(src.as_bytes()).unwrap_or_default();
                names.push(name.to_string());
            }
        }
    }

    if !seen_package {
        return Err(SyntaxError::new(1, "expected 'package', found EOF"));
    }
    Ok(names)
}
