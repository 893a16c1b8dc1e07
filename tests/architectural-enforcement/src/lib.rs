//! Architectural Enforcement
//!
//! Source scanners used by the integration tests in `tests/`. They read the
//! data layer crates as text and flag patterns that do not belong in
//! production code:
//! - sleeping instead of waiting on I/O or an interval
//! - blocking I/O inside async functions and async blocks
//!
//! `#[cfg(test)]` items are skipped, as are `//` comments. The scanner
//! counts braces, so it assumes braces inside string literals are balanced.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: [&str; 2] = ["datalayer/core/src", "datalayer/cli/src"];

#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Every `.rs` file under `dir`, in a stable order
#[must_use]
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// A line of production code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine<'a> {
    /// 1-based line number
    pub number: usize,
    /// Line text with any `//` comment removed
    pub code: &'a str,
    /// Inside an `async fn` or `async` block
    pub in_async: bool,
}

/// A flagged line, rendered as `path:line - reason: code`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: PathBuf,
    pub line: usize,
    pub reason: &'static str,
    pub code: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.reason,
            self.code.trim()
        )
    }
}

struct Scope {
    /// Brace depth when the scope's keyword was seen
    depth: usize,
    is_async: bool,
    opened: bool,
}

fn strip_comment(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

fn opens_fn(code: &str) -> bool {
    code.trim_start().starts_with("fn ") || code.contains(" fn ")
}

fn opens_async_block(code: &str) -> bool {
    code.contains("async move {") || code.contains("async {")
}

/// Production lines of one file, with async context
#[must_use]
pub fn production_lines(content: &str) -> Vec<SourceLine<'_>> {
    let mut lines = Vec::new();
    let mut depth = 0usize;
    let mut scopes: Vec<Scope> = Vec::new();

    let mut pending_test_item = false;
    let mut test_item_depth: Option<usize> = None;

    for (idx, raw) in content.lines().enumerate() {
        let code = strip_comment(raw);
        let trimmed = code.trim();

        if test_item_depth.is_none() && trimmed.starts_with("#[cfg(test)]") {
            pending_test_item = true;
            continue;
        }

        let skipping = test_item_depth.is_some() || pending_test_item;

        if !skipping {
            if opens_fn(code) {
                scopes.push(Scope {
                    depth,
                    is_async: code.contains("async fn "),
                    opened: false,
                });
            } else if opens_async_block(code) {
                scopes.push(Scope {
                    depth,
                    is_async: true,
                    opened: false,
                });
            }

            lines.push(SourceLine {
                number: idx + 1,
                code,
                in_async: scopes.iter().any(|s| s.is_async),
            });
        }

        if pending_test_item {
            if code.contains('{') {
                test_item_depth = Some(depth);
                pending_test_item = false;
            } else if trimmed.ends_with(';') {
                pending_test_item = false;
            }
        }

        for ch in code.chars() {
            match ch {
                '{' => {
                    if let Some(scope) = scopes.last_mut() {
                        if !scope.opened && scope.depth == depth {
                            scope.opened = true;
                        }
                    }
                    depth += 1;
                }
                '}' => {
                    depth = depth.saturating_sub(1);
                    while scopes.last().is_some_and(|s| s.opened && s.depth == depth) {
                        scopes.pop();
                    }
                    if test_item_depth == Some(depth) {
                        test_item_depth = None;
                    }
                }
                ';' => {
                    // Bodiless declaration, e.g. a trait method signature
                    if scopes.last().is_some_and(|s| !s.opened && s.depth == depth) {
                        scopes.pop();
                    }
                }
                _ => {}
            }
        }
    }

    lines
}

/// Scan every production file with `check`
///
/// # Panics
///
/// Panics if a production directory is missing, so a moved crate cannot
/// silently disable the scan.
pub fn scan_production<F>(mut check: F) -> Vec<Violation>
where
    F: FnMut(&SourceLine<'_>) -> Option<&'static str>,
{
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.is_dir(), "production directory missing: {}", path.display());

        for file in rust_files(&path) {
            let Ok(content) = fs::read_to_string(&file) else {
                continue;
            };
            for line in production_lines(&content) {
                if let Some(reason) = check(&line) {
                    violations.push(Violation {
                        path: file.clone(),
                        line: line.number,
                        reason,
                        code: line.code.to_string(),
                    });
                }
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn async_lines(src: &str) -> Vec<usize> {
        production_lines(src)
            .into_iter()
            .filter(|l| l.in_async)
            .map(|l| l.number)
            .collect()
    }

    fn numbers(src: &str) -> Vec<usize> {
        production_lines(src).iter().map(|l| l.number).collect()
    }

    #[test]
    fn test_cfg_test_module_is_skipped() {
        let src = [
            "fn a() {}",
            "#[cfg(test)]",
            "mod tests {",
            "    fn b() {",
            "        x();",
            "    }",
            "}",
            "fn c() {}",
        ]
        .join("\n");
        assert_eq!(numbers(&src), vec![1, 8]);
    }

    #[test]
    fn test_cfg_test_declaration_is_skipped() {
        let src = ["#[cfg(test)]", "pub(crate) mod test_utils;", "fn a() {}"].join("\n");
        assert_eq!(numbers(&src), vec![3]);
    }

    #[test]
    fn test_async_fn_body_detected() {
        let src = [
            "pub async fn run(",
            "    x: u8,",
            ") -> u8 {",
            "    io();",
            "}",
            "fn sync() {",
            "    io();",
            "}",
        ]
        .join("\n");
        assert_eq!(async_lines(&src), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_async_block_inside_sync_fn() {
        let src = [
            "fn drop(&mut self) {",
            "    handle.spawn(async move {",
            "        io();",
            "    });",
            "    after();",
            "}",
        ]
        .join("\n");
        assert_eq!(async_lines(&src), vec![2, 3, 4]);
    }

    #[test]
    fn test_trait_signature_does_not_leak_async() {
        let src = [
            "trait T {",
            "    async fn a(&self) -> u8;",
            "    fn b(&self) {",
            "        io();",
            "    }",
            "}",
        ]
        .join("\n");
        assert_eq!(async_lines(&src), vec![2]);
    }

    #[test]
    fn test_comments_are_stripped() {
        let src = "fn a() {\n    x(); // tokio::time::sleep(d)\n}\n";
        let lines = production_lines(src);
        assert!(!lines[1].code.contains("sleep"));
    }
}
