//! Per-file syntax checks.
//!
//! Structured formats (JSON, TOML, YAML) are parsed with their serde crates. Source
//! files get a delimiter balance scan that skips strings and comments.

use super::findings::{Finding, FindingCategory};
use crate::generate::GeneratedFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceKind {
    Json,
    Toml,
    Yaml,
    /// JavaScript / TypeScript family.
    Script,
    Css,
    Python,
    /// Rust, Go, Java, C and friends.
    CLike,
    Other,
}

pub(crate) fn source_kind(path: &str) -> SourceKind {
    let ext = path
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "json" => SourceKind::Json,
        "toml" => SourceKind::Toml,
        "yaml" | "yml" => SourceKind::Yaml,
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => SourceKind::Script,
        "css" | "scss" | "less" => SourceKind::Css,
        "py" => SourceKind::Python,
        "rs" | "go" | "java" | "c" | "h" | "cpp" | "hpp" | "cs" | "kt" | "swift" => {
            SourceKind::CLike
        }
        _ => SourceKind::Other,
    }
}

/// Check one file; returns blocking syntax findings.
pub fn check_file(file: &GeneratedFile) -> Vec<Finding> {
    let path = file.path.as_str();
    match source_kind(path) {
        SourceKind::Json => match serde_json::from_str::<serde_json::Value>(&file.content) {
            Ok(_) => Vec::new(),
            Err(e) => vec![
                Finding::blocking(FindingCategory::Syntax, path, format!("Invalid JSON: {}", e))
                    .with_line(e.line() as u32),
            ],
        },
        SourceKind::Toml => match toml::from_str::<toml::Table>(&file.content) {
            Ok(_) => Vec::new(),
            Err(e) => {
                let mut finding = Finding::blocking(
                    FindingCategory::Syntax,
                    path,
                    format!("Invalid TOML: {}", e.message()),
                );
                if let Some(span) = e.span() {
                    finding = finding.with_line(line_of(&file.content, span.start));
                }
                vec![finding]
            }
        },
        SourceKind::Yaml => match serde_yaml::from_str::<serde_yaml::Value>(&file.content) {
            Ok(_) => Vec::new(),
            Err(e) => {
                let mut finding =
                    Finding::blocking(FindingCategory::Syntax, path, format!("Invalid YAML: {}", e));
                if let Some(location) = e.location() {
                    finding = finding.with_line(location.line() as u32);
                }
                vec![finding]
            }
        },
        SourceKind::Other => Vec::new(),
        kind => check_delimiters(path, &file.content, kind),
    }
}

/// 1-based line of a byte offset.
pub(crate) fn line_of(content: &str, offset: usize) -> u32 {
    let offset = offset.min(content.len());
    content.as_bytes()[..offset]
        .iter()
        .filter(|&&b| b == b'\n')
        .count() as u32
        + 1
}

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

enum State {
    Code,
    LineComment,
    BlockComment { start: u32 },
    Str { quote: char, start: u32, triple: bool },
}

/// Scan for unbalanced `()[]{}` outside strings and comments.
fn check_delimiters(path: &str, content: &str, kind: SourceKind) -> Vec<Finding> {
    let slash_comments = matches!(kind, SourceKind::Script | SourceKind::Css | SourceKind::CLike);
    let line_slash_comments = matches!(kind, SourceKind::Script | SourceKind::CLike);
    let hash_comments = kind == SourceKind::Python;
    // Single-line quotes end at a newline without complaint: JSX text and
    // prose in templates regularly carry stray apostrophes.
    let quotes: &[char] = match kind {
        SourceKind::Script => &['"', '\'', '`'],
        SourceKind::Python => &['"', '\''],
        SourceKind::Css => &['"', '\''],
        _ => &['"'],
    };

    let chars: Vec<char> = content.chars().collect();
    let mut stack: Vec<(char, u32)> = Vec::new();
    let mut state = State::Code;
    let mut line: u32 = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match &mut state {
            State::Code => {
                if slash_comments && c == '/' && next == Some('*') {
                    state = State::BlockComment { start: line };
                    i += 1;
                } else if line_slash_comments && c == '/' && next == Some('/') {
                    state = State::LineComment;
                } else if hash_comments && c == '#' {
                    state = State::LineComment;
                } else if quotes.contains(&c) {
                    let triple = kind == SourceKind::Python
                        && next == Some(c)
                        && chars.get(i + 2) == Some(&c);
                    if triple {
                        i += 2;
                    }
                    state = State::Str {
                        quote: c,
                        start: line,
                        triple,
                    };
                } else if matches!(c, '(' | '[' | '{') {
                    stack.push((c, line));
                } else if matches!(c, ')' | ']' | '}') {
                    match stack.pop() {
                        Some((open, _)) if closer_for(open) == c => {}
                        Some((open, open_line)) => {
                            return vec![
                                Finding::blocking(
                                    FindingCategory::Syntax,
                                    path,
                                    format!(
                                        "Expected '{}' to close '{}' from line {}, found '{}'",
                                        closer_for(open),
                                        open,
                                        open_line,
                                        c
                                    ),
                                )
                                .with_line(line),
                            ];
                        }
                        None => {
                            return vec![
                                Finding::blocking(
                                    FindingCategory::Syntax,
                                    path,
                                    format!("Unexpected '{}'", c),
                                )
                                .with_line(line),
                            ];
                        }
                    }
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                }
            }
            State::BlockComment { .. } => {
                if c == '*' && next == Some('/') {
                    state = State::Code;
                    i += 1;
                }
            }
            State::Str { quote, triple, .. } => {
                let quote = *quote;
                if c == '\\' {
                    if next == Some('\n') {
                        line += 1;
                    }
                    i += 2;
                    continue;
                }
                if *triple {
                    if c == quote && next == Some(quote) && chars.get(i + 2) == Some(&quote) {
                        state = State::Code;
                        i += 2;
                    }
                } else if c == quote {
                    state = State::Code;
                } else if c == '\n' && quote != '`' && kind != SourceKind::CLike {
                    state = State::Code;
                }
            }
        }

        if c == '\n' {
            line += 1;
        }
        i += 1;
    }

    match state {
        State::BlockComment { start } => {
            return vec![
                Finding::blocking(FindingCategory::Syntax, path, "Unterminated block comment")
                    .with_line(start),
            ];
        }
        State::Str { start, .. } => {
            return vec![
                Finding::blocking(FindingCategory::Syntax, path, "Unterminated string literal")
                    .with_line(start),
            ];
        }
        _ => {}
    }

    if let Some((open, open_line)) = stack.pop() {
        return vec![
            Finding::blocking(
                FindingCategory::Syntax,
                path,
                format!("Unclosed '{}'", open),
            )
            .with_line(open_line),
        ];
    }

    Vec::new()
}
