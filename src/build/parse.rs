//! Mapping raw toolchain output to structured diagnostics.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::util::last_lines;

static TSC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\((\d+),(\d+)\):\s*error\s+(TS\d+):\s*(.+)$").unwrap()
});

static GCC_STYLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?):(\d+):(\d+):\s*(?:fatal\s+)?error(?:\[\w+\])?:?\s*(.+)$").unwrap()
});

static BARE_ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:error|Error|ERROR)(?:\[\w+\])?:\s*(.+)$").unwrap()
});

static RUST_LOCATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*-->\s*(.+?):(\d+):(\d+)").unwrap());

static WEBPACK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ERROR in\s+(.+)$").unwrap());

/// Number of trailing lines kept when no line matches a known format.
const FALLBACK_LINES: usize = 20;

/// One structured compiler/build error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDiagnostic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl BuildDiagnostic {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            file: None,
            line: None,
            column: None,
            code: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for BuildDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}", file)?;
            if let Some(line) = self.line {
                write!(f, ":{}", line)?;
                if let Some(column) = self.column {
                    write!(f, ":{}", column)?;
                }
            }
            write!(f, ": ")?;
        }
        if let Some(code) = &self.code {
            write!(f, "{}: ", code)?;
        }
        write!(f, "{}", self.message)
    }
}

fn parse_u32(s: &str) -> Option<u32> {
    s.parse().ok()
}

/// Extract diagnostics from build output.
///
/// Falls back to the trailing lines of stderr (or stdout) when `failed` and nothing
/// matched, so a failing build never reports zero errors.
pub fn parse_build_output(stdout: &str, stderr: &str, failed: bool) -> Vec<BuildDiagnostic> {
    let mut diagnostics: Vec<BuildDiagnostic> = Vec::new();

    for text in [stderr, stdout] {
        let lines: Vec<&str> = text.lines().collect();
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i].trim_end();
            let parsed = if let Some(cap) = TSC_REGEX.captures(line) {
                Some(BuildDiagnostic {
                    file: Some(cap[1].trim().to_string()),
                    line: parse_u32(&cap[2]),
                    column: parse_u32(&cap[3]),
                    code: Some(cap[4].to_string()),
                    message: cap[5].trim().to_string(),
                })
            } else if let Some(cap) = GCC_STYLE_REGEX.captures(line) {
                Some(BuildDiagnostic {
                    file: Some(cap[1].trim().to_string()),
                    line: parse_u32(&cap[2]),
                    column: parse_u32(&cap[3]),
                    code: None,
                    message: cap[4].trim().to_string(),
                })
            } else if let Some(cap) = WEBPACK_REGEX.captures(line) {
                let detail = lines.get(i + 1).map(|l| l.trim()).unwrap_or("");
                Some(BuildDiagnostic {
                    file: Some(cap[1].trim().to_string()),
                    line: None,
                    column: None,
                    code: None,
                    message: if detail.is_empty() {
                        "build error".to_string()
                    } else {
                        detail.to_string()
                    },
                })
            } else if let Some(cap) = BARE_ERROR_REGEX.captures(line) {
                let mut diag = BuildDiagnostic::message(cap[1].trim());
                // rustc prints the location on a following ` --> file:l:c` line
                if let Some(loc) = lines
                    .get(i + 1)
                    .and_then(|next| RUST_LOCATION_REGEX.captures(next))
                {
                    diag.file = Some(loc[1].to_string());
                    diag.line = parse_u32(&loc[2]);
                    diag.column = parse_u32(&loc[3]);
                }
                Some(diag)
            } else {
                None
            };

            if let Some(diag) = parsed {
                if !diagnostics.contains(&diag) {
                    diagnostics.push(diag);
                }
            }
            i += 1;
        }
    }

    if diagnostics.is_empty() && failed {
        let source = if stderr.trim().is_empty() { stdout } else { stderr };
        diagnostics = last_lines(source, FALLBACK_LINES)
            .into_iter()
            .map(BuildDiagnostic::message)
            .collect();
        if diagnostics.is_empty() {
            diagnostics.push(BuildDiagnostic::message(
                "build failed without output",
            ));
        }
    }

    diagnostics
}
