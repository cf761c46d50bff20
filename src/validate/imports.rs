//! Import and export extraction for JavaScript/TypeScript (plus top-level Python names)
//! and module specifier resolution.

use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use super::syntax::line_of;

// Compile regexes once using LazyLock
static IMPORT_FROM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s+(type\s+)?([^;'"]*?)\s*from\s*['"]([^'"]+)['"]"#).unwrap()
});

static SIDE_EFFECT_IMPORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^[ \t]*import\s*['"]([^'"]+)['"]"#).unwrap());

static REEXPORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*export\s+(type\s+)?(\*(?:\s+as\s+[\w$]+)?|\{[^}]*\})\s*from\s*['"]([^'"]+)['"]"#)
        .unwrap()
});

static REQUIRE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:require|import)\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap()
});

static EXPORT_DECL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*export\s+(?:declare\s+)?(?:async\s+)?(?:abstract\s+)?(?:const|let|var|function\*?|class|interface|type|enum)\s+([A-Za-z_$][\w$]*)",
    )
    .unwrap()
});

static EXPORT_LIST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*export\s*(?:type\s+)?\{([^}]*)\}").unwrap());

static EXPORT_DEFAULT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*export\s+default\s+(?:async\s+)?(?:(?:function\*?|class)\s+)?([A-Za-z_$][\w$]*)?")
        .unwrap()
});

static MODULE_EXPORTS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"module\.exports\s*=\s*(\{[^}]*\})?").unwrap());

static EXPORTS_DOT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:module\.)?exports\.([A-Za-z_$][\w$]*)\s*=").unwrap());

static PY_TOP_LEVEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:async\s+def|def|class)\s+([A-Za-z_]\w*)|^([A-Za-z_]\w*)\s*(?::[^=\n]*)?=").unwrap()
});

/// Extensions tried when resolving a relative specifier, in order.
pub const RESOLUTION_SUFFIXES: &[&str] = &[
    "",
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    ".mjs",
    ".cjs",
    ".json",
    "/index.ts",
    "/index.tsx",
    "/index.js",
    "/index.jsx",
];

const NODE_BUILTINS: &[&str] = &[
    "assert", "buffer", "child_process", "cluster", "crypto", "dgram", "dns", "events", "fs",
    "http", "http2", "https", "module", "net", "os", "path", "perf_hooks", "process",
    "querystring", "readline", "stream", "string_decoder", "timers", "tls", "tty", "url", "util",
    "v8", "vm", "worker_threads", "zlib",
];

/// One import statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub specifier: String,
    /// Imported binding names as exported by the target; `default` for default imports.
    pub names: Vec<String>,
    pub line: u32,
    pub type_only: bool,
}

/// Names a module exports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSet {
    pub names: BTreeSet<String>,
    /// Number of default exports (including `module.exports = ...`).
    pub default_count: usize,
    /// Names given to default exports, when they have one.
    pub default_names: Vec<String>,
    /// Re-exports everything from another module, so named checks cannot be exact.
    pub has_star: bool,
}

impl ExportSet {
    pub fn exports(&self, name: &str) -> bool {
        if name == "default" {
            return self.default_count > 0;
        }
        self.has_star || self.names.contains(name)
    }
}

fn clause_names(clause: &str) -> Vec<String> {
    let clause = clause.trim();
    let mut names = Vec::new();
    let (before_brace, braced) = match (clause.find('{'), clause.rfind('}')) {
        (Some(open), Some(close)) if close > open => (&clause[..open], Some(&clause[open + 1..close])),
        _ => (clause, None),
    };

    for part in before_brace.split(',') {
        let part = part.trim();
        if part.is_empty() || part.starts_with('*') {
            continue;
        }
        names.push("default".to_string());
    }

    if let Some(braced) = braced {
        for item in braced.split(',') {
            let item = item.trim().trim_start_matches("type ").trim();
            if item.is_empty() {
                continue;
            }
            let source = item.split_whitespace().next().unwrap_or(item);
            names.push(source.to_string());
        }
    }
    names
}

/// Every import in a script file, in source order.
pub fn extract_imports(content: &str) -> Vec<ImportRef> {
    let mut imports = Vec::new();

    for cap in IMPORT_FROM_REGEX.captures_iter(content) {
        let start = cap.get(0).map_or(0, |m| m.start());
        imports.push(ImportRef {
            specifier: cap[3].to_string(),
            names: clause_names(&cap[2]),
            line: line_of(content, start),
            type_only: cap.get(1).is_some(),
        });
    }
    for cap in SIDE_EFFECT_IMPORT_REGEX.captures_iter(content) {
        let start = cap.get(0).map_or(0, |m| m.start());
        imports.push(ImportRef {
            specifier: cap[1].to_string(),
            names: Vec::new(),
            line: line_of(content, start),
            type_only: false,
        });
    }
    for cap in REEXPORT_REGEX.captures_iter(content) {
        let start = cap.get(0).map_or(0, |m| m.start());
        let names = if cap[2].starts_with('{') {
            clause_names(&cap[2])
        } else {
            Vec::new()
        };
        imports.push(ImportRef {
            specifier: cap[3].to_string(),
            names,
            line: line_of(content, start),
            type_only: cap.get(1).is_some(),
        });
    }
    for cap in REQUIRE_REGEX.captures_iter(content) {
        let start = cap.get(0).map_or(0, |m| m.start());
        imports.push(ImportRef {
            specifier: cap[1].to_string(),
            names: Vec::new(),
            line: line_of(content, start),
            type_only: false,
        });
    }

    imports.sort_by_key(|i| i.line);
    imports
}

/// Exported names of a script module.
pub fn extract_exports(content: &str) -> ExportSet {
    let mut set = ExportSet::default();

    for cap in EXPORT_DECL_REGEX.captures_iter(content) {
        set.names.insert(cap[1].to_string());
    }
    for cap in EXPORT_LIST_REGEX.captures_iter(content) {
        for item in cap[1].split(',') {
            let item = item.trim().trim_start_matches("type ").trim();
            if item.is_empty() {
                continue;
            }
            let exported = item.split_whitespace().last().unwrap_or(item);
            if exported == "default" {
                set.default_count += 1;
            } else {
                set.names.insert(exported.to_string());
            }
        }
    }
    for cap in REEXPORT_REGEX.captures_iter(content) {
        if cap[2].starts_with('*') {
            match cap[2].split_whitespace().last() {
                Some(ns) if ns != "*" => {
                    set.names.insert(ns.to_string());
                }
                _ => set.has_star = true,
            }
        }
    }
    for cap in EXPORT_DEFAULT_REGEX.captures_iter(content) {
        set.default_count += 1;
        if let Some(name) = cap.get(1) {
            if !matches!(name.as_str(), "function" | "class" | "async" | "new" | "await") {
                set.default_names.push(name.as_str().to_string());
            }
        }
    }
    for cap in MODULE_EXPORTS_REGEX.captures_iter(content) {
        match cap.get(1) {
            Some(object) => {
                let inner = object.as_str().trim_matches(|c| c == '{' || c == '}');
                for entry in inner.split(',') {
                    let key = entry.split(':').next().unwrap_or("").trim();
                    if !key.is_empty() {
                        set.names.insert(key.to_string());
                    }
                }
            }
            None => set.default_count += 1,
        }
    }
    for cap in EXPORTS_DOT_REGEX.captures_iter(content) {
        set.names.insert(cap[1].to_string());
    }

    set
}

/// Top-level definitions of a Python module.
pub fn extract_python_names(content: &str) -> ExportSet {
    let mut set = ExportSet::default();
    for cap in PY_TOP_LEVEL_REGEX.captures_iter(content) {
        if let Some(name) = cap.get(1).or_else(|| cap.get(2)) {
            set.names.insert(name.as_str().to_string());
        }
    }
    set
}

pub fn is_relative(specifier: &str) -> bool {
    specifier == "." || specifier == ".." || specifier.starts_with("./") || specifier.starts_with("../")
}

/// Path aliases such as `@/components` or `~/lib` are resolved by bundler config.
pub fn is_alias(specifier: &str) -> bool {
    specifier.starts_with("@/") || specifier.starts_with("~/") || specifier.starts_with('#')
}

pub fn is_builtin(specifier: &str) -> bool {
    if specifier.starts_with("node:") || specifier.starts_with("bun:") {
        return true;
    }
    let root = specifier.split('/').next().unwrap_or(specifier);
    NODE_BUILTINS.contains(&root)
}

/// Package name of a bare specifier: `@scope/pkg/sub` -> `@scope/pkg`, `pkg/sub` -> `pkg`.
pub fn package_name(specifier: &str) -> String {
    let mut parts = specifier.split('/');
    match parts.next() {
        Some(scope) if scope.starts_with('@') => match parts.next() {
            Some(name) => format!("{}/{}", scope, name),
            None => scope.to_string(),
        },
        Some(name) => name.to_string(),
        None => specifier.to_string(),
    }
}

/// Join a relative specifier onto the importing file's directory.
///
/// Returns `None` when the result would climb above the project root.
pub fn join_relative(importer: &str, specifier: &str) -> Option<String> {
    let mut parts: Vec<&str> = importer.split('/').collect();
    parts.pop();
    for seg in specifier.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

/// Resolve a relative specifier against a set of known paths.
pub fn resolve(importer: &str, specifier: &str, known: &HashSet<&str>) -> Option<String> {
    let base = join_relative(importer, specifier)?;
    RESOLUTION_SUFFIXES.iter().find_map(|suffix| {
        let candidate = if base.is_empty() {
            suffix.trim_start_matches('/').to_string()
        } else {
            format!("{}{}", base, suffix)
        };
        known.contains(candidate.as_str()).then_some(candidate)
    })
}

/// Declared packages of a package.json document.
pub fn declared_packages(package_json: &str) -> Option<HashSet<String>> {
    let value: serde_json::Value = serde_json::from_str(package_json).ok()?;
    let mut packages = HashSet::new();
    if let Some(name) = value.get("name").and_then(|n| n.as_str()) {
        packages.insert(name.to_string());
    }
    for section in [
        "dependencies",
        "devDependencies",
        "peerDependencies",
        "optionalDependencies",
    ] {
        if let Some(map) = value.get(section).and_then(|s| s.as_object()) {
            packages.extend(map.keys().cloned());
        }
    }
    Some(packages)
}
