//! Type-level checks for TypeScript sources.
//!
//! These findings carry a configurable severity, unlike syntax, import and conflict
//! findings which always block.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::findings::{Finding, FindingCategory, Severity};
use super::syntax::line_of;
use crate::manifest::FileManifest;

static TYPE_DEF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*export\s+(?:declare\s+)?(?:const\s+)?(interface|type|enum)\s+([A-Za-z_$][\w$]*)")
        .unwrap()
});

static EXPLICIT_ANY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?::\s*any\b|\bas\s+any\b|<any>)").unwrap());

static SUPPRESSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@ts-(ignore|nocheck)\b").unwrap());

fn is_typescript(path: &str) -> bool {
    path.ends_with(".ts") || path.ends_with(".tsx")
}

/// Run type checks over `candidates` (paths of the current story) within `combined`
/// (accepted files with the candidates laid over them).
pub fn check_types(
    candidates: &[&str],
    combined: &FileManifest,
    severity: Severity,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    // Exported type names -> defining files, across the whole tree
    let mut definitions: BTreeMap<String, Vec<(String, &'static str)>> = BTreeMap::new();
    for file in combined.iter().filter(|f| is_typescript(&f.path)) {
        for cap in TYPE_DEF_REGEX.captures_iter(&file.content) {
            let kind = match &cap[1] {
                "interface" => "interface",
                "type" => "type",
                _ => "enum",
            };
            definitions
                .entry(cap[2].to_string())
                .or_default()
                .push((file.path.clone(), kind));
        }
    }

    for (name, defs) in &definitions {
        if defs.len() < 2 {
            continue;
        }
        for (path, kind) in defs {
            if !candidates.contains(&path.as_str()) {
                continue;
            }
            let others: Vec<&str> = defs
                .iter()
                .filter(|(p, _)| p != path)
                .map(|(p, _)| p.as_str())
                .collect();
            if others.is_empty() {
                // Declaration merging within one file
                continue;
            }
            findings.push(Finding::new(
                severity,
                FindingCategory::Type,
                path.clone(),
                format!(
                    "Exported {} '{}' conflicts with a definition in {}",
                    kind,
                    name,
                    others.join(", ")
                ),
            ));
        }
    }

    for path in candidates.iter().filter(|p| is_typescript(p)) {
        let Some(file) = combined.get(path) else {
            continue;
        };
        for m in SUPPRESSION_REGEX.find_iter(&file.content) {
            findings.push(
                Finding::new(
                    severity,
                    FindingCategory::Type,
                    *path,
                    format!("Type checking suppressed with {}", m.as_str()),
                )
                .with_line(line_of(&file.content, m.start())),
            );
        }
        for m in EXPLICIT_ANY_REGEX.find_iter(&file.content) {
            findings.push(
                Finding::new(severity, FindingCategory::Type, *path, "Explicit 'any' type")
                    .with_line(line_of(&file.content, m.start())),
            );
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{AcceptedFile, content_hash};

    fn manifest(files: &[(&str, &str, &str)]) -> FileManifest {
        let mut m = FileManifest::new();
        for (path, content, story) in files {
            m.insert(AcceptedFile {
                path: path.to_string(),
                content: content.to_string(),
                content_hash: content_hash(content),
                story_id: story.to_string(),
            });
        }
        m
    }

    #[test]
    fn test_conflicting_type_definitions() {
        let combined = manifest(&[
            ("src/types.ts", "export interface User { id: string }\n", "S1"),
            ("src/user.ts", "export type User = { name: string };\n", "S2"),
        ]);
        let findings = check_types(&["src/user.ts"], &combined, Severity::Blocking);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].file, "src/user.ts");
        assert!(findings[0].message.contains("'User'"));
        assert!(findings[0].message.contains("src/types.ts"));
    }

    #[test]
    fn test_interface_merging_in_one_file_is_fine() {
        let combined = manifest(&[(
            "src/types.ts",
            "export interface A { x: 1 }\nexport interface A { y: 2 }\n",
            "S1",
        )]);
        assert!(check_types(&["src/types.ts"], &combined, Severity::Blocking).is_empty());
    }

    #[test]
    fn test_any_and_suppressions_use_configured_severity() {
        let combined = manifest(&[(
            "src/a.ts",
            "// @ts-ignore\nconst x: any = 1;\nconst y = x as any;\n",
            "S1",
        )]);
        let findings = check_types(&["src/a.ts"], &combined, Severity::Warning);
        assert_eq!(findings.len(), 3);
        assert!(findings.iter().all(|f| f.severity == Severity::Warning));
        assert_eq!(findings[0].line, Some(1));
    }

    #[test]
    fn test_accepted_files_are_not_rechecked() {
        let combined = manifest(&[("src/old.ts", "const x: any = 1;\n", "S1")]);
        assert!(check_types(&[], &combined, Severity::Blocking).is_empty());
    }

    #[test]
    fn test_javascript_is_skipped() {
        let combined = manifest(&[("src/a.js", "const x = y as any;\n", "S1")]);
        assert!(check_types(&["src/a.js"], &combined, Severity::Blocking).is_empty());
    }
}
