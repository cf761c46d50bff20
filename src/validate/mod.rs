//! Story validation: static checks over a story's candidate files plus the accepted set.
//!
//! Checks run in order and stop after the first stage that produced a blocking finding:
//!
//! 1. **Syntax** - per-file parse or delimiter balance
//! 2. **Imports/exports** - declared component exports exist, relative imports resolve,
//!    imported names are exported, bare packages are declared in package.json
//! 3. **Conflicts** - no path claimed with two different hashes
//! 4. **Types** - configurable severity

pub mod findings;
pub mod imports;
pub mod syntax;
pub mod types;

pub use findings::{Finding, FindingCategory, Severity, ValidationResult};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::generate::GeneratedFile;
use crate::manifest::FileManifest;
use crate::story::{ComponentSpec, UserStory};
use imports::{ExportSet, extract_exports, extract_imports, extract_python_names};
use syntax::{SourceKind, source_kind};

/// `[validation]` section of storyforge.toml.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Severity of type-level findings.
    pub type_severity: Severity,
    /// Glob patterns of paths several stories may rewrite (e.g. `package.json`).
    pub shared_paths: Vec<String>,
    /// Check bare imports against package.json when one exists.
    pub check_packages: bool,
    /// Findings kept per category; the rest are summarized.
    pub max_findings_per_category: usize,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            type_severity: Severity::Blocking,
            shared_paths: Vec::new(),
            check_packages: true,
            max_findings_per_category: 20,
        }
    }
}

/// Exports of a file, if its language has a notion of exports.
pub(crate) fn exports_of(path: &str, content: &str) -> Option<ExportSet> {
    match source_kind(path) {
        SourceKind::Script => Some(extract_exports(content)),
        SourceKind::Python => Some(extract_python_names(content)),
        _ => None,
    }
}

/// Union of packages declared by every package.json in the tree, if any exists.
pub(crate) fn declared_packages(combined: &FileManifest) -> Option<HashSet<String>> {
    let mut found = false;
    let mut packages = HashSet::new();
    for file in combined
        .iter()
        .filter(|f| f.path == "package.json" || f.path.ends_with("/package.json"))
    {
        if let Some(declared) = imports::declared_packages(&file.content) {
            found = true;
            packages.extend(declared);
        }
    }
    found.then_some(packages)
}

pub struct StoryValidator {
    policy: ValidationPolicy,
    shared: Vec<glob::Pattern>,
}

impl StoryValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        let shared = policy
            .shared_paths
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "Ignoring invalid shared path pattern");
                    None
                }
            })
            .collect();
        Self { policy, shared }
    }

    fn is_shared(&self, path: &str) -> bool {
        self.shared.iter().any(|p| p.matches(path))
    }

    /// Validate one attempt's candidates against the accepted file set.
    pub fn validate(
        &self,
        story: &UserStory,
        components: &[ComponentSpec],
        candidates: &[GeneratedFile],
        accepted: &FileManifest,
    ) -> ValidationResult {
        if candidates.is_empty() {
            return ValidationResult::from_findings(
                &story.id,
                vec![Finding::blocking(
                    FindingCategory::Dependency,
                    "",
                    "Story produced no files",
                )],
            );
        }

        let combined = accepted.overlay(candidates);
        let paths: Vec<&str> = candidates.iter().map(|f| f.path.as_str()).collect();

        let mut findings = Vec::new();
        for stage in 0..4 {
            let stage_findings = match stage {
                0 => self.check_syntax(candidates),
                1 => self.check_imports_exports(components, candidates, &combined),
                2 => self.check_conflicts(story, candidates, accepted),
                _ => types::check_types(&paths, &combined, self.policy.type_severity),
            };
            let blocked = stage_findings.iter().any(|f| f.severity.is_blocking());
            findings.extend(stage_findings);
            if blocked {
                break;
            }
        }

        let findings = self.cap_findings(findings);
        debug!(
            story_id = %story.id,
            findings = findings.len(),
            "Validation complete"
        );
        ValidationResult::from_findings(&story.id, findings)
    }

    fn check_syntax(&self, candidates: &[GeneratedFile]) -> Vec<Finding> {
        candidates.iter().flat_map(syntax::check_file).collect()
    }

    fn check_imports_exports(
        &self,
        components: &[ComponentSpec],
        candidates: &[GeneratedFile],
        combined: &FileManifest,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();

        // Declared component exports must exist in the component's file, emitted now
        // or accepted from an earlier story
        for component in components {
            let Some(file) = combined.get(&component.file_path) else {
                findings.push(Finding::blocking(
                    FindingCategory::Dependency,
                    component.file_path.clone(),
                    format!(
                        "Component '{}' was not emitted at {}",
                        component.name, component.file_path
                    ),
                ));
                continue;
            };
            let exports = exports_of(&file.path, &file.content);
            for name in &component.exports {
                let present = match &exports {
                    Some(set) => set.exports(name),
                    None => file.content.contains(name.as_str()),
                };
                if !present {
                    findings.push(Finding::blocking(
                        FindingCategory::Export,
                        file.path.clone(),
                        format!("Declared export '{}' of '{}' is missing", name, component.name),
                    ));
                }
            }
        }

        let known: HashSet<&str> = combined.paths().collect();
        let packages = if self.policy.check_packages {
            declared_packages(combined)
        } else {
            None
        };

        for file in candidates
            .iter()
            .filter(|f| source_kind(&f.path) == SourceKind::Script)
        {
            for import in extract_imports(&file.content) {
                let spec = import.specifier.as_str();
                if imports::is_relative(spec) {
                    let Some(target) = imports::resolve(&file.path, spec, &known) else {
                        findings.push(
                            Finding::blocking(
                                FindingCategory::Import,
                                file.path.clone(),
                                format!("Cannot resolve import '{}'", spec),
                            )
                            .with_line(import.line),
                        );
                        continue;
                    };
                    let Some(target_file) = combined.get(&target) else {
                        continue;
                    };
                    let Some(exports) = exports_of(&target, &target_file.content) else {
                        continue;
                    };
                    for name in &import.names {
                        if !exports.exports(name) {
                            findings.push(
                                Finding::blocking(
                                    FindingCategory::Import,
                                    file.path.clone(),
                                    format!("'{}' is not exported by {}", name, target),
                                )
                                .with_line(import.line),
                            );
                        }
                    }
                } else if imports::is_builtin(spec) || imports::is_alias(spec) {
                    continue;
                } else if let Some(packages) = &packages {
                    let package = imports::package_name(spec);
                    if !packages.contains(&package) {
                        findings.push(
                            Finding::blocking(
                                FindingCategory::Dependency,
                                file.path.clone(),
                                format!("Package '{}' is not declared in package.json", package),
                            )
                            .with_line(import.line),
                        );
                    }
                }
            }
        }

        findings
    }

    fn check_conflicts(
        &self,
        story: &UserStory,
        candidates: &[GeneratedFile],
        accepted: &FileManifest,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();

        let mut by_path: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
        for file in candidates {
            by_path
                .entry(file.path.as_str())
                .or_default()
                .insert(file.content_hash.as_str());
        }
        for (path, hashes) in &by_path {
            if hashes.len() > 1 {
                findings.push(Finding::blocking(
                    FindingCategory::Conflict,
                    *path,
                    format!("{} different versions emitted for the same path", hashes.len()),
                ));
            }
        }

        for file in candidates {
            let Some(existing) = accepted.get(&file.path) else {
                continue;
            };
            if existing.content_hash == file.content_hash || existing.story_id == story.id {
                continue;
            }
            if self.is_shared(&file.path) {
                debug!(path = %file.path, "Shared path rewritten");
                continue;
            }
            findings.push(Finding::blocking(
                FindingCategory::Conflict,
                file.path.clone(),
                format!(
                    "Path already accepted from story {} with different content",
                    existing.story_id
                ),
            ));
        }

        findings
    }

    fn cap_findings(&self, findings: Vec<Finding>) -> Vec<Finding> {
        let max = self.policy.max_findings_per_category;
        if max == 0 {
            return findings;
        }
        let mut kept = Vec::with_capacity(findings.len());
        let mut counts: HashMap<FindingCategory, usize> = HashMap::new();
        for finding in findings {
            let count = counts.entry(finding.category).or_default();
            *count += 1;
            if *count <= max {
                kept.push(finding);
            }
        }
        let mut overflow: Vec<(FindingCategory, usize)> = counts
            .into_iter()
            .filter(|(_, n)| *n > max)
            .map(|(c, n)| (c, n - max))
            .collect();
        overflow.sort();
        for (category, extra) in overflow {
            kept.push(Finding::warning(
                category,
                "",
                format!("{} more {} findings not shown", extra, category),
            ));
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{AcceptedFile, content_hash};
    use crate::strategy::GenerationStrategy;

    fn gen_file(path: &str, content: &str) -> GeneratedFile {
        GeneratedFile::new(path, content, "S2", GenerationStrategy::Generative)
    }

    fn accepted(files: &[(&str, &str, &str)]) -> FileManifest {
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

    fn story() -> UserStory {
        UserStory::new("S2", "Second", vec!["S1"])
    }

    fn validator() -> StoryValidator {
        StoryValidator::new(ValidationPolicy::default())
    }

    #[test]
    fn test_clean_story_passes() {
        let prior = accepted(&[("src/api.ts", "export function fetchUser() {}\n", "S1")]);
        let candidates = vec![gen_file(
            "src/app.ts",
            "import { fetchUser } from './api';\nexport const app = fetchUser;\n",
        )];
        let result = validator().validate(&story(), &[], &candidates, &prior);
        assert!(result.passed, "{:?}", result.findings);
        assert!(result.findings.is_empty());
    }

    #[test]
    fn test_import_of_unexported_symbol_fails() {
        let prior = accepted(&[("src/api.ts", "export function fetchUser() {}\n", "S1")]);
        let candidates = vec![gen_file(
            "src/app.ts",
            "import { deleteUser } from './api';\n",
        )];
        let result = validator().validate(&story(), &[], &candidates, &prior);
        assert!(!result.passed);
        assert_eq!(result.findings[0].category, FindingCategory::Import);
        assert!(result.findings[0].message.contains("deleteUser"));
        assert_eq!(result.findings[0].line, Some(1));
    }

    #[test]
    fn test_unresolved_import_fails() {
        let candidates = vec![gen_file("src/app.ts", "import { x } from './nowhere';\n")];
        let result = validator().validate(&story(), &[], &candidates, &FileManifest::new());
        assert!(!result.passed);
        assert!(result.has_category(FindingCategory::Import));
    }

    #[test]
    fn test_import_between_candidates_resolves() {
        let candidates = vec![
            gen_file("src/a.ts", "import { b } from './b';\nexport const a = b;\n"),
            gen_file("src/b.ts", "export const b = 1;\n"),
        ];
        let result = validator().validate(&story(), &[], &candidates, &FileManifest::new());
        assert!(result.passed, "{:?}", result.findings);
    }

    #[test]
    fn test_syntax_failure_short_circuits() {
        let candidates = vec![gen_file("src/a.ts", "import { x } from './nowhere';\nfunction f() {\n")];
        let result = validator().validate(&story(), &[], &candidates, &FileManifest::new());
        assert!(!result.passed);
        assert!(result.has_category(FindingCategory::Syntax));
        assert!(!result.has_category(FindingCategory::Import));
    }

    #[test]
    fn test_missing_declared_export() {
        let component = ComponentSpec::new("login", "Login", "src/Login.tsx")
            .with_exports(&["Login", "LoginProps"]);
        let candidates = vec![gen_file("src/Login.tsx", "export function Login() {}\n")];
        let result =
            validator().validate(&story(), &[component], &candidates, &FileManifest::new());
        assert!(!result.passed);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].category, FindingCategory::Export);
        assert!(result.findings[0].message.contains("LoginProps"));
    }

    #[test]
    fn test_component_not_emitted() {
        let component = ComponentSpec::new("login", "Login", "src/Login.tsx");
        let candidates = vec![gen_file("src/Other.tsx", "export const x = 1;\n")];
        let result =
            validator().validate(&story(), &[component], &candidates, &FileManifest::new());
        assert!(result.has_category(FindingCategory::Dependency));
    }

    #[test]
    fn test_component_accepted_by_earlier_story_satisfies_exports() {
        let component = ComponentSpec::new("app", "App", "src/App.tsx").with_exports(&["default"]);
        let prior = accepted(&[("src/App.tsx", "export default function App() {}\n", "S1")]);
        let candidates = vec![gen_file(
            "src/stories/s2-routing.ts",
            "import App from '../App';\nexport const shell = App;\n",
        )];
        let result = validator().validate(&story(), &[component], &candidates, &prior);
        assert!(result.passed, "{:?}", result.findings);

        let partial = ComponentSpec::new("app", "App", "src/App.tsx").with_exports(&["default", "routes"]);
        let result = validator().validate(&story(), &[partial], &candidates, &prior);
        assert!(!result.passed);
        assert!(result.findings[0].message.contains("'routes'"));
    }

    #[test]
    fn test_cross_story_conflict_blocks() {
        let prior = accepted(&[("src/api.ts", "export const v = 1;\n", "S1")]);
        let candidates = vec![gen_file("src/api.ts", "export const v = 2;\n")];
        let result = validator().validate(&story(), &[], &candidates, &prior);
        assert!(!result.passed);
        assert_eq!(result.findings[0].category, FindingCategory::Conflict);
        assert!(result.findings[0].message.contains("S1"));
    }

    #[test]
    fn test_identical_rewrite_is_not_a_conflict() {
        let prior = accepted(&[("src/api.ts", "export const v = 1;\n", "S1")]);
        let candidates = vec![gen_file("src/api.ts", "export const v = 1;\n")];
        let result = validator().validate(&story(), &[], &candidates, &prior);
        assert!(result.passed);
    }

    #[test]
    fn test_duplicate_candidate_paths_conflict() {
        let candidates = vec![
            gen_file("src/a.ts", "export const a = 1;\n"),
            gen_file("src/a.ts", "export const a = 2;\n"),
        ];
        let result = validator().validate(&story(), &[], &candidates, &FileManifest::new());
        assert!(result.has_category(FindingCategory::Conflict));
    }

    #[test]
    fn test_shared_paths_allow_rewrites() {
        let prior = accepted(&[("package.json", "{\"name\": \"app\"}", "S1")]);
        let candidates = vec![gen_file(
            "package.json",
            "{\"name\": \"app\", \"dependencies\": {\"react\": \"18\"}}",
        )];
        let strict = validator().validate(&story(), &[], &candidates, &prior);
        assert!(strict.has_category(FindingCategory::Conflict));

        let shared = StoryValidator::new(ValidationPolicy {
            shared_paths: vec!["package.json".into()],
            ..Default::default()
        });
        assert!(shared.validate(&story(), &[], &candidates, &prior).passed);
    }

    #[test]
    fn test_undeclared_package() {
        let prior = accepted(&[(
            "package.json",
            "{\"dependencies\": {\"react\": \"18\"}}",
            "S1",
        )]);
        let candidates = vec![gen_file(
            "src/a.ts",
            "import React from 'react';\nimport axios from 'axios';\nimport fs from 'node:fs';\n",
        )];
        let result = validator().validate(&story(), &[], &candidates, &prior);
        assert_eq!(result.blocking().count(), 1);
        assert!(result.findings[0].message.contains("'axios'"));
        assert_eq!(result.findings[0].line, Some(2));
    }

    #[test]
    fn test_packages_unchecked_without_package_json() {
        let candidates = vec![gen_file("src/a.ts", "import axios from 'axios';\n")];
        let result = validator().validate(&story(), &[], &candidates, &FileManifest::new());
        assert!(result.passed);
    }

    #[test]
    fn test_type_findings_can_be_downgraded() {
        let candidates = vec![gen_file("src/a.ts", "export const x: any = 1;\n")];
        let blocking = validator().validate(&story(), &[], &candidates, &FileManifest::new());
        assert!(!blocking.passed);

        let lenient = StoryValidator::new(ValidationPolicy {
            type_severity: Severity::Warning,
            ..Default::default()
        });
        let result = lenient.validate(&story(), &[], &candidates, &FileManifest::new());
        assert!(result.passed);
        assert_eq!(result.warnings().count(), 1);
    }

    #[test]
    fn test_empty_candidate_set_fails() {
        let result = validator().validate(&story(), &[], &[], &FileManifest::new());
        assert!(!result.passed);
    }

    #[test]
    fn test_findings_are_capped_per_category() {
        let policy = ValidationPolicy {
            max_findings_per_category: 2,
            ..Default::default()
        };
        let content = "import { a } from './x1';\nimport { b } from './x2';\nimport { c } from './x3';\n";
        let candidates = vec![gen_file("src/a.ts", content)];
        let result = StoryValidator::new(policy).validate(&story(), &[], &candidates, &FileManifest::new());
        assert_eq!(result.blocking().count(), 2);
        assert!(result.warnings().any(|f| f.message.contains("1 more import")));
    }
}
