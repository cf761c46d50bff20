//! Integration validation: cross-file checks over the whole accepted tree.
//!
//! Runs after a story passed validation and build, against the accepted files with
//! the story's candidates laid over them. A rejection here is terminal for the story.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::manifest::FileManifest;
use crate::story::{ComponentIndex, UserStory};
use crate::validate::imports::{self, ExportSet, extract_imports};
use crate::validate::syntax::{SourceKind, source_kind};
use crate::validate::{Finding, FindingCategory, ValidationResult, exports_of};

/// Where the run stands when a story is integrated.
#[derive(Debug, Clone, Copy)]
pub struct IntegrationContext<'a> {
    /// The story being integrated.
    pub story: &'a UserStory,
    /// Every story of the execution.
    pub stories: &'a [UserStory],
    /// Ids of stories accepted before this one.
    pub accepted: &'a HashSet<String>,
}

impl IntegrationContext<'_> {
    /// Whether a story has already run or is running now.
    fn has_run(&self, story_id: &str) -> bool {
        story_id == self.story.id || self.accepted.contains(story_id)
    }
}

pub struct IntegrationValidator {
    components: ComponentIndex,
}

impl IntegrationValidator {
    pub fn new(components: ComponentIndex) -> Self {
        Self { components }
    }

    pub fn validate(&self, ctx: IntegrationContext<'_>, combined: &FileManifest) -> ValidationResult {
        let exports: HashMap<&str, ExportSet> = combined
            .iter()
            .filter_map(|f| exports_of(&f.path, &f.content).map(|e| (f.path.as_str(), e)))
            .collect();

        let mut findings = self.check_imports(combined, &exports);
        findings.extend(self.check_exports(ctx, combined, &exports));
        findings.extend(self.check_components(ctx, combined));

        debug!(
            story_id = %ctx.story.id,
            files = combined.len(),
            findings = findings.len(),
            "Integration check complete"
        );
        ValidationResult::from_findings(&ctx.story.id, findings)
    }

    /// Relative imports anywhere in the tree must resolve, with the names they import.
    fn check_imports(
        &self,
        combined: &FileManifest,
        exports: &HashMap<&str, ExportSet>,
    ) -> Vec<Finding> {
        let known: HashSet<&str> = combined.paths().collect();
        let mut findings = Vec::new();

        for file in combined
            .iter()
            .filter(|f| source_kind(&f.path) == SourceKind::Script)
        {
            for import in extract_imports(&file.content) {
                if !imports::is_relative(&import.specifier) {
                    continue;
                }
                let Some(target) = imports::resolve(&file.path, &import.specifier, &known) else {
                    findings.push(
                        Finding::blocking(
                            FindingCategory::Import,
                            file.path.clone(),
                            format!(
                                "Orphaned import '{}' (from story {})",
                                import.specifier, file.story_id
                            ),
                        )
                        .with_line(import.line),
                    );
                    continue;
                };
                let Some(target_exports) = exports.get(target.as_str()) else {
                    continue;
                };
                for name in import.names.iter().filter(|n| !target_exports.exports(n)) {
                    findings.push(
                        Finding::blocking(
                            FindingCategory::Import,
                            file.path.clone(),
                            format!("'{}' is no longer exported by {}", name, target),
                        )
                        .with_line(import.line),
                    );
                }
            }
        }
        findings
    }

    fn check_exports(
        &self,
        ctx: IntegrationContext<'_>,
        combined: &FileManifest,
        exports: &HashMap<&str, ExportSet>,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mut default_names: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut named: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (&path, set) in exports {
            if set.default_count > 1 {
                findings.push(Finding::blocking(
                    FindingCategory::Export,
                    path,
                    format!("{} default exports in one module", set.default_count),
                ));
            }
            for name in &set.default_names {
                default_names.entry(name.as_str()).or_default().push(path);
            }
            for name in &set.names {
                named.entry(name.as_str()).or_default().push(path);
            }
        }

        let touches_story = |paths: &[&str]| {
            paths.iter().any(|p| {
                combined
                    .get(p)
                    .is_some_and(|f| f.story_id == ctx.story.id)
            })
        };

        for (name, mut paths) in default_names {
            if paths.len() < 2 {
                continue;
            }
            paths.sort_unstable();
            findings.push(Finding::blocking(
                FindingCategory::Export,
                paths[0],
                format!("Default export '{}' is defined in {}", name, paths.join(", ")),
            ));
        }

        // Only warn about duplicates this story introduced
        for (name, mut paths) in named {
            if paths.len() < 2 || !touches_story(&paths) {
                continue;
            }
            paths.sort_unstable();
            findings.push(Finding::warning(
                FindingCategory::Export,
                paths[0],
                format!("'{}' is exported by {}", name, paths.join(", ")),
            ));
        }

        findings.sort_by(|a, b| a.file.cmp(&b.file));
        findings
    }

    /// Component files that must exist by now.
    fn check_components(&self, ctx: IntegrationContext<'_>, combined: &FileManifest) -> Vec<Finding> {
        let mut owner: HashMap<&str, &str> = HashMap::new();
        for story in ctx.stories {
            for component in &story.assigned_components {
                owner.entry(component.as_str()).or_insert(story.id.as_str());
            }
        }

        let mut required: BTreeMap<&str, String> = BTreeMap::new();
        for story in ctx.stories.iter().filter(|s| ctx.has_run(&s.id)) {
            for id in &story.assigned_components {
                required
                    .entry(id.as_str())
                    .or_insert_with(|| format!("assigned to story {}", story.id));
            }
        }

        for component in self.components.values() {
            if !combined.contains(&component.file_path) {
                continue;
            }
            for dep in &component.dependencies {
                match owner.get(dep.as_str()) {
                    Some(story_id) if !ctx.has_run(story_id) => continue,
                    _ => {}
                }
                required
                    .entry(dep.as_str())
                    .or_insert_with(|| format!("required by component '{}'", component.name));
            }
        }

        let mut findings = Vec::new();
        for (id, why) in required {
            let Some(component) = self.components.get(id) else {
                warn!(component = id, "Unknown component referenced");
                continue;
            };
            if !combined.contains(&component.file_path) {
                findings.push(Finding::blocking(
                    FindingCategory::Dependency,
                    component.file_path.clone(),
                    format!("Component '{}' has no file ({})", component.name, why),
                ));
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{AcceptedFile, content_hash};
    use crate::story::{ComponentSpec, index_components};

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

    fn story(id: &str, components: &[&str]) -> UserStory {
        let mut s = UserStory::new(id, id, vec![]);
        s.assigned_components = components.iter().map(|c| c.to_string()).collect();
        s
    }

    fn run(
        components: Vec<ComponentSpec>,
        stories: &[UserStory],
        current: usize,
        accepted: &[&str],
        combined: &FileManifest,
    ) -> ValidationResult {
        let accepted: HashSet<String> = accepted.iter().map(|s| s.to_string()).collect();
        let validator = IntegrationValidator::new(index_components(&components));
        validator.validate(
            IntegrationContext {
                story: &stories[current],
                stories,
                accepted: &accepted,
            },
            combined,
        )
    }

    #[test]
    fn test_consistent_tree_passes() {
        let stories = vec![story("S1", &[]), story("S2", &[])];
        let combined = manifest(&[
            ("src/api.ts", "export function get() {}\n", "S1"),
            ("src/app.ts", "import { get } from './api';\nexport default get;\n", "S2"),
        ]);
        let result = run(vec![], &stories, 1, &["S1"], &combined);
        assert!(result.passed, "{:?}", result.findings);
    }

    #[test]
    fn test_rewritten_file_orphans_earlier_import() {
        // S2 rewrote the file S1's code imported from
        let stories = vec![story("S1", &[]), story("S2", &[])];
        let combined = manifest(&[
            ("src/app.ts", "import { get } from './api';\n", "S1"),
            ("src/api.ts", "export function fetch() {}\n", "S2"),
        ]);
        let result = run(vec![], &stories, 1, &["S1"], &combined);
        assert!(!result.passed);
        assert_eq!(result.findings[0].category, FindingCategory::Import);
        assert_eq!(result.findings[0].file, "src/app.ts");
        assert!(result.findings[0].message.contains("'get'"));
    }

    #[test]
    fn test_missing_import_target() {
        let stories = vec![story("S1", &[])];
        let combined = manifest(&[("src/app.ts", "import './styles.css';\n", "S1")]);
        let result = run(vec![], &stories, 0, &[], &combined);
        assert!(result.has_category(FindingCategory::Import));
    }

    #[test]
    fn test_duplicate_default_exports() {
        let stories = vec![story("S1", &[])];
        let combined = manifest(&[(
            "src/a.ts",
            "export default function A() {}\nexport default function B() {}\n",
            "S1",
        )]);
        let result = run(vec![], &stories, 0, &[], &combined);
        assert!(!result.passed);
        assert!(result.has_category(FindingCategory::Export));
    }

    #[test]
    fn test_same_default_name_in_two_files() {
        let stories = vec![story("S1", &[]), story("S2", &[])];
        let combined = manifest(&[
            ("src/a/App.tsx", "export default function App() {}\n", "S1"),
            ("src/b/App.tsx", "export default function App() {}\n", "S2"),
        ]);
        let result = run(vec![], &stories, 1, &["S1"], &combined);
        assert!(!result.passed);
        assert!(result.findings[0].message.contains("'App'"));
    }

    #[test]
    fn test_duplicate_named_exports_only_warn() {
        let stories = vec![story("S1", &[]), story("S2", &[])];
        let combined = manifest(&[
            ("src/a.ts", "export const config = 1;\n", "S1"),
            ("src/b.ts", "export const config = 2;\n", "S2"),
        ]);
        let result = run(vec![], &stories, 1, &["S1"], &combined);
        assert!(result.passed);
        assert_eq!(result.warnings().count(), 1);
    }

    #[test]
    fn test_missing_component_of_current_story() {
        let components = vec![ComponentSpec::new("nav", "Nav", "src/Nav.tsx")];
        let stories = vec![story("S1", &["nav"])];
        let combined = manifest(&[("src/other.ts", "export const x = 1;\n", "S1")]);
        let result = run(components, &stories, 0, &[], &combined);
        assert!(!result.passed);
        assert_eq!(result.findings[0].category, FindingCategory::Dependency);
        assert!(result.findings[0].message.contains("Nav"));
    }

    #[test]
    fn test_dependency_owned_by_pending_story_is_not_required() {
        let components = vec![
            ComponentSpec::new("page", "Page", "src/Page.tsx").with_dependencies(&["api"]),
            ComponentSpec::new("api", "Api", "src/api.ts"),
        ];
        let stories = vec![story("S1", &["page"]), story("S2", &["api"])];
        let combined = manifest(&[("src/Page.tsx", "export function Page() {}\n", "S1")]);
        assert!(run(components.clone(), &stories, 0, &[], &combined).passed);

        // Unowned dependency stubs are required once a dependent exists
        let stories = vec![story("S1", &["page"])];
        let result = run(components, &stories, 0, &[], &combined);
        assert!(!result.passed);
        assert!(result.findings[0].message.contains("required by component 'Page'"));
    }
}
