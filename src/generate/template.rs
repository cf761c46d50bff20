//! Deterministic template strategy.
//!
//! Renders one file per assigned component: a header naming the story and its
//! acceptance criteria, imports of already-present dependency components and a stub
//! for every declared export. A declared `default` export becomes the component's
//! default export.
//!
//! Component files another story already got accepted are left alone. A story with
//! nothing left to render (no components, or only accepted ones) gets a single module
//! under `src/stories/` that imports the accepted components it builds on.

use async_trait::async_trait;
use std::fmt::Write as _;

use super::{CodeGenerator, GeneratedFile, GenerationRequest};
use crate::errors::GenerationError;
use crate::manifest::FileManifest;
use crate::story::{ComponentIndex, ComponentSpec, UserStory, slugify};
use crate::strategy::GenerationStrategy;

const SCRIPT_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Script,
    Python,
    Json,
    Css,
    Text,
}

fn language_for(path: &str) -> Language {
    let ext = path.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    match ext {
        e if SCRIPT_EXTENSIONS.contains(&e) => Language::Script,
        "py" => Language::Python,
        "json" => Language::Json,
        "css" | "scss" => Language::Css,
        _ => Language::Text,
    }
}

/// Module specifier for importing `to_file` from `from_file`, e.g. `../lib/api`.
pub(crate) fn relative_specifier(from_file: &str, to_file: &str) -> String {
    let from_dir: Vec<&str> = {
        let mut parts: Vec<&str> = from_file.split('/').collect();
        parts.pop();
        parts
    };
    let to_parts: Vec<&str> = to_file.split('/').collect();
    let to_dir = &to_parts[..to_parts.len().saturating_sub(1)];

    let common = from_dir
        .iter()
        .zip(to_dir.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let ups = from_dir.len() - common;
    let mut rest = to_parts[common..].join("/");
    if let Some((stem, ext)) = rest.rsplit_once('.') {
        if SCRIPT_EXTENSIONS.contains(&ext) {
            rest = stem.to_string();
        }
    }

    if ups == 0 {
        format!("./{}", rest)
    } else {
        format!("{}{}", "../".repeat(ups), rest)
    }
}

const RESERVED_WORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "import", "in", "instanceof", "let", "new", "null", "return", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Declared exports usable as named bindings.
fn named_exports(component: &ComponentSpec) -> Vec<&str> {
    component
        .exports
        .iter()
        .map(|e| e.as_str())
        .filter(|e| is_identifier(e) && !RESERVED_WORDS.contains(e))
        .collect()
}

fn has_default_export(component: &ComponentSpec) -> bool {
    component.exports.iter().any(|e| e == "default")
}

/// Binding name for a component's default export, e.g. `TodoList` for "todo list".
fn default_binding(component: &ComponentSpec) -> String {
    let mut out = String::new();
    for part in component
        .name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|p| !p.is_empty())
    {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.push_str(chars.as_str());
        }
    }
    if out.is_empty() || !is_identifier(&out) {
        format!("Component{}", out)
    } else {
        out
    }
}

/// Import statement pulling every declared export of `dep` into `from_file`.
fn import_statement(from_file: &str, dep: &ComponentSpec) -> String {
    let specifier = relative_specifier(from_file, &dep.file_path);
    let names = named_exports(dep);
    let default = has_default_export(dep).then(|| default_binding(dep));
    match (default, names.is_empty()) {
        (Some(default), true) => format!("import {} from '{}';", default, specifier),
        (Some(default), false) => format!(
            "import {}, {{ {} }} from '{}';",
            default,
            names.join(", "),
            specifier
        ),
        (None, true) => format!("import '{}';", specifier),
        (None, false) => format!("import {{ {} }} from '{}';", names.join(", "), specifier),
    }
}

fn camel_case(slug: &str) -> String {
    let mut out = String::new();
    for (i, part) in slug.split('-').filter(|p| !p.is_empty()).enumerate() {
        if i == 0 {
            out.push_str(part);
        } else {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    if out.is_empty() || !is_identifier(&out) {
        format!("story{}", out.replace(|c: char| !c.is_ascii_alphanumeric(), ""))
    } else {
        out
    }
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic generator driven by component specs.
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator {
    components: ComponentIndex,
}

impl TemplateGenerator {
    /// `components` is the full component set, used to resolve component dependencies.
    pub fn new(components: ComponentIndex) -> Self {
        Self { components }
    }

    fn header(&self, story: &UserStory, comment: &str, component: Option<&ComponentSpec>) -> String {
        let mut out = String::new();
        if let Some(component) = component {
            let _ = writeln!(out, "{} {}", comment, component.name);
        }
        let _ = writeln!(out, "{} Story {}: {}", comment, story.id, one_line(&story.title));
        for criterion in &story.acceptance_criteria {
            let _ = writeln!(out, "{} - {}", comment, one_line(criterion));
        }
        out
    }

    /// Dependency components whose files exist in the accepted set or this story.
    fn present_dependencies<'a>(
        &'a self,
        component: &ComponentSpec,
        own: &[ComponentSpec],
        prior: &FileManifest,
    ) -> Vec<&'a ComponentSpec> {
        component
            .dependencies
            .iter()
            .filter_map(|id| self.components.get(id))
            .filter(|dep| {
                prior.contains(&dep.file_path) || own.iter().any(|c| c.file_path == dep.file_path)
            })
            .collect()
    }

    fn render_component(
        &self,
        story: &UserStory,
        component: &ComponentSpec,
        own: &[ComponentSpec],
        prior: &FileManifest,
    ) -> String {
        let exports = named_exports(component);

        match language_for(&component.file_path) {
            Language::Script => {
                let mut out = self.header(story, "//", Some(component));
                for dep in self.present_dependencies(component, own, prior) {
                    let _ = writeln!(out, "{}", import_statement(&component.file_path, dep));
                }
                for name in &exports {
                    let _ = writeln!(out, "\nexport function {}() {{\n  return \"{}\";\n}}", name, name);
                }
                if has_default_export(component) {
                    let binding = default_binding(component);
                    if exports.contains(&binding.as_str()) {
                        let _ = writeln!(out, "\nexport default {};", binding);
                    } else {
                        let _ = writeln!(
                            out,
                            "\nexport default function {}() {{\n  return \"{}\";\n}}",
                            binding, binding
                        );
                    }
                } else if exports.is_empty() {
                    let name = camel_case(&component.name.to_lowercase().replace(' ', "-"));
                    let _ = writeln!(out, "\nexport const {} = {{}};", name);
                }
                out
            }
            Language::Python => {
                let mut out = self.header(story, "#", Some(component));
                for name in &exports {
                    let _ = writeln!(out, "\n\ndef {}():\n    return None", name);
                }
                out
            }
            Language::Json => {
                let value = serde_json::json!({
                    "component": component.name,
                    "story": story.id,
                    "exports": exports,
                });
                let mut out = serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".into());
                out.push('\n');
                out
            }
            Language::Css => {
                let mut out = self.header(story, "/*", Some(component)).replace('\n', " */\n");
                let class = component.name.to_lowercase().replace(' ', "-");
                let _ = writeln!(out, "\n.{} {{\n}}", class);
                out
            }
            Language::Text => self.header(story, "#", Some(component)),
        }
    }

    /// `src/stories/<id>-<title>.ts`, unique per story id.
    fn story_module_path(story: &UserStory) -> String {
        let id = slugify(&story.id);
        let title = story.slug();
        if id.is_empty() || id == title {
            format!("src/stories/{}.ts", title)
        } else {
            format!("src/stories/{}-{}.ts", id, title)
        }
    }

    fn render_story_module(&self, story: &UserStory, reused: &[&ComponentSpec]) -> GeneratedFile {
        let path = Self::story_module_path(story);
        let name = camel_case(&story.slug());
        let mut out = self.header(story, "//", None);
        for component in reused
            .iter()
            .filter(|c| language_for(&c.file_path) == Language::Script)
        {
            let _ = writeln!(out, "{}", import_statement(&path, component));
        }
        let criteria: Vec<String> = story
            .acceptance_criteria
            .iter()
            .map(|c| serde_json::to_string(&one_line(c)).unwrap_or_else(|_| "\"\"".into()))
            .collect();
        let _ = writeln!(
            out,
            "\nexport function {}(): string[] {{\n  return [{}];\n}}",
            name,
            criteria.join(", ")
        );
        GeneratedFile::new(
            &path,
            &out,
            &story.id,
            GenerationStrategy::Template,
        )
    }
}

#[async_trait]
impl CodeGenerator for TemplateGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<Vec<GeneratedFile>, GenerationError> {
        let story = request.story;
        let (reused, own): (Vec<&ComponentSpec>, Vec<&ComponentSpec>) =
            request.components.iter().partition(|component| {
                request
                    .prior_files
                    .get(&component.file_path)
                    .is_some_and(|accepted| accepted.story_id != story.id)
            });
        if own.is_empty() {
            return Ok(vec![self.render_story_module(story, &reused)]);
        }

        Ok(own
            .into_iter()
            .map(|component| {
                let content =
                    self.render_component(story, component, request.components, request.prior_files);
                GeneratedFile::new(
                    &component.file_path,
                    &content,
                    &story.id,
                    GenerationStrategy::Template,
                )
            })
            .collect())
    }

    fn name(&self) -> &str {
        "template"
    }
}
