//! User stories, component specs and the stories file the engine consumes.
//!
//! This module provides:
//! - `UserStory` with its status lifecycle
//! - `ComponentSpec` describing a file-addressable unit of code
//! - `StoriesFile`, the JSON/YAML input format

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::errors::EngineError;

/// Lifecycle status of a story.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    #[default]
    Pending,
    #[serde(alias = "review_required")]
    InProgress,
    #[serde(alias = "approved", alias = "completed")]
    Accepted,
    Failed,
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoryStatus::Pending => "pending",
            StoryStatus::InProgress => "in_progress",
            StoryStatus::Accepted => "accepted",
            StoryStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A unit of requested functionality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserStory {
    #[serde(alias = "story_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Lower values run first among stories that are ready at the same time.
    #[serde(default)]
    pub priority: u32,
    /// Story points.
    #[serde(default)]
    pub estimated_effort: u32,
    #[serde(default, alias = "depends_on")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: StoryStatus,
    #[serde(default)]
    pub assigned_components: Vec<String>,
}

impl UserStory {
    pub fn new(id: &str, title: &str, dependencies: Vec<&str>) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            acceptance_criteria: Vec::new(),
            priority: 0,
            estimated_effort: 1,
            dependencies: dependencies.into_iter().map(String::from).collect(),
            status: StoryStatus::Pending,
            assigned_components: Vec::new(),
        }
    }

    /// Move the story to a new status.
    ///
    /// Accepted stories are immutable: any transition out of `accepted` is refused.
    pub fn transition(&mut self, to: StoryStatus) -> Result<(), EngineError> {
        if self.status == StoryStatus::Accepted && to != StoryStatus::Accepted {
            return Err(EngineError::IllegalTransition {
                story: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// File-system friendly slug derived from the title.
    pub fn slug(&self) -> String {
        let slug = slugify(&self.title);
        if slug.is_empty() {
            self.id.to_ascii_lowercase()
        } else {
            slug
        }
    }
}

/// Lower-case ASCII alphanumerics joined by single dashes; empty if nothing is left.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// A named, file-addressable unit of code a story maps onto.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentSpec {
    #[serde(alias = "component_id")]
    pub id: String,
    pub name: String,
    pub file_path: String,
    /// component, page, service, util...
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub exports: Vec<String>,
    /// Other component ids this component imports from.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Stories the architecture assigned this component to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub story_ids: Vec<String>,
}

impl ComponentSpec {
    pub fn new(id: &str, name: &str, file_path: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            file_path: file_path.to_string(),
            kind: None,
            exports: Vec::new(),
            dependencies: Vec::new(),
            story_ids: Vec::new(),
        }
    }

    pub fn with_exports(mut self, exports: &[&str]) -> Self {
        self.exports = exports.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Lookup of components by id.
pub type ComponentIndex = HashMap<String, ComponentSpec>;

/// Build a component index.
pub fn index_components(components: &[ComponentSpec]) -> ComponentIndex {
    components
        .iter()
        .map(|c| (c.id.clone(), c.clone()))
        .collect()
}

/// The engine's input file (`stories.json` / `stories.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoriesFile {
    #[serde(default, alias = "name")]
    pub project: Option<String>,
    #[serde(alias = "user_stories")]
    pub stories: Vec<UserStory>,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
}

impl StoriesFile {
    /// Load a stories file; the format follows the extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stories file: {}", path.display()))?;

        let file: StoriesFile = match extension(path).as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse stories file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse stories file: {}", path.display()))?,
            other => bail!(
                "Unsupported stories file extension '{}': use .json, .yaml or .yml",
                other
            ),
        };
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = match extension(path).as_str() {
            "yaml" | "yml" => serde_yaml::to_string(self).context("Failed to serialize stories")?,
            _ => serde_json::to_string_pretty(self).context("Failed to serialize stories")?,
        };
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write stories file: {}", path.display()))?;
        Ok(())
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_accepted_story_is_immutable() {
        let mut story = UserStory::new("S1", "Login", vec![]);
        story.transition(StoryStatus::InProgress).unwrap();
        story.transition(StoryStatus::Accepted).unwrap();

        let err = story.transition(StoryStatus::Pending).unwrap_err();
        assert!(matches!(err, EngineError::IllegalTransition { .. }));
        assert_eq!(story.status, StoryStatus::Accepted);
    }

    #[test]
    fn test_failed_story_can_be_retried() {
        let mut story = UserStory::new("S1", "Login", vec![]);
        story.transition(StoryStatus::Failed).unwrap();
        story.transition(StoryStatus::InProgress).unwrap();
        assert_eq!(story.status, StoryStatus::InProgress);
    }

    #[test]
    fn test_slug() {
        let story = UserStory::new("S1", "User can Log In!", vec![]);
        assert_eq!(story.slug(), "user-can-log-in");

        let story = UserStory::new("S-2", "???", vec![]);
        assert_eq!(story.slug(), "s-2");
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&StoryStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_load_architecture_field_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("architecture.json");
        std::fs::write(
            &path,
            r#"{
                "project_id": "p-1",
                "name": "todo",
                "tech_stack": "react_spa",
                "user_stories": [
                    {"story_id": "US-1", "title": "List", "description": "", "acceptance_criteria": [],
                     "priority": 1, "estimated_effort": 3, "status": "completed"},
                    {"story_id": "US-2", "title": "Edit", "description": "", "acceptance_criteria": [],
                     "priority": 2, "estimated_effort": 3, "status": "review_required",
                     "dependencies": ["US-1"]},
                    {"story_id": "US-3", "title": "Share", "description": "", "acceptance_criteria": [],
                     "priority": 3, "estimated_effort": 3, "status": "approved"}
                ],
                "components": [
                    {"component_id": "app", "name": "App", "type": "page", "file_path": "src/App.tsx",
                     "exports": ["default"], "story_ids": ["US-1", "US-2"]}
                ]
            }"#,
        )
        .unwrap();

        let file = StoriesFile::load(&path).unwrap();
        assert_eq!(file.project.as_deref(), Some("todo"));
        assert_eq!(file.stories[0].id, "US-1");
        assert_eq!(file.stories[0].status, StoryStatus::Accepted);
        assert_eq!(file.stories[1].status, StoryStatus::InProgress);
        assert_eq!(file.stories[2].status, StoryStatus::Accepted);
        assert_eq!(file.stories[1].dependencies, vec!["US-1"]);
        assert_eq!(file.components[0].id, "app");
        assert_eq!(file.components[0].kind.as_deref(), Some("page"));
        assert_eq!(file.components[0].story_ids, vec!["US-1", "US-2"]);
    }

    #[test]
    fn test_load_json_with_depends_on_alias() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stories.json");
        std::fs::write(
            &path,
            r#"{
                "stories": [
                    {"id": "A", "title": "First"},
                    {"id": "B", "title": "Second", "depends_on": ["A"], "estimated_effort": 5}
                ],
                "components": [
                    {"id": "c1", "name": "Button", "file_path": "src/Button.tsx", "exports": ["Button"]}
                ]
            }"#,
        )
        .unwrap();

        let file = StoriesFile::load(&path).unwrap();
        assert_eq!(file.stories.len(), 2);
        assert_eq!(file.stories[1].dependencies, vec!["A"]);
        assert_eq!(file.stories[1].estimated_effort, 5);
        assert_eq!(file.stories[0].status, StoryStatus::Pending);
        assert_eq!(file.components[0].exports, vec!["Button"]);
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stories.yaml");
        let file = StoriesFile {
            project: Some("demo".into()),
            stories: vec![UserStory::new("A", "First", vec![])],
            components: vec![ComponentSpec::new("c1", "Api", "src/api.ts")],
        };
        file.save(&path).unwrap();

        let loaded = StoriesFile::load(&path).unwrap();
        assert_eq!(loaded.project.as_deref(), Some("demo"));
        assert_eq!(loaded.stories, file.stories);
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stories.txt");
        std::fs::write(&path, "stories: []").unwrap();
        let err = StoriesFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
    }
}
