//! Story dependency graph.
//!
//! Duplicate ids, unknown dependencies and cycles are rejected when the graph is
//! built, before any story is generated. A built graph always carries its execution
//! order.

use crate::errors::EngineError;
use crate::story::UserStory;
use std::collections::{HashMap, HashSet};

use super::order::topological_order;

/// Index into the story list.
pub type StoryIndex = usize;

/// A validated, acyclic graph of stories.
#[derive(Debug)]
pub struct StoryGraph {
    stories: Vec<UserStory>,
    by_id: HashMap<String, StoryIndex>,
    /// story -> stories it depends on
    depends_on: Vec<Vec<StoryIndex>>,
    /// story -> stories that depend on it
    dependents: Vec<Vec<StoryIndex>>,
    order: Vec<StoryIndex>,
}

impl StoryGraph {
    pub(crate) fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn get_story(&self, index: StoryIndex) -> Option<&UserStory> {
        self.stories.get(index)
    }

    pub fn get_index(&self, id: &str) -> Option<StoryIndex> {
        self.by_id.get(id).copied()
    }

    pub fn stories(&self) -> &[UserStory] {
        &self.stories
    }

    /// Execution order: every story after all of its dependencies.
    pub fn order(&self) -> &[StoryIndex] {
        &self.order
    }

    pub fn dependents(&self, index: StoryIndex) -> &[StoryIndex] {
        self.dependents.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn dependencies(&self, index: StoryIndex) -> &[StoryIndex] {
        self.depends_on.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Ids of the direct dependencies of a story that are not accepted yet.
    ///
    /// Empty means the story may run.
    pub fn unaccepted_dependencies(
        &self,
        index: StoryIndex,
        accepted: &HashSet<String>,
    ) -> Vec<String> {
        self.dependencies(index)
            .iter()
            .filter_map(|&dep| self.get_story(dep))
            .filter(|dep| !accepted.contains(&dep.id))
            .map(|dep| dep.id.clone())
            .collect()
    }

    pub(crate) fn in_degrees(&self) -> Vec<usize> {
        self.depends_on.iter().map(Vec::len).collect()
    }
}

pub struct GraphBuilder {
    stories: Vec<UserStory>,
}

impl GraphBuilder {
    pub fn new(stories: Vec<UserStory>) -> Self {
        Self { stories }
    }

    pub fn build(self) -> Result<StoryGraph, EngineError> {
        let mut by_id = HashMap::with_capacity(self.stories.len());
        for (index, story) in self.stories.iter().enumerate() {
            if by_id.insert(story.id.clone(), index).is_some() {
                return Err(EngineError::DuplicateStory {
                    id: story.id.clone(),
                });
            }
        }

        let mut depends_on = Vec::with_capacity(self.stories.len());
        let mut dependents: Vec<Vec<StoryIndex>> = vec![Vec::new(); self.stories.len()];
        for (index, story) in self.stories.iter().enumerate() {
            let mut deps: Vec<StoryIndex> = Vec::with_capacity(story.dependencies.len());
            for dep in &story.dependencies {
                let Some(&dep_index) = by_id.get(dep) else {
                    return Err(EngineError::UnknownDependency {
                        story: story.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                if !deps.contains(&dep_index) {
                    deps.push(dep_index);
                    dependents[dep_index].push(index);
                }
            }
            depends_on.push(deps);
        }

        let mut graph = StoryGraph {
            stories: self.stories,
            by_id,
            depends_on,
            dependents,
            order: Vec::new(),
        };
        graph.order = topological_order(&graph)?;
        Ok(graph)
    }
}
