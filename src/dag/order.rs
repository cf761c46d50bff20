//! Deterministic topological ordering of a story graph.

use super::builder::{StoryGraph, StoryIndex};
use crate::errors::EngineError;
use crate::story::UserStory;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Produce a total order in which every story follows all of its dependencies.
///
/// Kahn's algorithm; among ready stories the lowest priority value runs first,
/// then the lowest id. Stories left with unmet edges are on or behind a cycle.
pub(super) fn topological_order(graph: &StoryGraph) -> Result<Vec<StoryIndex>, EngineError> {
    let mut in_degree = graph.in_degrees();
    let mut ready: BinaryHeap<Reverse<(u32, String, StoryIndex)>> = BinaryHeap::new();

    for (i, &deg) in in_degree.iter().enumerate() {
        if deg == 0 {
            ready.push(Reverse(key(graph, i)));
        }
    }

    let mut order = Vec::with_capacity(graph.len());
    while let Some(Reverse((_, _, node))) = ready.pop() {
        order.push(node);
        for &dependent in graph.dependents(node) {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(key(graph, dependent)));
            }
        }
    }

    if order.len() != graph.len() {
        let mut stories: Vec<String> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg > 0)
            .filter_map(|(i, _)| graph.get_story(i).map(|s| s.id.clone()))
            .collect();
        stories.sort();
        return Err(EngineError::CyclicDependency { stories });
    }

    Ok(order)
}

fn key(graph: &StoryGraph, index: StoryIndex) -> (u32, String, StoryIndex) {
    let story = graph
        .get_story(index)
        .map(|s| (s.priority, s.id.clone()))
        .unwrap_or_default();
    (story.0, story.1, index)
}

/// Build the graph and return the stories in execution order.
pub fn resolve_order(stories: &[UserStory]) -> Result<Vec<UserStory>, EngineError> {
    let graph = super::GraphBuilder::new(stories.to_vec()).build()?;
    Ok(graph
        .order()
        .iter()
        .filter_map(|&i| graph.get_story(i).cloned())
        .collect())
}
