//! Generation strategy selection.
//!
//! `select` is a pure policy function: it looks at a story's effort, criteria count,
//! description and component count and returns a closed choice of strategy plus the
//! reason, so callers can log and report why a story escalated.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::story::{ComponentSpec, UserStory};

/// Default complexity keywords that escalate a story to the generative strategy.
pub const DEFAULT_COMPLEXITY_KEYWORDS: &[&str] = &[
    "real-time",
    "realtime",
    "websocket",
    "live update",
    "collaboration",
    "state machine",
    "algorithm",
    "optimization",
    "concurrent",
    "streaming",
    "offline sync",
];

pub fn default_complexity_keywords() -> Vec<String> {
    DEFAULT_COMPLEXITY_KEYWORDS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// How a story's candidate files are produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStrategy {
    Template,
    Generative,
}

impl fmt::Display for GenerationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationStrategy::Template => write!(f, "template"),
            GenerationStrategy::Generative => write!(f, "generative"),
        }
    }
}

/// Thresholds and overrides for strategy selection (`[strategy]` in storyforge.toml).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StrategyPolicy {
    /// Escalate when estimated effort exceeds this many points.
    pub effort_threshold: u32,
    /// Escalate when the story has more acceptance criteria than this.
    pub criteria_threshold: usize,
    /// Escalate when more components than this are assigned.
    pub component_threshold: usize,
    /// Case-insensitive phrases searched in the story description.
    pub complexity_keywords: Vec<String>,
    /// Use this strategy for every story.
    pub force: Option<GenerationStrategy>,
    /// Per-story strategy, keyed by story id.
    pub overrides: HashMap<String, GenerationStrategy>,
}

impl Default for StrategyPolicy {
    fn default() -> Self {
        Self {
            effort_threshold: 8,
            criteria_threshold: 5,
            component_threshold: 4,
            complexity_keywords: default_complexity_keywords(),
            force: None,
            overrides: HashMap::new(),
        }
    }
}

/// Why a strategy was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionReason {
    Forced,
    StoryOverride,
    Effort { effort: u32, threshold: u32 },
    CriteriaCount { count: usize, threshold: usize },
    ComplexityKeyword { keyword: String },
    ComponentCount { count: usize, threshold: usize },
    Simple,
}

impl SelectionReason {
    pub fn description(&self) -> String {
        match self {
            Self::Forced => "Strategy forced by configuration".to_string(),
            Self::StoryOverride => "Per-story override".to_string(),
            Self::Effort { effort, threshold } => {
                format!("Effort {} exceeds threshold {}", effort, threshold)
            }
            Self::CriteriaCount { count, threshold } => {
                format!("{} acceptance criteria exceed threshold {}", count, threshold)
            }
            Self::ComplexityKeyword { keyword } => {
                format!("Description mentions '{}'", keyword)
            }
            Self::ComponentCount { count, threshold } => {
                format!("{} components exceed threshold {}", count, threshold)
            }
            Self::Simple => "No escalation signal".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub strategy: GenerationStrategy,
    pub reason: SelectionReason,
}

impl StrategyPolicy {
    /// Return the first configured keyword found in the text.
    pub fn matching_keyword(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.complexity_keywords
            .iter()
            .find(|kw| !kw.is_empty() && lower.contains(&kw.to_lowercase()))
            .map(|kw| kw.as_str())
    }

    /// Choose a strategy for one story.
    pub fn select(&self, story: &UserStory, components: &[ComponentSpec]) -> StrategyDecision {
        if let Some(strategy) = self.force {
            return StrategyDecision {
                strategy,
                reason: SelectionReason::Forced,
            };
        }
        if let Some(&strategy) = self.overrides.get(&story.id) {
            return StrategyDecision {
                strategy,
                reason: SelectionReason::StoryOverride,
            };
        }

        let generative = |reason| StrategyDecision {
            strategy: GenerationStrategy::Generative,
            reason,
        };

        if story.estimated_effort > self.effort_threshold {
            return generative(SelectionReason::Effort {
                effort: story.estimated_effort,
                threshold: self.effort_threshold,
            });
        }
        if story.acceptance_criteria.len() > self.criteria_threshold {
            return generative(SelectionReason::CriteriaCount {
                count: story.acceptance_criteria.len(),
                threshold: self.criteria_threshold,
            });
        }
        if let Some(keyword) = self.matching_keyword(&story.description) {
            return generative(SelectionReason::ComplexityKeyword {
                keyword: keyword.to_string(),
            });
        }
        if components.len() > self.component_threshold {
            return generative(SelectionReason::ComponentCount {
                count: components.len(),
                threshold: self.component_threshold,
            });
        }

        StrategyDecision {
            strategy: GenerationStrategy::Template,
            reason: SelectionReason::Simple,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(effort: u32, criteria: usize, description: &str) -> UserStory {
        let mut s = UserStory::new("S1", "Story", vec![]);
        s.estimated_effort = effort;
        s.acceptance_criteria = (0..criteria).map(|i| format!("criterion {}", i)).collect();
        s.description = description.to_string();
        s
    }

    fn components(n: usize) -> Vec<ComponentSpec> {
        (0..n)
            .map(|i| ComponentSpec::new(&format!("c{}", i), "C", &format!("src/c{}.ts", i)))
            .collect()
    }

    #[test]
    fn test_selection_table() {
        use GenerationStrategy::*;
        let policy = StrategyPolicy::default();
        let table: Vec<(UserStory, usize, GenerationStrategy)> = vec![
            (story(3, 2, "Show a static about page"), 1, Template),
            (story(8, 5, "Boundary values stay template"), 4, Template),
            (story(9, 0, ""), 0, Generative),
            (story(1, 6, ""), 0, Generative),
            (story(1, 1, "Add Real-Time notifications"), 0, Generative),
            (story(1, 1, "Sync via WebSocket"), 0, Generative),
            (story(1, 1, "Plain form"), 5, Generative),
            (story(21, 7, "real-time chat"), 2, Generative),
        ];

        for (s, n, expected) in table {
            let decision = policy.select(&s, &components(n));
            assert_eq!(
                decision.strategy, expected,
                "effort={} criteria={} desc={:?} components={}",
                s.estimated_effort,
                s.acceptance_criteria.len(),
                s.description,
                n
            );
        }
    }

    #[test]
    fn test_reason_reports_first_signal() {
        let policy = StrategyPolicy::default();
        let decision = policy.select(&story(21, 7, "real-time chat"), &[]);
        assert_eq!(
            decision.reason,
            SelectionReason::Effort {
                effort: 21,
                threshold: 8
            }
        );
        assert!(decision.reason.description().contains("21"));
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let policy = StrategyPolicy {
            effort_threshold: 50,
            criteria_threshold: 50,
            complexity_keywords: vec![],
            ..Default::default()
        };
        let decision = policy.select(&story(21, 7, "real-time chat"), &[]);
        assert_eq!(decision.strategy, GenerationStrategy::Template);
    }

    #[test]
    fn test_force_and_overrides() {
        let mut policy = StrategyPolicy::default();
        policy
            .overrides
            .insert("S1".to_string(), GenerationStrategy::Template);
        let decision = policy.select(&story(40, 0, ""), &[]);
        assert_eq!(decision.strategy, GenerationStrategy::Template);
        assert_eq!(decision.reason, SelectionReason::StoryOverride);

        policy.force = Some(GenerationStrategy::Generative);
        let decision = policy.select(&story(1, 0, ""), &[]);
        assert_eq!(decision.strategy, GenerationStrategy::Generative);
        assert_eq!(decision.reason, SelectionReason::Forced);
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: StrategyPolicy = toml::from_str(
            r#"
effort_threshold = 13
complexity_keywords = ["graph"]

[overrides]
S7 = "generative"
"#,
        )
        .unwrap();
        assert_eq!(policy.effort_threshold, 13);
        assert_eq!(policy.criteria_threshold, 5);
        assert_eq!(policy.matching_keyword("A Graph view"), Some("graph"));
        assert_eq!(
            policy.overrides.get("S7"),
            Some(&GenerationStrategy::Generative)
        );
    }
}
