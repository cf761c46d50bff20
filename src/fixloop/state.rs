//! Auto-fix loop state: the per-story state machine and the attempt history.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::build::BuildResult;
use crate::generate::GeneratedFile;
use crate::strategy::GenerationStrategy;
use crate::util::duration_serde;
use crate::validate::{Finding, FindingCategory, ValidationResult};

/// States of one story's loop.
///
/// `Generate -> Validate -> Build -> Integrate -> Accepted`; a failed validation or
/// build goes through `FixAttempt` back to `Generate` while budget remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    #[default]
    Generate,
    Validate,
    Build,
    Integrate,
    FixAttempt,
    Accepted,
    Failed,
}

impl LoopState {
    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(&self, next: LoopState) -> bool {
        use LoopState::*;
        matches!(
            (self, next),
            (Generate, Validate)
                | (Generate, FixAttempt)
                | (Validate, Build)
                | (Validate, FixAttempt)
                | (Build, Integrate)
                | (Build, FixAttempt)
                | (Integrate, Accepted)
                | (FixAttempt, Generate)
                | (Generate | Validate | Build | Integrate | FixAttempt, Failed)
        )
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Generate => "generate",
            Self::Validate => "validate",
            Self::Build => "build",
            Self::Integrate => "integrate",
            Self::FixAttempt => "fix_attempt",
            Self::Accepted => "accepted",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    GeneratorFailed,
    GeneratorTimedOut,
    ValidationFailed,
    BuildFailed,
    BuildTimedOut,
    IntegrationRejected,
    /// The story's wall-clock budget ran out mid-attempt.
    BudgetExceeded,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::GeneratorFailed => "generator failed",
            Self::GeneratorTimedOut => "generator timed out",
            Self::ValidationFailed => "validation failed",
            Self::BuildFailed => "build failed",
            Self::BuildTimedOut => "build timed out",
            Self::IntegrationRejected => "integration rejected",
            Self::BudgetExceeded => "story budget exceeded",
        };
        write!(f, "{}", s)
    }
}

/// Everything observed during one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based.
    pub attempt: u32,
    pub strategy: GenerationStrategy,
    pub candidate_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_error: Option<String>,
    #[serde(default)]
    pub generator_timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<ValidationResult>,
    pub outcome: AttemptOutcome,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl AttemptRecord {
    pub(crate) fn new(attempt: u32, strategy: GenerationStrategy) -> Self {
        Self {
            attempt,
            strategy,
            candidate_paths: Vec::new(),
            generator_error: None,
            generator_timed_out: false,
            validation: None,
            build: None,
            integration: None,
            outcome: AttemptOutcome::GeneratorFailed,
            duration: Duration::ZERO,
        }
    }

    /// Findings that explain this attempt's outcome, most specific stage last reached.
    pub fn findings(&self) -> Vec<Finding> {
        if let Some(integration) = &self.integration {
            return integration.findings.clone();
        }
        if let Some(build) = self.build.as_ref().filter(|b| !b.success) {
            return build.findings();
        }
        if let Some(validation) = &self.validation {
            return validation.findings.clone();
        }
        match &self.generator_error {
            Some(err) => vec![Finding::blocking(FindingCategory::Generator, "", err.clone())],
            None => Vec::new(),
        }
    }

    pub fn blocking_count(&self) -> usize {
        self.findings()
            .iter()
            .filter(|f| f.severity.is_blocking())
            .count()
    }
}

/// Why a story ended `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    AttemptsExhausted { attempts: u32 },
    BudgetExceeded { budget_secs: u64 },
    IntegrationRejected,
    BlockedByDependency { dependencies: Vec<String> },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptsExhausted { attempts } => {
                write!(f, "fix attempts exhausted after {} attempts", attempts)
            }
            Self::BudgetExceeded { budget_secs } => {
                write!(f, "story budget of {}s exceeded", budget_secs)
            }
            Self::IntegrationRejected => write!(f, "rejected by integration validation"),
            Self::BlockedByDependency { dependencies } => {
                write!(f, "blocked by dependency: {}", dependencies.join(", "))
            }
        }
    }
}

/// Final outcome of one story's loop.
#[derive(Debug, Clone, PartialEq)]
pub enum StoryOutcome {
    Accepted { files: Vec<GeneratedFile> },
    Failed { reason: FailureReason },
}

/// The result of running one story through the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryRun {
    pub story_id: String,
    pub outcome: StoryOutcome,
    pub attempts: Vec<AttemptRecord>,
    pub duration: Duration,
}

impl StoryRun {
    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, StoryOutcome::Accepted { .. })
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn last_attempt(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }

    /// Findings of the attempt that decided the outcome.
    pub fn last_findings(&self) -> Vec<Finding> {
        self.last_attempt()
            .map(AttemptRecord::findings)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(LoopState::Generate.can_transition_to(LoopState::Validate));
        assert!(LoopState::Validate.can_transition_to(LoopState::FixAttempt));
        assert!(LoopState::FixAttempt.can_transition_to(LoopState::Generate));
        assert!(LoopState::Integrate.can_transition_to(LoopState::Accepted));
        assert!(LoopState::Integrate.can_transition_to(LoopState::Failed));
        // Integration rejections never loop back
        assert!(!LoopState::Integrate.can_transition_to(LoopState::FixAttempt));
        assert!(!LoopState::Validate.can_transition_to(LoopState::Accepted));
        assert!(!LoopState::Accepted.can_transition_to(LoopState::Failed));
        assert!(!LoopState::Failed.can_transition_to(LoopState::Generate));
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(
            FailureReason::AttemptsExhausted { attempts: 3 }.to_string(),
            "fix attempts exhausted after 3 attempts"
        );
        assert_eq!(
            FailureReason::BlockedByDependency {
                dependencies: vec!["A".into()]
            }
            .to_string(),
            "blocked by dependency: A"
        );
    }

    #[test]
    fn test_attempt_findings_prefer_latest_stage() {
        let mut record = AttemptRecord::new(1, GenerationStrategy::Template);
        record.generator_error = Some("exit code 1".into());
        assert_eq!(record.findings()[0].message, "exit code 1");
        assert_eq!(record.findings()[0].category, FindingCategory::Generator);
        assert_eq!(
            serde_json::to_value(FindingCategory::Generator).unwrap(),
            "generator"
        );

        record.validation = Some(ValidationResult::from_findings(
            "S1",
            vec![Finding::blocking(FindingCategory::Import, "src/a.ts", "bad import")],
        ));
        assert_eq!(record.findings()[0].category, FindingCategory::Import);
        assert_eq!(record.blocking_count(), 1);
    }
}
