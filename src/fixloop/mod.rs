//! Auto-fix loop: generate, validate, build and integrate one story, feeding each
//! failure back into the generator until the story passes or its budget runs out.
//!
//! Budgets:
//! - at most `1 + max_fix_attempts` attempts
//! - a per-call generator deadline (a timeout counts as a failed attempt)
//! - a wall-clock budget over all attempts (exceeding it fails the story outright)
//!
//! An integration rejection is terminal: the story's own checks already passed, so
//! regenerating it is not expected to help.

mod state;

pub use state::{AttemptOutcome, AttemptRecord, FailureReason, LoopState, StoryOutcome, StoryRun};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::build::BuildOrchestrator;
use crate::engine::EngineEvent;
use crate::errors::GenerationError;
use crate::generate::{CodeGenerator, Diagnostics, GeneratedFile, GenerationRequest};
use crate::integration::{IntegrationContext, IntegrationValidator};
use crate::manifest::FileManifest;
use crate::story::{ComponentSpec, UserStory};
use crate::strategy::GenerationStrategy;
use crate::validate::StoryValidator;

const SIMPLIFY_HINT: &str = "The build exceeded its time budget. Simplify the implementation: \
    fewer files, no new heavy dependencies, no long-running build steps.";

const GENERATOR_TIMEOUT_HINT: &str =
    "Generation timed out. Produce a smaller, more focused set of files.";

/// `[fix_loop]` section of storyforge.toml.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FixLoopPolicy {
    /// Fix attempts after the first attempt.
    pub max_fix_attempts: u32,
    /// Deadline for one generator call.
    pub generator_timeout_secs: u64,
    /// Wall-clock budget for a story across all attempts.
    pub story_budget_secs: u64,
}

impl Default for FixLoopPolicy {
    fn default() -> Self {
        Self {
            max_fix_attempts: 2,
            generator_timeout_secs: 300,
            story_budget_secs: 1800,
        }
    }
}

impl FixLoopPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_fix_attempts + 1
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator_timeout_secs)
    }

    pub fn story_budget(&self) -> Duration {
        Duration::from_secs(self.story_budget_secs)
    }
}

/// One story and the state it runs against.
#[derive(Debug, Clone, Copy)]
pub struct StoryInput<'a> {
    pub story: &'a UserStory,
    pub components: &'a [ComponentSpec],
    pub strategy: GenerationStrategy,
    /// Files accepted by earlier stories.
    pub accepted: &'a FileManifest,
    /// Every story of the execution.
    pub stories: &'a [UserStory],
    /// Ids of stories accepted so far.
    pub accepted_ids: &'a HashSet<String>,
}

/// What one attempt produced.
struct AttemptRun {
    record: AttemptRecord,
    files: Vec<GeneratedFile>,
}

pub struct FixLoop<'a> {
    generator: &'a dyn CodeGenerator,
    validator: &'a StoryValidator,
    builder: &'a BuildOrchestrator,
    integration: &'a IntegrationValidator,
    policy: FixLoopPolicy,
    event_tx: Option<mpsc::Sender<EngineEvent>>,
}

impl<'a> FixLoop<'a> {
    pub fn new(
        generator: &'a dyn CodeGenerator,
        validator: &'a StoryValidator,
        builder: &'a BuildOrchestrator,
        integration: &'a IntegrationValidator,
        policy: FixLoopPolicy,
    ) -> Self {
        Self {
            generator,
            validator,
            builder,
            integration,
            policy,
            event_tx: None,
        }
    }

    pub fn with_event_channel(mut self, tx: Option<mpsc::Sender<EngineEvent>>) -> Self {
        self.event_tx = tx;
        self
    }

    /// Run one story to a terminal state.
    pub async fn run(&self, input: StoryInput<'_>) -> StoryRun {
        let start = Instant::now();
        let deadline = start + self.policy.story_budget();
        let max_attempts = self.policy.max_attempts();
        let story_id = input.story.id.as_str();

        let mut state = LoopState::Generate;
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut diagnostics: Option<Diagnostics> = None;

        let outcome = loop {
            let attempt = attempts.len() as u32 + 1;
            if attempt > 1 {
                self.enter(story_id, attempt, &mut state, LoopState::FixAttempt).await;
            }
            self.enter(story_id, attempt, &mut state, LoopState::Generate).await;
            self.emit(EngineEvent::AttemptStarted {
                story_id: story_id.to_string(),
                attempt,
                max_attempts,
            })
            .await;

            let run = self
                .run_attempt(input, attempt, diagnostics.as_ref(), deadline, &mut state)
                .await;
            let outcome = run.record.outcome;
            self.emit(EngineEvent::AttemptFinished {
                story_id: story_id.to_string(),
                attempt,
                outcome,
                blocking: run.record.blocking_count(),
            })
            .await;

            if outcome != AttemptOutcome::Accepted {
                warn!(
                    story_id,
                    attempt,
                    max_attempts,
                    outcome = %outcome,
                    "Attempt failed"
                );
            }

            let next = match outcome {
                AttemptOutcome::Accepted => Some(StoryOutcome::Accepted { files: run.files }),
                AttemptOutcome::IntegrationRejected => Some(StoryOutcome::Failed {
                    reason: FailureReason::IntegrationRejected,
                }),
                AttemptOutcome::BudgetExceeded => Some(StoryOutcome::Failed {
                    reason: FailureReason::BudgetExceeded {
                        budget_secs: self.policy.story_budget_secs,
                    },
                }),
                _ if attempt >= max_attempts => Some(StoryOutcome::Failed {
                    reason: FailureReason::AttemptsExhausted { attempts: attempt },
                }),
                _ if Instant::now() >= deadline => Some(StoryOutcome::Failed {
                    reason: FailureReason::BudgetExceeded {
                        budget_secs: self.policy.story_budget_secs,
                    },
                }),
                _ => {
                    diagnostics = Some(diagnostics_for(&run.record));
                    None
                }
            };
            attempts.push(run.record);

            if let Some(outcome) = next {
                break outcome;
            }
        };

        let terminal = match &outcome {
            StoryOutcome::Accepted { .. } => LoopState::Accepted,
            StoryOutcome::Failed { .. } => LoopState::Failed,
        };
        let attempt = attempts.len() as u32;
        self.enter(story_id, attempt, &mut state, terminal).await;

        StoryRun {
            story_id: story_id.to_string(),
            outcome,
            attempts,
            duration: start.elapsed(),
        }
    }

    async fn run_attempt(
        &self,
        input: StoryInput<'_>,
        attempt: u32,
        diagnostics: Option<&Diagnostics>,
        deadline: Instant,
        state: &mut LoopState,
    ) -> AttemptRun {
        let started = Instant::now();
        let story = input.story;
        let story_id = story.id.as_str();
        let mut record = AttemptRecord::new(attempt, input.strategy);
        let finish = |mut record: AttemptRecord, outcome, files| {
            record.outcome = outcome;
            record.duration = started.elapsed();
            AttemptRun { record, files }
        };

        // Generate
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return finish(record, AttemptOutcome::BudgetExceeded, Vec::new());
        }
        let call_timeout = self.policy.generator_timeout().min(remaining);
        let request = GenerationRequest {
            story,
            components: input.components,
            strategy: input.strategy,
            prior_files: input.accepted,
            diagnostics,
            attempt,
        };
        info!(
            story_id,
            attempt,
            strategy = %input.strategy,
            generator = self.generator.name(),
            "Generating"
        );
        let files = match tokio::time::timeout(call_timeout, self.generator.generate(&request)).await {
            Ok(Ok(files)) => files,
            Ok(Err(e)) => {
                let outcome = if e.is_timeout() {
                    AttemptOutcome::GeneratorTimedOut
                } else {
                    AttemptOutcome::GeneratorFailed
                };
                record.generator_timed_out = e.is_timeout();
                record.generator_error = Some(e.to_string());
                return finish(record, outcome, Vec::new());
            }
            Err(_) => {
                record.generator_timed_out = true;
                record.generator_error = Some(
                    GenerationError::Timeout {
                        after: call_timeout,
                    }
                    .to_string(),
                );
                let outcome = if call_timeout < self.policy.generator_timeout() {
                    AttemptOutcome::BudgetExceeded
                } else {
                    AttemptOutcome::GeneratorTimedOut
                };
                return finish(record, outcome, Vec::new());
            }
        };
        record.candidate_paths = files.iter().map(|f| f.path.clone()).collect();
        debug!(story_id, attempt, files = files.len(), "Generated candidates");

        // Validate
        self.enter(story_id, attempt, state, LoopState::Validate).await;
        let validation = self
            .validator
            .validate(story, input.components, &files, input.accepted);
        for finding in validation.warnings() {
            warn!(story_id, attempt, finding = %finding, "Validation warning");
        }
        let passed = validation.passed;
        record.validation = Some(validation);
        if !passed {
            return finish(record, AttemptOutcome::ValidationFailed, files);
        }

        // Build
        self.enter(story_id, attempt, state, LoopState::Build).await;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let build = match tokio::time::timeout(
            remaining,
            self.builder.build(story_id, input.accepted, &files),
        )
        .await
        {
            Ok(build) => build,
            Err(_) => return finish(record, AttemptOutcome::BudgetExceeded, files),
        };
        let outcome = if build.success {
            None
        } else if build.is_timeout() {
            Some(AttemptOutcome::BuildTimedOut)
        } else {
            Some(AttemptOutcome::BuildFailed)
        };
        record.build = Some(build);
        if let Some(outcome) = outcome {
            return finish(record, outcome, files);
        }

        // Integrate
        self.enter(story_id, attempt, state, LoopState::Integrate).await;
        let combined = input.accepted.overlay(&files);
        let integration = self.integration.validate(
            IntegrationContext {
                story,
                stories: input.stories,
                accepted: input.accepted_ids,
            },
            &combined,
        );
        let passed = integration.passed;
        record.integration = Some(integration);
        if !passed {
            return finish(record, AttemptOutcome::IntegrationRejected, files);
        }

        finish(record, AttemptOutcome::Accepted, files)
    }

    async fn enter(&self, story_id: &str, attempt: u32, state: &mut LoopState, next: LoopState) {
        if *state == next {
            return;
        }
        debug_assert!(
            state.can_transition_to(next),
            "illegal loop transition {} -> {}",
            state,
            next
        );
        debug!(story_id, attempt, from = %state, to = %next, "Loop transition");
        *state = next;
        self.emit(EngineEvent::StateChanged {
            story_id: story_id.to_string(),
            attempt,
            state: next,
        })
        .await;
    }

    async fn emit(&self, event: EngineEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}

/// Context for the next attempt from a failed one.
fn diagnostics_for(record: &AttemptRecord) -> Diagnostics {
    let mut diagnostics = Diagnostics {
        attempt: record.attempt,
        generator_error: record.generator_error.clone(),
        timed_out: record.generator_timed_out,
        ..Default::default()
    };
    if let Some(validation) = &record.validation {
        diagnostics.findings = validation.findings.clone();
    }
    if let Some(build) = record.build.as_ref().filter(|b| !b.success) {
        diagnostics.build_errors = build.error_lines();
        if build.is_timeout() {
            diagnostics.timed_out = true;
            diagnostics.hint = Some(SIMPLIFY_HINT.to_string());
        }
    }
    if record.generator_timed_out {
        diagnostics.hint = Some(GENERATOR_TIMEOUT_HINT.to_string());
    }
    diagnostics
}
