//! The story-execution engine.
//!
//! One invocation:
//!
//! 1. Order stories by dependency (fatal on cycles, unknown or duplicate ids)
//! 2. Lock and resume the execution's checkpoint
//! 3. For each story in order: skip if accepted, block if a dependency is not
//!    accepted, otherwise select a strategy and run the auto-fix loop
//! 4. Commit every outcome through the checkpoint manager
//! 5. Write the report and the accepted manifest
//!
//! Stories run strictly one at a time. Cancellation and the per-invocation story
//! limit are honored between stories only.

mod events;

pub use events::EngineEvent;

use anyhow::anyhow;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::build::{BuildOrchestrator, BuildPolicy, BuildToolchain};
use crate::checkpoint::{Acceptance, CheckpointManager, ExecutionStatus, StoryRecord};
use crate::dag::{GraphBuilder, StoryGraph};
use crate::errors::EngineError;
use crate::fixloop::{FailureReason, FixLoop, FixLoopPolicy, StoryInput, StoryOutcome, StoryRun};
use crate::generate::CodeGenerator;
use crate::integration::IntegrationValidator;
use crate::report::{ExecutionReport, OutputManifest, RunOutcome, StoryReport};
use crate::story::{ComponentIndex, ComponentSpec, StoryStatus, UserStory, index_components};
use crate::strategy::StrategyPolicy;
use crate::validate::{StoryValidator, ValidationPolicy};

/// What happens to the run when a story ends `failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the execution at the first failed story.
    Halt,
    /// Keep going with stories that do not depend on the failed one.
    #[default]
    Continue,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halt => write!(f, "halt"),
            Self::Continue => write!(f, "continue"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "halt" | "stop" => Ok(Self::Halt),
            "continue" | "skip" => Ok(Self::Continue),
            other => Err(format!("unknown failure policy '{}' (use halt or continue)", other)),
        }
    }
}

/// `[execution]` section of storyforge.toml.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPolicy {
    pub failure_policy: FailurePolicy,
    /// Suspend after this many stories ran in one invocation.
    pub max_stories_per_invocation: Option<usize>,
    /// Re-run stories recorded as failed when resuming.
    pub retry_failed: bool,
}

/// The engine's input.
#[derive(Debug, Clone)]
pub struct EngineInput {
    /// Idempotency key: re-running with the same id resumes.
    pub execution_id: String,
    pub stories: Vec<UserStory>,
    pub components: Vec<ComponentSpec>,
}

pub struct StoryEngine {
    state_dir: PathBuf,
    generator: Arc<dyn CodeGenerator>,
    toolchain: Option<Arc<dyn BuildToolchain>>,
    strategy: StrategyPolicy,
    validation: ValidationPolicy,
    build: BuildPolicy,
    fix_loop: FixLoopPolicy,
    execution: ExecutionPolicy,
    event_tx: Option<mpsc::Sender<EngineEvent>>,
}

impl StoryEngine {
    pub fn new(state_dir: impl Into<PathBuf>, generator: Arc<dyn CodeGenerator>) -> Self {
        Self {
            state_dir: state_dir.into(),
            generator,
            toolchain: None,
            strategy: StrategyPolicy::default(),
            validation: ValidationPolicy::default(),
            build: BuildPolicy::default(),
            fix_loop: FixLoopPolicy::default(),
            execution: ExecutionPolicy::default(),
            event_tx: None,
        }
    }

    pub fn with_strategy_policy(mut self, policy: StrategyPolicy) -> Self {
        self.strategy = policy;
        self
    }

    pub fn with_validation_policy(mut self, policy: ValidationPolicy) -> Self {
        self.validation = policy;
        self
    }

    pub fn with_build_policy(mut self, policy: BuildPolicy) -> Self {
        self.build = policy;
        self
    }

    /// Use this toolchain instead of the build policy's shell command.
    pub fn with_toolchain(mut self, toolchain: Arc<dyn BuildToolchain>) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    pub fn with_fix_loop_policy(mut self, policy: FixLoopPolicy) -> Self {
        self.fix_loop = policy;
        self
    }

    pub fn with_execution_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.execution = policy;
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<EngineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run (or resume) an execution until it completes, halts, suspends or is cancelled.
    pub async fn execute(
        &self,
        input: &EngineInput,
        cancel: &AtomicBool,
    ) -> Result<ExecutionReport, EngineError> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let execution_id = input.execution_id.as_str();

        // Graph errors are fatal before any state is touched
        let graph = GraphBuilder::new(input.stories.clone()).build()?;
        let order = graph.order();
        let components = index_components(&input.components);
        warn_unknown_components(&graph, &components);

        let mut checkpoint = CheckpointManager::open(&self.state_dir, execution_id)?;
        let resumed = checkpoint.resume()?;
        let mut accepted_ids = resumed.accepted.clone();

        let previous: HashMap<String, StoryRecord> = checkpoint
            .checkpoint()
            .latest_records()
            .into_iter()
            .map(|(id, record)| (id.to_string(), record.clone()))
            .collect();
        for id in previous.keys().filter(|id| graph.get_index(id).is_none()) {
            warn!(execution_id, story_id = %id, "Checkpoint records a story that is not in the input");
        }

        info!(
            execution_id,
            stories = order.len(),
            accepted = accepted_ids.len(),
            policy = %self.execution.failure_policy,
            "Starting execution"
        );
        self.emit(EngineEvent::ExecutionStarted {
            execution_id: execution_id.to_string(),
            total: order.len(),
            accepted: accepted_ids.len(),
            rolled_back: resumed.rolled_back.clone(),
        })
        .await;

        let validator = StoryValidator::new(self.validation.clone());
        let integration = IntegrationValidator::new(components.clone());
        let mut builder = BuildOrchestrator::from_policy(&self.build, &checkpoint.workspace_dir());
        if let Some(toolchain) = &self.toolchain {
            builder = builder.with_toolchain(toolchain.clone());
        }

        let mut reports: HashMap<String, StoryReport> = HashMap::new();
        let mut processed = 0usize;
        let mut outcome = RunOutcome::Completed;

        for (position, &index) in order.iter().enumerate() {
            let Some(story) = graph.get_story(index) else {
                continue;
            };
            let story_id = story.id.as_str();

            match previous.get(story_id) {
                Some(record) if record.status == StoryStatus::Accepted && accepted_ids.contains(story_id) => {
                    reports.insert(story.id.clone(), StoryReport::from_record(&story.title, record));
                    self.emit(EngineEvent::StorySkipped {
                        story_id: story.id.clone(),
                    })
                    .await;
                    continue;
                }
                Some(record)
                    if record.status == StoryStatus::Failed
                        && !self.execution.retry_failed
                        && !resumed.rolled_back.iter().any(|id| id == story_id) =>
                {
                    reports.insert(story.id.clone(), StoryReport::from_record(&story.title, record));
                    self.emit(EngineEvent::StorySkipped {
                        story_id: story.id.clone(),
                    })
                    .await;
                    if self.execution.failure_policy == FailurePolicy::Halt {
                        outcome = RunOutcome::Halted;
                        break;
                    }
                    continue;
                }
                _ => {}
            }

            if cancel.load(Ordering::SeqCst) {
                info!(execution_id, "Cancelled between stories");
                outcome = RunOutcome::Cancelled;
                break;
            }
            if self
                .execution
                .max_stories_per_invocation
                .is_some_and(|max| processed >= max)
            {
                info!(execution_id, processed, "Story limit reached, suspending");
                outcome = RunOutcome::Suspended;
                break;
            }

            let blockers = graph.unaccepted_dependencies(index, &accepted_ids);
            if !blockers.is_empty() {
                let reason = FailureReason::BlockedByDependency {
                    dependencies: blockers,
                };
                warn!(execution_id, story_id, reason = %reason, "Story blocked");
                checkpoint.commit_failed(story_id, 0, Vec::new(), reason.to_string())?;
                let mut report = StoryReport::pending(story_id, &story.title);
                report.status = StoryStatus::Failed;
                report.reason = Some(reason.to_string());
                reports.insert(story.id.clone(), report);
                self.emit(EngineEvent::StoryFinished {
                    story_id: story.id.clone(),
                    status: StoryStatus::Failed,
                    attempts: 0,
                    files: 0,
                    reason: Some(reason.to_string()),
                })
                .await;
                if self.execution.failure_policy == FailurePolicy::Halt {
                    outcome = RunOutcome::Halted;
                    break;
                }
                continue;
            }

            let mut working = story.clone();
            working.status = StoryStatus::Pending;
            working.transition(StoryStatus::InProgress)?;

            let story_components: Vec<ComponentSpec> = working
                .assigned_components
                .iter()
                .filter_map(|id| components.get(id).cloned())
                .collect();
            let decision = self.strategy.select(&working, &story_components);
            info!(
                execution_id,
                story_id,
                strategy = %decision.strategy,
                reason = %decision.reason.description(),
                "Starting story"
            );
            self.emit(EngineEvent::StoryStarted {
                story_id: story.id.clone(),
                title: story.title.clone(),
                position: position + 1,
                total: order.len(),
                strategy: decision.strategy,
                reason: decision.reason.description(),
            })
            .await;

            checkpoint.mark_in_flight(story_id)?;
            let fix_loop = FixLoop::new(
                self.generator.as_ref(),
                &validator,
                &builder,
                &integration,
                self.fix_loop.clone(),
            )
            .with_event_channel(self.event_tx.clone());
            let run = fix_loop
                .run(StoryInput {
                    story: &working,
                    components: &story_components,
                    strategy: decision.strategy,
                    accepted: checkpoint.files(),
                    stories: graph.stories(),
                    accepted_ids: &accepted_ids,
                })
                .await;
            processed += 1;

            let (status, files, reason) = self.commit(&mut checkpoint, &run)?;
            working.transition(status)?;
            if status == StoryStatus::Accepted {
                accepted_ids.insert(story.id.clone());
            }
            info!(
                execution_id,
                story_id,
                status = %status,
                attempts = run.attempt_count(),
                "Story finished"
            );

            let mut report = StoryReport::pending(story_id, &story.title);
            report.status = status;
            report.attempts = run.attempt_count();
            report.strategy = Some(decision.strategy);
            report.strategy_reason = Some(decision.reason.description());
            report.findings = run.last_findings();
            report.reason = reason.clone();
            report.history = run.attempts.clone();
            reports.insert(story.id.clone(), report);

            self.emit(EngineEvent::StoryFinished {
                story_id: story.id.clone(),
                status,
                attempts: run.attempt_count(),
                files,
                reason,
            })
            .await;

            if status == StoryStatus::Failed && self.execution.failure_policy == FailurePolicy::Halt {
                warn!(execution_id, story_id, "Halting after failed story");
                outcome = RunOutcome::Halted;
                break;
            }
        }

        let stories: Vec<StoryReport> = order
            .iter()
            .filter_map(|&i| graph.get_story(i))
            .map(|s| {
                reports
                    .remove(&s.id)
                    .unwrap_or_else(|| StoryReport::pending(&s.id, &s.title))
            })
            .collect();

        let all_accepted = stories.iter().all(|s| s.status == StoryStatus::Accepted);
        let status = match outcome {
            _ if all_accepted => ExecutionStatus::Completed,
            RunOutcome::Suspended | RunOutcome::Cancelled => ExecutionStatus::Running,
            RunOutcome::Completed | RunOutcome::Halted => ExecutionStatus::Failed,
        };
        checkpoint.set_status(status)?;

        let report = ExecutionReport {
            execution_id: execution_id.to_string(),
            status,
            outcome,
            stories,
            manifest: checkpoint.files().entries(),
            started_at,
            finished_at: Utc::now(),
            duration: timer.elapsed(),
        };
        checkpoint.write_artifact("report.json", &report)?;
        checkpoint.write_artifact("manifest.json", &OutputManifest::new(execution_id, checkpoint.files()))?;

        info!(
            execution_id,
            outcome = %outcome,
            status = %status,
            summary = %report.summary(),
            "Execution finished"
        );
        self.emit(EngineEvent::ExecutionFinished {
            execution_id: execution_id.to_string(),
            outcome,
            accepted: report.count(StoryStatus::Accepted),
            failed: report.count(StoryStatus::Failed),
        })
        .await;

        Ok(report)
    }

    /// Commit a finished story. Returns its status, file count and failure reason.
    fn commit(
        &self,
        checkpoint: &mut CheckpointManager,
        run: &StoryRun,
    ) -> Result<(StoryStatus, usize, Option<String>), EngineError> {
        match &run.outcome {
            StoryOutcome::Accepted { files } => {
                let evidence = run.last_attempt().and_then(|a| {
                    Some(Acceptance {
                        validation: a.validation.as_ref()?,
                        build: a.build.as_ref()?,
                        integration: a.integration.as_ref()?,
                    })
                });
                let Some(evidence) = evidence else {
                    return Err(EngineError::Other(anyhow!(
                        "Story {} was accepted without complete evidence",
                        run.story_id
                    )));
                };
                checkpoint.commit_accepted(&run.story_id, run.attempt_count(), files, evidence)?;
                Ok((StoryStatus::Accepted, files.len(), None))
            }
            StoryOutcome::Failed { reason } => {
                checkpoint.commit_failed(
                    &run.story_id,
                    run.attempt_count(),
                    run.last_findings(),
                    reason.to_string(),
                )?;
                Ok((StoryStatus::Failed, 0, Some(reason.to_string())))
            }
        }
    }

    async fn emit(&self, event: EngineEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}

fn warn_unknown_components(graph: &StoryGraph, components: &ComponentIndex) {
    for story in graph.stories() {
        for id in story
            .assigned_components
            .iter()
            .filter(|id| !components.contains_key(*id))
        {
            warn!(story_id = %story.id, component = %id, "Story is assigned an unknown component");
        }
    }
}
