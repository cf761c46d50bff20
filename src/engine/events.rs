//! Progress events emitted by the engine.

use serde::{Deserialize, Serialize};

use crate::fixloop::{AttemptOutcome, LoopState};
use crate::report::RunOutcome;
use crate::story::StoryStatus;
use crate::strategy::GenerationStrategy;

/// Events emitted during an execution, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Stories were ordered and the checkpoint resumed.
    ExecutionStarted {
        execution_id: String,
        total: usize,
        accepted: usize,
        rolled_back: Vec<String>,
    },
    /// A story was accepted in an earlier invocation.
    StorySkipped { story_id: String },
    /// A story begins its loop.
    StoryStarted {
        story_id: String,
        title: String,
        position: usize,
        total: usize,
        strategy: GenerationStrategy,
        reason: String,
    },
    /// The loop moved to a new state.
    StateChanged {
        story_id: String,
        attempt: u32,
        state: LoopState,
    },
    AttemptStarted {
        story_id: String,
        attempt: u32,
        max_attempts: u32,
    },
    AttemptFinished {
        story_id: String,
        attempt: u32,
        outcome: AttemptOutcome,
        blocking: usize,
    },
    /// A story was committed.
    StoryFinished {
        story_id: String,
        status: StoryStatus,
        attempts: u32,
        files: usize,
        reason: Option<String>,
    },
    ExecutionFinished {
        execution_id: String,
        outcome: RunOutcome,
        accepted: usize,
        failed: usize,
    },
}

impl EngineEvent {
    pub fn story_id(&self) -> Option<&str> {
        match self {
            Self::StorySkipped { story_id }
            | Self::StoryStarted { story_id, .. }
            | Self::StateChanged { story_id, .. }
            | Self::AttemptStarted { story_id, .. }
            | Self::AttemptFinished { story_id, .. }
            | Self::StoryFinished { story_id, .. } => Some(story_id),
            Self::ExecutionStarted { .. } | Self::ExecutionFinished { .. } => None,
        }
    }
}
