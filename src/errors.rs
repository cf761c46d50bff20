//! Typed error hierarchy for the story-execution engine.
//!
//! - `EngineError`: fatal, execution-wide failures (bad story graph, checkpoint trouble)
//! - `CheckpointError`: durable state failures owned by the checkpoint manager
//! - `GenerationError`: typed failures from a code generator call
//! - `WorkspaceError`: isolated build workspace failures

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::story::StoryStatus;

/// Errors that abort a whole execution.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Cyclic dependency between stories: {}", stories.join(", "))]
    CyclicDependency { stories: Vec<String> },

    #[error("Story {story} depends on unknown story {dependency}")]
    UnknownDependency { story: String, dependency: String },

    #[error("Duplicate story id: {id}")]
    DuplicateStory { id: String },

    #[error("Story {story} cannot move from {from} to {to}")]
    IllegalTransition {
        story: String,
        from: StoryStatus,
        to: StoryStatus,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Graph errors are detected before any generation starts and never retried.
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            EngineError::CyclicDependency { .. }
                | EngineError::UnknownDependency { .. }
                | EngineError::DuplicateStory { .. }
        )
    }
}

/// Errors from the checkpoint manager.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Execution {execution_id} is locked by another run")]
    ExecutionLocked { execution_id: String },

    #[error("Invalid execution id '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidExecutionId(String),

    #[error("Story {story} cannot be accepted: {reason}")]
    AcceptanceRejected { story: String, reason: String },
}

/// Typed failure of a single generator call.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generator timed out after {}s", after.as_secs())]
    Timeout { after: Duration },

    #[error("Generator returned malformed output: {0}")]
    Malformed(String),

    #[error("Generator backend failed: {0}")]
    Backend(String),

    #[error("Failed to spawn generator: {0}")]
    Spawn(#[source] std::io::Error),
}

impl GenerationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GenerationError::Timeout { .. })
    }
}

/// Errors materializing the isolated build workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Path {path} escapes the workspace root")]
    PathEscape { path: String },

    #[error("Workspace I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyclic_dependency_names_every_story() {
        let err = EngineError::CyclicDependency {
            stories: vec!["A".into(), "B".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("A"));
        assert!(msg.contains("B"));
        assert!(err.is_graph_error());
    }

    #[test]
    fn unknown_dependency_carries_both_ids() {
        let err = EngineError::UnknownDependency {
            story: "S2".into(),
            dependency: "S9".into(),
        };
        match &err {
            EngineError::UnknownDependency { story, dependency } => {
                assert_eq!(story, "S2");
                assert_eq!(dependency, "S9");
            }
            _ => panic!("Expected UnknownDependency"),
        }
    }

    #[test]
    fn checkpoint_error_converts_into_engine_error() {
        let inner = CheckpointError::ExecutionLocked {
            execution_id: "exec-1".into(),
        };
        let err: EngineError = inner.into();
        assert!(matches!(
            err,
            EngineError::Checkpoint(CheckpointError::ExecutionLocked { .. })
        ));
        assert!(!err.is_graph_error());
    }

    #[test]
    fn generation_timeout_is_distinct() {
        let err = GenerationError::Timeout {
            after: Duration::from_secs(30),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("30s"));
        assert!(!GenerationError::Malformed("no files".into()).is_timeout());
    }

    #[test]
    fn illegal_transition_message_uses_status_names() {
        let err = EngineError::IllegalTransition {
            story: "S1".into(),
            from: StoryStatus::Accepted,
            to: StoryStatus::Pending,
        };
        assert!(err.to_string().contains("accepted"));
        assert!(err.to_string().contains("pending"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&EngineError::DuplicateStory { id: "x".into() });
        assert_std_error(&CheckpointError::InvalidExecutionId("../x".into()));
        assert_std_error(&GenerationError::Backend("boom".into()));
        assert_std_error(&WorkspaceError::PathEscape { path: "../x".into() });
    }
}
