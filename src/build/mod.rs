//! Build orchestration: build the cumulative tree in an isolated workspace.
//!
//! - [`IsolatedWorkspace`]: one directory per execution, re-materialized per attempt
//! - [`BuildToolchain`]: the opaque "build this tree" operation
//! - [`ShellToolchain`]: runs a configured shell command
//! - [`BuildOrchestrator`]: materialize, run under a wall-clock budget, map the output

mod parse;
mod workspace;

pub use parse::{BuildDiagnostic, parse_build_output};
pub use workspace::{IsolatedWorkspace, checked_relative};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::generate::GeneratedFile;
use crate::manifest::FileManifest;
use crate::util::duration_serde;
use crate::validate::{Finding, FindingCategory};

/// `[build]` section of storyforge.toml.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildPolicy {
    /// Shell command run in the workspace. No command means builds always pass.
    pub command: Option<String>,
    /// Wall-clock budget per build in seconds.
    pub timeout_secs: u64,
    /// Top-level workspace directories kept between attempts (dependency caches).
    pub preserve: Vec<String>,
    /// Extra environment for the build command.
    pub env: HashMap<String, String>,
    /// Diagnostics kept per build result.
    pub max_errors: usize,
}

impl Default for BuildPolicy {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 120,
            preserve: vec!["node_modules".to_string()],
            env: HashMap::new(),
            max_errors: 50,
        }
    }
}

/// Raw result of running a toolchain.
#[derive(Debug, Clone, Default)]
pub struct ToolchainOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolchainOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// External "build this file tree" operation.
///
/// Implementations must stop work when the returned future is dropped; the
/// orchestrator enforces the deadline by dropping it.
#[async_trait]
pub trait BuildToolchain: Send + Sync {
    async fn build(&self, workspace: &Path) -> std::io::Result<ToolchainOutput>;

    fn name(&self) -> &str;
}

/// Runs a shell command (`sh -c`) in the workspace.
pub struct ShellToolchain {
    command: String,
    env: HashMap<String, String>,
}

impl ShellToolchain {
    pub fn new(command: impl Into<String>, env: HashMap<String, String>) -> Self {
        Self {
            command: command.into(),
            env,
        }
    }
}

#[async_trait]
impl BuildToolchain for ShellToolchain {
    async fn build(&self, workspace: &Path) -> std::io::Result<ToolchainOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(workspace)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn()?;
        let _group = ProcessGroup(child.id());
        let output = child.wait_with_output().await?;

        Ok(ToolchainOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn name(&self) -> &str {
        &self.command
    }
}

/// Kills the build's whole process group when dropped, so grandchildren of `sh`
/// die with it on timeout.
struct ProcessGroup(Option<u32>);

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.0 {
            let group = format!("-{}", pgid);
            let killed = std::process::Command::new("kill")
                .args(["-s", "KILL", "--", group.as_str()])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = killed {
                warn!(pgid, error = %e, "Failed to kill build process group");
            }
        }
    }
}

/// Why a build failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildFailure {
    /// The toolchain ran and reported errors.
    Compile,
    /// The wall-clock budget ran out. Retrying the same code is pointless.
    Timeout { budget_secs: u64 },
    /// The candidate tree could not be written to the workspace.
    Workspace { message: String },
    /// The toolchain could not be run at all.
    Toolchain { message: String },
}

impl BuildFailure {
    pub fn description(&self) -> String {
        match self {
            Self::Compile => "build reported errors".to_string(),
            Self::Timeout { budget_secs } => format!("build timed out after {}s", budget_secs),
            Self::Workspace { message } => format!("workspace error: {}", message),
            Self::Toolchain { message } => format!("toolchain error: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub story_id: String,
    pub success: bool,
    pub errors: Vec<BuildDiagnostic>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<BuildFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl BuildResult {
    pub fn passed(story_id: &str, duration: Duration) -> Self {
        Self {
            story_id: story_id.to_string(),
            success: true,
            errors: Vec::new(),
            duration,
            failure: None,
            exit_code: Some(0),
        }
    }

    pub fn failed(
        story_id: &str,
        failure: BuildFailure,
        errors: Vec<BuildDiagnostic>,
        duration: Duration,
    ) -> Self {
        Self {
            story_id: story_id.to_string(),
            success: false,
            errors,
            duration,
            failure: Some(failure),
            exit_code: None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.failure, Some(BuildFailure::Timeout { .. }))
    }

    pub fn error_lines(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }

    /// Errors as blocking findings, for story reports.
    pub fn findings(&self) -> Vec<Finding> {
        self.errors
            .iter()
            .map(|e| {
                let message = match &e.code {
                    Some(code) => format!("{}: {}", code, e.message),
                    None => e.message.clone(),
                };
                let finding = Finding::blocking(
                    FindingCategory::Build,
                    e.file.clone().unwrap_or_default(),
                    message,
                );
                match e.line {
                    Some(line) => finding.with_line(line),
                    None => finding,
                }
            })
            .collect()
    }
}

pub struct BuildOrchestrator {
    toolchain: Option<Arc<dyn BuildToolchain>>,
    workspace: IsolatedWorkspace,
    timeout: Duration,
    max_errors: usize,
}

impl BuildOrchestrator {
    pub fn new(
        toolchain: Option<Arc<dyn BuildToolchain>>,
        workspace: IsolatedWorkspace,
        timeout: Duration,
    ) -> Self {
        Self {
            toolchain,
            workspace,
            timeout,
            max_errors: 50,
        }
    }

    /// Orchestrator wired from a `[build]` policy.
    pub fn from_policy(policy: &BuildPolicy, workspace_root: &Path) -> Self {
        let toolchain = policy.command.as_ref().map(|cmd| {
            Arc::new(ShellToolchain::new(cmd.clone(), policy.env.clone())) as Arc<dyn BuildToolchain>
        });
        let workspace = IsolatedWorkspace::new(workspace_root, policy.preserve.clone());
        let mut orchestrator =
            Self::new(toolchain, workspace, Duration::from_secs(policy.timeout_secs));
        orchestrator.max_errors = policy.max_errors;
        orchestrator
    }

    /// Replace the toolchain built from the policy.
    pub fn with_toolchain(mut self, toolchain: Arc<dyn BuildToolchain>) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    pub fn workspace(&self) -> &IsolatedWorkspace {
        &self.workspace
    }

    /// Build the accepted files plus the story's candidates.
    pub async fn build(
        &self,
        story_id: &str,
        accepted: &FileManifest,
        candidates: &[GeneratedFile],
    ) -> BuildResult {
        let start = Instant::now();
        let tree = accepted.overlay(candidates);

        if let Err(e) = self.workspace.materialize(&tree) {
            warn!(story_id, error = %e, "Failed to materialize build workspace");
            return BuildResult::failed(
                story_id,
                BuildFailure::Workspace {
                    message: e.to_string(),
                },
                vec![BuildDiagnostic::message(e.to_string())],
                start.elapsed(),
            );
        }

        let Some(toolchain) = &self.toolchain else {
            debug!(story_id, "No build command configured, skipping build");
            return BuildResult::passed(story_id, start.elapsed());
        };

        info!(story_id, toolchain = toolchain.name(), files = tree.len(), "Building");
        let outcome = tokio::time::timeout(self.timeout, toolchain.build(self.workspace.root())).await;
        let duration = start.elapsed();

        match outcome {
            Err(_) => {
                warn!(story_id, budget_secs = self.timeout.as_secs(), "Build timed out");
                BuildResult::failed(
                    story_id,
                    BuildFailure::Timeout {
                        budget_secs: self.timeout.as_secs(),
                    },
                    vec![BuildDiagnostic::message(format!(
                        "Build exceeded its {}s budget",
                        self.timeout.as_secs()
                    ))],
                    duration,
                )
            }
            Ok(Err(e)) => BuildResult::failed(
                story_id,
                BuildFailure::Toolchain {
                    message: e.to_string(),
                },
                vec![BuildDiagnostic::message(format!(
                    "Failed to run {}: {}",
                    toolchain.name(),
                    e
                ))],
                duration,
            ),
            Ok(Ok(output)) if output.success() => BuildResult::passed(story_id, duration),
            Ok(Ok(output)) => {
                let mut errors = parse_build_output(&output.stdout, &output.stderr, true);
                errors.truncate(self.max_errors.max(1));
                let mut result =
                    BuildResult::failed(story_id, BuildFailure::Compile, errors, duration);
                result.exit_code = output.exit_code;
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::GenerationStrategy;
    use tempfile::tempdir;

    fn candidates() -> Vec<GeneratedFile> {
        vec![GeneratedFile::new(
            "src/a.ts",
            "export const a = 1;\n",
            "S1",
            GenerationStrategy::Template,
        )]
    }

    fn orchestrator(dir: &Path, command: Option<&str>, timeout_secs: u64) -> BuildOrchestrator {
        let policy = BuildPolicy {
            command: command.map(String::from),
            timeout_secs,
            ..Default::default()
        };
        BuildOrchestrator::from_policy(&policy, &dir.join("workspace"))
    }

    #[tokio::test]
    async fn test_no_command_passes() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path(), None, 10);
        let result = orch.build("S1", &FileManifest::new(), &candidates()).await;
        assert!(result.success);
        assert!(orch.workspace().root().join("src/a.ts").exists());
    }

    #[tokio::test]
    async fn test_build_sees_candidates() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path(), Some("test -f src/a.ts"), 10);
        let result = orch.build("S1", &FileManifest::new(), &candidates()).await;
        assert!(result.success, "{:?}", result);
    }

    #[tokio::test]
    async fn test_compile_failure_is_parsed() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(
            dir.path(),
            Some("echo \"src/a.ts(1,5): error TS1005: ';' expected.\"; exit 2"),
            10,
        );
        let result = orch.build("S1", &FileManifest::new(), &candidates()).await;
        assert!(!result.success);
        assert_eq!(result.failure, Some(BuildFailure::Compile));
        assert_eq!(result.exit_code, Some(2));
        assert_eq!(result.errors[0].code.as_deref(), Some("TS1005"));
        assert!(!result.is_timeout());
        let findings = result.findings();
        assert_eq!(findings[0].category, FindingCategory::Build);
        assert_eq!(findings[0].line, Some(1));
    }

    #[tokio::test]
    async fn test_timeout_is_distinct() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path(), Some("sleep 5"), 1);
        let result = orch.build("S1", &FileManifest::new(), &candidates()).await;
        assert!(!result.success);
        assert!(result.is_timeout());
        assert_eq!(result.failure, Some(BuildFailure::Timeout { budget_secs: 1 }));
        assert!(result.duration < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path(), Some("(sleep 2; touch late) & sleep 30"), 1);
        let result = orch.build("S1", &FileManifest::new(), &candidates()).await;
        assert!(result.is_timeout());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!orch.workspace().root().join("late").exists());
    }

    #[tokio::test]
    async fn test_escaping_candidate_fails_build() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path(), Some("true"), 10);
        let bad = vec![GeneratedFile::new("../x.ts", "x", "S1", GenerationStrategy::Template)];
        let result = orch.build("S1", &FileManifest::new(), &bad).await;
        assert!(matches!(result.failure, Some(BuildFailure::Workspace { .. })));
    }

    #[test]
    fn test_build_result_serializes_duration_as_millis() {
        let result = BuildResult::passed("S1", Duration::from_millis(250));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration"], 250);
        assert!(json.get("failure").is_none());
    }
}
