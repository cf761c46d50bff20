//! Generative strategy backed by an external command.
//!
//! The command is run through `sh -c` with the prompt on stdin and is expected to print
//! `FILE:` blocks on stdout. The caller owns the deadline: dropping the future kills the
//! child process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{CodeGenerator, GeneratedFile, GenerationRequest, build_prompt, parse_file_blocks};
use crate::errors::GenerationError;
use crate::util::tail;

/// Keep this many trailing bytes of stderr in backend errors.
const STDERR_TAIL: usize = 2000;

pub struct CommandGenerator {
    command: String,
    working_dir: PathBuf,
    env: HashMap<String, String>,
}

impl CommandGenerator {
    pub fn new(command: impl Into<String>, working_dir: impl AsRef<Path>) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.as_ref().to_path_buf(),
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

#[async_trait]
impl CodeGenerator for CommandGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<Vec<GeneratedFile>, GenerationError> {
        let prompt = build_prompt(request);
        debug!(
            story_id = %request.story.id,
            attempt = request.attempt,
            prompt_len = prompt.len(),
            "Invoking generator command"
        );

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .envs(&self.env)
            .env("STORYFORGE_STORY_ID", &request.story.id)
            .env("STORYFORGE_STRATEGY", request.strategy.to_string())
            .env("STORYFORGE_ATTEMPT", request.attempt.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(GenerationError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(GenerationError::Spawn)?;
            // stdin is dropped here, closing the pipe
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(GenerationError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GenerationError::Backend(format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                tail(stderr.trim(), STDERR_TAIL)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_file_blocks(&stdout, &request.story.id, request.strategy)
    }

    fn name(&self) -> &str {
        &self.command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FileManifest;
    use crate::story::UserStory;
    use crate::strategy::GenerationStrategy;
    use tempfile::tempdir;

    fn request<'a>(story: &'a UserStory, prior: &'a FileManifest) -> GenerationRequest<'a> {
        GenerationRequest {
            story,
            components: &[],
            strategy: GenerationStrategy::Generative,
            prior_files: prior,
            diagnostics: None,
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_command_output_is_parsed() {
        let dir = tempdir().unwrap();
        let script = "cat > /dev/null; printf 'FILE: src/%s.ts\\n```ts\\nexport const a = 1;\\n```\\n' \"$STORYFORGE_STORY_ID\"";
        let generator = CommandGenerator::new(script, dir.path());
        let story = UserStory::new("S1", "Thing", vec![]);
        let prior = FileManifest::new();

        let files = generator.generate(&request(&story, &prior)).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/S1.ts");
        assert_eq!(files[0].strategy, GenerationStrategy::Generative);
    }

    #[tokio::test]
    async fn test_prompt_is_sent_on_stdin() {
        let dir = tempdir().unwrap();
        let script = "grep -q 'Story S1: Thing' && printf 'FILE: ok.txt\\n```\\nok\\n```\\n'";
        let generator = CommandGenerator::new(script, dir.path());
        let story = UserStory::new("S1", "Thing", vec![]);
        let prior = FileManifest::new();

        let files = generator.generate(&request(&story, &prior)).await.unwrap();
        assert_eq!(files[0].path, "ok.txt");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_backend_error() {
        let dir = tempdir().unwrap();
        let generator = CommandGenerator::new("cat > /dev/null; echo quota >&2; exit 3", dir.path());
        let story = UserStory::new("S1", "Thing", vec![]);
        let prior = FileManifest::new();

        match generator.generate(&request(&story, &prior)).await {
            Err(GenerationError::Backend(msg)) => {
                assert!(msg.contains("exit code 3"));
                assert!(msg.contains("quota"));
            }
            other => panic!("Expected Backend error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_output_is_malformed() {
        let dir = tempdir().unwrap();
        let generator = CommandGenerator::new("cat > /dev/null", dir.path());
        let story = UserStory::new("S1", "Thing", vec![]);
        let prior = FileManifest::new();

        let err = generator.generate(&request(&story, &prior)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }
}
