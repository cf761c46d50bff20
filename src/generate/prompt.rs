//! Prompt construction for generative backends.

use super::GenerationRequest;
use std::fmt::Write as _;

/// Build the prompt sent to a generative backend.
pub fn build_prompt(request: &GenerationRequest<'_>) -> String {
    let story = request.story;
    let mut prompt = String::new();

    let _ = writeln!(prompt, "# Story {}: {}", story.id, story.title);
    if !story.description.is_empty() {
        let _ = writeln!(prompt, "\n{}", story.description);
    }

    if !story.acceptance_criteria.is_empty() {
        let _ = writeln!(prompt, "\n## Acceptance Criteria");
        for (i, criterion) in story.acceptance_criteria.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {}", i + 1, criterion);
        }
    }

    if !request.components.is_empty() {
        let _ = writeln!(prompt, "\n## Components");
        for component in request.components {
            let _ = write!(prompt, "- {} -> {}", component.name, component.file_path);
            if !component.exports.is_empty() {
                let _ = write!(prompt, " (exports: {})", component.exports.join(", "));
            }
            if !component.dependencies.is_empty() {
                let _ = write!(
                    prompt,
                    " (depends on: {})",
                    component.dependencies.join(", ")
                );
            }
            prompt.push('\n');
        }
    }

    if !request.prior_files.is_empty() {
        let _ = writeln!(prompt, "\n## Existing Files");
        for file in request.prior_files.iter() {
            let _ = writeln!(prompt, "- {} (story {})", file.path, file.story_id);
        }
        let _ = writeln!(
            prompt,
            "\nDo not rewrite files owned by other stories. Import from them instead."
        );
    }

    if let Some(diagnostics) = request.diagnostics {
        let _ = writeln!(prompt, "\n## Validation Feedback to Address");
        prompt.push_str(&diagnostics.render());
    }

    let _ = writeln!(prompt, "\n## Output Format");
    let _ = writeln!(
        prompt,
        "Return every file as:\nFILE: <relative path>\nPURPOSE: <one line>\n```<language>\n<complete file content>\n```"
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::Diagnostics;
    use crate::manifest::{AcceptedFile, FileManifest};
    use crate::story::{ComponentSpec, UserStory};
    use crate::strategy::GenerationStrategy;

    #[test]
    fn test_prompt_sections() {
        let mut story = UserStory::new("S2", "Chat", vec!["S1"]);
        story.description = "Real-time chat".into();
        story.acceptance_criteria = vec!["Messages appear live".into()];
        let components = vec![
            ComponentSpec::new("chat", "ChatPanel", "src/ChatPanel.tsx")
                .with_exports(&["ChatPanel"])
                .with_dependencies(&["api"]),
        ];
        let mut prior = FileManifest::new();
        prior.insert(AcceptedFile {
            path: "src/api.ts".into(),
            content: "export const api = 1;".into(),
            content_hash: "h".into(),
            story_id: "S1".into(),
        });
        let diagnostics = Diagnostics {
            attempt: 1,
            build_errors: vec!["boom".into()],
            ..Default::default()
        };
        let request = GenerationRequest {
            story: &story,
            components: &components,
            strategy: GenerationStrategy::Generative,
            prior_files: &prior,
            diagnostics: Some(&diagnostics),
            attempt: 2,
        };

        let prompt = build_prompt(&request);
        assert!(prompt.starts_with("# Story S2: Chat"));
        assert!(prompt.contains("1. Messages appear live"));
        assert!(prompt.contains("ChatPanel -> src/ChatPanel.tsx (exports: ChatPanel)"));
        assert!(prompt.contains("- src/api.ts (story S1)"));
        assert!(prompt.contains("## Validation Feedback to Address"));
        assert!(prompt.contains("- boom"));
        assert!(prompt.contains("FILE: <relative path>"));
    }

    #[test]
    fn test_first_attempt_has_no_feedback_section() {
        let story = UserStory::new("S1", "Setup", vec![]);
        let prior = FileManifest::new();
        let request = GenerationRequest {
            story: &story,
            components: &[],
            strategy: GenerationStrategy::Generative,
            prior_files: &prior,
            diagnostics: None,
            attempt: 1,
        };
        let prompt = build_prompt(&request);
        assert!(!prompt.contains("Validation Feedback"));
        assert!(!prompt.contains("Existing Files"));
    }
}
