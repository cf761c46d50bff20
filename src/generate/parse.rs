//! Parsing of `FILE:` blocks from generator output.
//!
//! ```text
//! FILE: src/components/Login.tsx
//! PURPOSE: Login form
//! ```tsx
//! export function Login() { ... }
//! ```
//! ```

use super::GeneratedFile;
use crate::errors::GenerationError;
use crate::strategy::GenerationStrategy;

/// Extract files from generator output.
///
/// Text outside `FILE:` blocks is ignored. A `FILE:` header without a fenced body, an
/// unterminated fence or an output with no files at all is malformed.
pub fn parse_file_blocks(
    output: &str,
    story_id: &str,
    strategy: GenerationStrategy,
) -> Result<Vec<GeneratedFile>, GenerationError> {
    let mut files = Vec::new();
    let mut lines = output.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(path) = line.trim().strip_prefix("FILE:") else {
            continue;
        };
        let path = path.trim().trim_matches('`');
        if path.is_empty() {
            return Err(GenerationError::Malformed(
                "FILE header without a path".to_string(),
            ));
        }

        // Skip metadata lines until the opening fence
        let mut opened = false;
        while let Some(next) = lines.peek() {
            let trimmed = next.trim();
            if trimmed.starts_with("```") {
                lines.next();
                opened = true;
                break;
            }
            if trimmed.starts_with("FILE:") {
                break;
            }
            lines.next();
        }
        if !opened {
            return Err(GenerationError::Malformed(format!(
                "FILE {} has no fenced content",
                path
            )));
        }

        let mut body = Vec::new();
        let mut closed = false;
        for body_line in lines.by_ref() {
            if body_line.trim() == "```" {
                closed = true;
                break;
            }
            body.push(body_line);
        }
        if !closed {
            return Err(GenerationError::Malformed(format!(
                "FILE {} has an unterminated code fence",
                path
            )));
        }

        let mut content = body.join("\n");
        content.push('\n');
        files.push(GeneratedFile::new(path, &content, story_id, strategy));
    }

    if files.is_empty() {
        return Err(GenerationError::Malformed(
            "output contains no FILE blocks".to_string(),
        ));
    }
    Ok(files)
}
