//! Initialization for storyforge projects.
//!
//! `storyforge init` creates the `.storyforge/` directory in a project:
//!
//! ```text
//! .storyforge/
//! ├── storyforge.toml   # Configuration (defaults written out)
//! ├── stories.json      # Sample stories and components
//! ├── executions/       # One directory per execution id
//! └── logs/             # Log files
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::STATE_DIR;
use crate::story::{ComponentSpec, StoriesFile, UserStory};
use crate::storyforge_config::{CONFIG_FILE, StoryforgeToml};

/// Result of initializing a storyforge project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the `.storyforge` directory
    pub state_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

/// Initialize a storyforge project in the given directory.
///
/// Existing files are never overwritten; a second call only fills in what is missing.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let state_dir = project_dir.join(STATE_DIR);
    let created = !state_dir.exists();

    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create directory: {}", state_dir.display()))?;
    ensure_directory_structure(&state_dir)?;

    Ok(InitResult { state_dir, created })
}

fn ensure_directory_structure(state_dir: &Path) -> Result<()> {
    for sub in ["executions", "logs"] {
        let dir = state_dir.join(sub);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {} directory: {}", sub, dir.display()))?;
    }

    let config_path = state_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        StoryforgeToml::default().save(&config_path)?;
    }

    let stories_path = state_dir.join("stories.json");
    if !stories_path.exists() {
        sample_stories().save(&stories_path)?;
    }

    Ok(())
}

/// Check if a project is already initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(STATE_DIR).exists()
}

/// Get the path to the state directory for a project.
pub fn get_state_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(STATE_DIR)
}

/// Two dependent stories over two components.
pub fn sample_stories() -> StoriesFile {
    let mut api = UserStory::new("US-1", "Fetch todos from the API", vec![]);
    api.acceptance_criteria = vec!["Todos are loaded from /api/todos".to_string()];
    api.assigned_components = vec!["todo-api".to_string()];

    let mut list = UserStory::new("US-2", "Render the todo list", vec!["US-1"]);
    list.acceptance_criteria = vec![
        "Each todo is shown with its title".to_string(),
        "Completed todos are struck through".to_string(),
    ];
    list.estimated_effort = 3;
    list.assigned_components = vec!["todo-list".to_string()];

    StoriesFile {
        project: Some("todo-app".to_string()),
        stories: vec![api, list],
        components: vec![
            ComponentSpec::new("todo-api", "Todo API client", "src/lib/api.ts")
                .with_exports(&["fetchTodos"]),
            ComponentSpec::new("todo-list", "Todo list", "src/components/TodoList.ts")
                .with_exports(&["renderTodos"])
                .with_dependencies(&["todo-api"]),
        ],
    }
}
