//! Project initialization command.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use storyforge::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);
    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized storyforge project at {}",
            result.state_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .storyforge/");
        println!("  ├── storyforge.toml  # Configuration (use `storyforge config show`)");
        println!("  ├── stories.json     # Sample stories and components");
        println!("  ├── executions/      # Checkpoints, blobs and reports per execution");
        println!("  └── logs/            # Log files");
        println!();
        println!("Next steps:");
        println!("  1. Replace .storyforge/stories.json with your backlog");
        println!("  2. Run `storyforge order` to check the execution order");
        println!("  3. Run `storyforge run` to execute the stories");
    } else if was_initialized {
        println!(
            "Storyforge project already initialized at {}",
            result.state_dir.display()
        );
        println!("Directory structure verified.");
    }

    Ok(())
}
