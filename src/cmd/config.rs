//! Configuration view and validation: `storyforge config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use storyforge::init::get_state_dir;
    use storyforge::storyforge_config::{BUILD_CMD_ENV, CONFIG_FILE, GENERATOR_CMD_ENV, StoryforgeToml};

    let state_dir = get_state_dir(project_dir);
    let config_path = state_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Storyforge Configuration");
            println!("========================");
            println!();

            let mut toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                StoryforgeToml::load(&config_path)?
            } else {
                println!("No storyforge.toml found at {}", config_path.display());
                println!("Using default configuration.");
                StoryforgeToml::default()
            };
            println!();

            toml.apply_env();
            for (name, overridden) in [
                (GENERATOR_CMD_ENV, std::env::var(GENERATOR_CMD_ENV).is_ok()),
                (BUILD_CMD_ENV, std::env::var(BUILD_CMD_ENV).is_ok()),
            ] {
                if overridden {
                    println!("# {} overrides the file value", name);
                }
            }

            println!("Effective values (with env overrides):");
            println!();
            print!("{}", toml::to_string_pretty(&toml)?);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No storyforge.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = StoryforgeToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("storyforge.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&state_dir)?;
            StoryforgeToml::default().save(&config_path)?;

            println!("Created storyforge.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [strategy] thresholds, keywords and per-story overrides");
            println!("  - [fix_loop] attempts and time budgets");
            println!("  - [build] command and timeout");
            println!("  - [generator] command for generative stories");
            println!();
        }
    }

    Ok(())
}
