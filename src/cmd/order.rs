//! Execution order preview: `storyforge order`.

use anyhow::Result;
use console::style;
use std::path::{Path, PathBuf};

use super::super::Cli;

pub fn cmd_order(cli: &Cli, project_dir: PathBuf, stories: Option<&Path>) -> Result<()> {
    use storyforge::config::Config;
    use storyforge::dag::resolve_order;
    use storyforge::story::{ComponentSpec, StoriesFile, index_components};

    let config = Config::new(project_dir, cli.verbose)?;
    let stories_file = config.stories_file(stories)?;
    let file = StoriesFile::load(&stories_file)?;
    let ordered = resolve_order(&file.stories)?;
    let components = index_components(&file.components);
    let policy = &config.settings().strategy;

    println!();
    println!("Stories loaded from: {}", stories_file.display());
    println!();
    println!(
        "{:<4} {:<12} {:<11} {:<30} Depends on",
        "#", "Story", "Strategy", "Title"
    );
    println!(
        "{:<4} {:<12} {:<11} {:<30} ----------",
        "--", "----------", "---------", "-----"
    );

    for (position, story) in ordered.iter().enumerate() {
        let own: Vec<ComponentSpec> = story
            .assigned_components
            .iter()
            .filter_map(|id| components.get(id).cloned())
            .collect();
        let decision = policy.select(story, &own);
        let depends = if story.dependencies.is_empty() {
            "-".to_string()
        } else {
            story.dependencies.join(", ")
        };
        println!(
            "{:<4} {:<12} {:<11} {:<30} {}",
            position + 1,
            story.id,
            decision.strategy.to_string(),
            truncate(&story.title, 30),
            depends
        );
        if cli.verbose {
            println!(
                "     {}",
                style(decision.reason.description()).dim()
            );
        }
    }
    println!();
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_titles() {
        assert_eq!(truncate("Login", 30), "Login");
    }

    #[test]
    fn truncate_marks_cut_titles() {
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
    }
}
