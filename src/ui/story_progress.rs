//! Terminal progress for story execution.
//!
//! Renders `EngineEvent`s in one of three modes:
//! - `full`: a header bar with a spinner per running story
//! - `minimal`: one line per finished story
//! - `json`: one JSON event per line

use crate::engine::EngineEvent;
use crate::fixloop::{AttemptOutcome, LoopState};
use crate::report::RunOutcome;
use crate::story::StoryStatus;
use crate::ui::icons::{CHECK, CROSS, PAUSE, RETRY, RUNNING, SKIP, SPARKLE, STOP};
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

/// Output mode for the engine UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// Progress bars and colors
    #[default]
    Full,
    /// Single-line status updates
    Minimal,
    /// JSON-formatted events
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

/// Progress display for one execution.
///
/// Events arrive from a single consumer task, so the spinner lock is never
/// contended.
pub struct EngineUI {
    mode: UiMode,
    multi: MultiProgress,
    header_bar: ProgressBar,
    story_bar: Mutex<Option<(String, ProgressBar)>>,
    verbose: bool,
    term: Term,
}

impl EngineUI {
    pub fn new(mode: UiMode, verbose: bool) -> Self {
        let multi = MultiProgress::new();
        let header_bar = if mode == UiMode::Full {
            let bar = multi.add(ProgressBar::new(0));
            if let Ok(header_style) = ProgressStyle::default_bar()
                .template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            {
                bar.set_style(header_style.progress_chars("█▓▒░"));
            }
            bar.set_prefix("Stories");
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            mode,
            multi,
            header_bar,
            story_bar: Mutex::new(None),
            verbose,
            term: Term::stdout(),
        }
    }

    pub fn handle_event(&self, event: &EngineEvent) {
        match self.mode {
            UiMode::Json => self.handle_json(event),
            UiMode::Minimal => self.handle_minimal(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_json(&self, event: &EngineEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    fn handle_minimal(&self, event: &EngineEvent) {
        match event {
            EngineEvent::StoryFinished {
                story_id,
                status,
                attempts,
                reason,
                ..
            } => {
                let line = match (status, reason) {
                    (StoryStatus::Accepted, _) => {
                        format!("✓ {} ({} attempts)", story_id, attempts)
                    }
                    (_, Some(reason)) => format!("✗ {} ({})", story_id, reason),
                    _ => format!("✗ {}", story_id),
                };
                let _ = writeln!(&self.term, "{}", line);
            }
            EngineEvent::ExecutionFinished {
                outcome,
                accepted,
                failed,
                ..
            } => {
                let _ = writeln!(
                    &self.term,
                    "Done ({}): {} accepted, {} failed",
                    outcome, accepted, failed
                );
            }
            _ => {}
        }
    }

    fn handle_full(&self, event: &EngineEvent) {
        match event {
            EngineEvent::ExecutionStarted {
                execution_id,
                total,
                accepted,
                rolled_back,
            } => {
                self.header_bar.set_length(*total as u64);
                self.header_bar.set_position(*accepted as u64);
                self.header_bar.set_message(execution_id.clone());
                for story_id in rolled_back {
                    self.println(format!(
                        "  {} {} rolled back: accepted files were missing or corrupt",
                        RETRY,
                        style(story_id).yellow()
                    ));
                }
            }
            EngineEvent::StorySkipped { story_id } => {
                if self.verbose {
                    self.println(format!(
                        "  {} {} already accepted",
                        SKIP,
                        style(story_id).dim()
                    ));
                }
            }
            EngineEvent::StoryStarted {
                story_id,
                title,
                position,
                total,
                strategy,
                reason,
            } => {
                self.on_story_started(story_id, title, *position, *total);
                if self.verbose {
                    self.println(format!(
                        "    {} strategy: {}",
                        style("→").dim(),
                        style(format!("{} ({})", strategy, reason)).dim()
                    ));
                }
            }
            EngineEvent::StateChanged {
                story_id,
                attempt,
                state,
            } => self.on_state_changed(story_id, *attempt, *state),
            EngineEvent::AttemptStarted { .. } => {}
            EngineEvent::AttemptFinished {
                story_id,
                attempt,
                outcome,
                blocking,
            } => self.on_attempt_finished(story_id, *attempt, *outcome, *blocking),
            EngineEvent::StoryFinished {
                story_id,
                status,
                attempts,
                files,
                reason,
            } => self.on_story_finished(story_id, *status, *attempts, *files, reason.as_deref()),
            EngineEvent::ExecutionFinished {
                outcome,
                accepted,
                failed,
                ..
            } => self.on_execution_finished(*outcome, *accepted, *failed),
        }
    }

    fn println(&self, line: String) {
        self.multi.println(line).ok();
    }

    fn on_story_started(&self, story_id: &str, title: &str, position: usize, total: usize) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        if let Ok(spinner) = ProgressStyle::default_spinner().template("  {spinner:.cyan} {prefix:.bold} {msg}") {
            bar.set_style(spinner);
        }
        bar.set_prefix(format!("[{}/{}] {}", position, total, story_id));
        bar.set_message(format!("{} {}", RUNNING, title));
        bar.enable_steady_tick(Duration::from_millis(100));

        if let Ok(mut slot) = self.story_bar.lock() {
            if let Some((_, previous)) = slot.take() {
                previous.finish_and_clear();
            }
            *slot = Some((story_id.to_string(), bar));
        }
    }

    fn on_state_changed(&self, story_id: &str, attempt: u32, state: LoopState) {
        if let Ok(slot) = self.story_bar.lock()
            && let Some((id, bar)) = slot.as_ref()
            && id == story_id
        {
            bar.set_message(format!("attempt {}: {}", style(attempt).cyan(), state));
        }
    }

    fn on_attempt_finished(&self, story_id: &str, attempt: u32, outcome: AttemptOutcome, blocking: usize) {
        if outcome == AttemptOutcome::Accepted {
            return;
        }
        let detail = if blocking > 0 {
            format!("{} ({} blocking findings)", outcome, blocking)
        } else {
            outcome.to_string()
        };
        self.println(format!(
            "    {} {} attempt {}: {}",
            RETRY,
            style(story_id).yellow(),
            attempt,
            style(detail).dim()
        ));
    }

    fn on_story_finished(
        &self,
        story_id: &str,
        status: StoryStatus,
        attempts: u32,
        files: usize,
        reason: Option<&str>,
    ) {
        if let Ok(mut slot) = self.story_bar.lock()
            && let Some((_, bar)) = slot.take()
        {
            bar.finish_and_clear();
        }
        self.header_bar.inc(1);

        if status == StoryStatus::Accepted {
            self.println(format!(
                "  {} {} {} ({} files, {} attempts)",
                SPARKLE,
                style(story_id).green().bold(),
                style("accepted").green(),
                files,
                attempts
            ));
        } else {
            self.println(format!(
                "  {} {} {}: {}",
                CROSS,
                style(story_id).red().bold(),
                style("failed").red(),
                reason.unwrap_or("unknown reason")
            ));
        }
    }

    fn on_execution_finished(&self, outcome: RunOutcome, accepted: usize, failed: usize) {
        let icon = match outcome {
            RunOutcome::Completed if failed == 0 => CHECK,
            RunOutcome::Completed => CROSS,
            RunOutcome::Suspended => PAUSE,
            RunOutcome::Halted | RunOutcome::Cancelled => STOP,
        };
        self.header_bar
            .finish_with_message(format!("{} {}", icon, outcome));
        self.println(format!(
            "{} accepted, {} failed",
            style(accepted).green().bold(),
            style(failed).red().bold()
        ));
    }
}

/// Format a duration for display.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ui_mode_parse() {
        assert_eq!(UiMode::parse("json"), UiMode::Json);
        assert_eq!(UiMode::parse("MINIMAL"), UiMode::Minimal);
        assert_eq!(UiMode::parse("full"), UiMode::Full);
        assert_eq!(UiMode::parse("anything_else"), UiMode::Full);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0ms");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_full_mode_handles_a_whole_run() {
        let ui = EngineUI::new(UiMode::Full, true);
        let events = vec![
            EngineEvent::ExecutionStarted {
                execution_id: "exec".into(),
                total: 1,
                accepted: 0,
                rolled_back: vec![],
            },
            EngineEvent::StateChanged {
                story_id: "S1".into(),
                attempt: 1,
                state: LoopState::Validate,
            },
            EngineEvent::StoryFinished {
                story_id: "S1".into(),
                status: StoryStatus::Failed,
                attempts: 3,
                files: 0,
                reason: Some("fix attempts exhausted after 3 attempts".into()),
            },
            EngineEvent::ExecutionFinished {
                execution_id: "exec".into(),
                outcome: RunOutcome::Completed,
                accepted: 0,
                failed: 1,
            },
        ];
        for event in &events {
            ui.handle_event(event);
        }
        assert_eq!(ui.header_bar.position(), 1);
        assert!(ui.story_bar.lock().unwrap().is_none());
    }
}
