//! Integration tests for the storyforge CLI
//!
//! These tests drive the binary end to end on temporary projects.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a storyforge Command with a clean environment
fn storyforge() -> Command {
    let mut cmd = cargo_bin_cmd!("storyforge");
    cmd.env_remove("STORYFORGE_GENERATOR_CMD")
        .env_remove("STORYFORGE_BUILD_CMD")
        .env_remove("STORYFORGE_LOG");
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Helper to initialize a storyforge project in a temp directory
fn init_project(dir: &TempDir) {
    storyforge()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

fn run_template(dir: &TempDir) -> assert_cmd::assert::Assert {
    storyforge()
        .current_dir(dir.path())
        .args(["run", "--template-only", "--ui", "minimal"])
        .assert()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        storyforge().arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        storyforge().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        storyforge()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized storyforge project"));

        assert!(dir.path().join(".storyforge/storyforge.toml").exists());
        assert!(dir.path().join(".storyforge/stories.json").exists());
        assert!(dir.path().join(".storyforge/executions").is_dir());
        assert!(dir.path().join(".storyforge/logs").is_dir());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = create_temp_project();
        init_project(&dir);

        storyforge()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_status_uninitialized() {
        let dir = create_temp_project();

        storyforge()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Not initialized"));
    }

    #[test]
    fn test_run_requires_init() {
        let dir = create_temp_project();

        storyforge()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("storyforge init"));
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let dir = create_temp_project();
        init_project(&dir);

        storyforge()
            .current_dir(dir.path())
            .args(["run", "--policy", "sometimes"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown failure policy"));
    }
}

// =============================================================================
// Ordering Tests
// =============================================================================

mod ordering {
    use super::*;

    #[test]
    fn test_order_lists_dependencies_first() {
        let dir = create_temp_project();
        init_project(&dir);

        storyforge()
            .current_dir(dir.path())
            .arg("order")
            .assert()
            .success()
            .stdout(predicate::str::is_match(r"US-1[\s\S]*US-2").unwrap());
    }

    #[test]
    fn test_order_reports_cycles() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join("cycle.json"),
            r#"{"stories": [
                {"id": "A", "title": "A", "dependencies": ["B"]},
                {"id": "B", "title": "B", "dependencies": ["A"]}
            ]}"#,
        )
        .unwrap();

        storyforge()
            .current_dir(dir.path())
            .args(["order", "--stories", "cycle.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cyclic dependency"));
    }

    #[test]
    fn test_missing_stories_file() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::remove_file(dir.path().join(".storyforge/stories.json")).unwrap();

        storyforge()
            .current_dir(dir.path())
            .arg("order")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No stories file found"));
    }
}

// =============================================================================
// Execution Tests
// =============================================================================

mod execution {
    use super::*;

    #[test]
    fn test_run_sample_stories() {
        let dir = create_temp_project();
        init_project(&dir);

        run_template(&dir)
            .success()
            .stdout(predicate::str::contains("✓ US-1"))
            .stdout(predicate::str::contains("✓ US-2"))
            .stdout(predicate::str::contains("2 accepted, 0 failed, 0 pending"));

        let exec_dir = dir.path().join(".storyforge/executions/default");
        assert!(exec_dir.join("checkpoint.json").exists());
        assert!(exec_dir.join("report.json").exists());
        assert!(exec_dir.join("manifest.json").exists());
    }

    #[test]
    fn test_second_run_resumes_without_regenerating() {
        let dir = create_temp_project();
        init_project(&dir);
        run_template(&dir).success();

        let checkpoint = dir
            .path()
            .join(".storyforge/executions/default/checkpoint.json");
        let before = fs::read_to_string(&checkpoint).unwrap();

        run_template(&dir)
            .success()
            .stdout(predicate::str::contains("2 accepted"));

        let after: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&checkpoint).unwrap()).unwrap();
        let before: serde_json::Value = serde_json::from_str(&before).unwrap();
        assert_eq!(after["stories"], before["stories"]);
        assert_eq!(after["manifest"], before["manifest"]);
    }

    #[test]
    fn test_max_stories_suspends() {
        let dir = create_temp_project();
        init_project(&dir);

        storyforge()
            .current_dir(dir.path())
            .args([
                "run",
                "--template-only",
                "--ui",
                "minimal",
                "--max-stories",
                "1",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("suspended"))
            .stdout(predicate::str::contains("1 accepted, 0 failed, 1 pending"));
    }

    #[test]
    fn test_failed_story_exits_non_zero() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join("bad.json"),
            r#"{
                "stories": [
                    {"id": "S1", "title": "Widget", "assigned_components": ["widget"]}
                ],
                "components": [
                    {"id": "widget", "name": "Widget", "file_path": "src/widget.ts",
                     "exports": ["not-an-identifier"]}
                ]
            }"#,
        )
        .unwrap();

        storyforge()
            .current_dir(dir.path())
            .args(["run", "--template-only", "--ui", "minimal", "--stories", "bad.json"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("✗ S1"))
            .stderr(predicate::str::contains("1 of 1 stories failed"));
    }

    #[test]
    fn test_json_ui_emits_events() {
        let dir = create_temp_project();
        init_project(&dir);

        storyforge()
            .current_dir(dir.path())
            .args(["run", "--template-only", "--ui", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"type\":\"execution_started\""))
            .stdout(predicate::str::contains("\"type\":\"story_finished\""));
    }

    #[test]
    fn test_invalid_execution_id() {
        let dir = create_temp_project();
        init_project(&dir);

        storyforge()
            .current_dir(dir.path())
            .args(["run", "--template-only", "--execution-id", "../escape"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Inspection Tests
// =============================================================================

mod inspection {
    use super::*;

    #[test]
    fn test_status_after_run() {
        let dir = create_temp_project();
        init_project(&dir);
        run_template(&dir).success();

        storyforge()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Execution default (completed)"))
            .stdout(predicate::str::contains("Accepted stories: 2"));
    }

    #[test]
    fn test_report_json() {
        let dir = create_temp_project();
        init_project(&dir);
        run_template(&dir).success();

        let output = storyforge()
            .current_dir(dir.path())
            .args(["report", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["execution_id"], "default");
        assert_eq!(report["outcome"], "completed");
        assert_eq!(report["stories"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_report_without_run() {
        let dir = create_temp_project();
        init_project(&dir);

        storyforge()
            .current_dir(dir.path())
            .arg("report")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No report for execution"));
    }

    #[test]
    fn test_export_writes_accepted_files() {
        let dir = create_temp_project();
        init_project(&dir);
        run_template(&dir).success();

        storyforge()
            .current_dir(dir.path())
            .args(["export", "out"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Exported 2 files"));

        let api = fs::read_to_string(dir.path().join("out/src/lib/api.ts")).unwrap();
        assert!(api.contains("fetchTodos"));
        let list = fs::read_to_string(dir.path().join("out/src/components/TodoList.ts")).unwrap();
        assert!(list.contains("../lib/api"));
    }

    #[test]
    fn test_reset_requires_force() {
        let dir = create_temp_project();
        init_project(&dir);
        run_template(&dir).success();

        storyforge()
            .current_dir(dir.path())
            .arg("reset")
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));
        assert!(dir.path().join(".storyforge/executions/default").exists());

        storyforge()
            .current_dir(dir.path())
            .args(["reset", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed execution default"));
        assert!(!dir.path().join(".storyforge/executions/default").exists());
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_without_file() {
        let dir = create_temp_project();

        storyforge()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using default configuration"))
            .stdout(predicate::str::contains("[fix_loop]"));
    }

    #[test]
    fn test_config_show_applies_env_override() {
        let dir = create_temp_project();
        init_project(&dir);

        storyforge()
            .current_dir(dir.path())
            .env("STORYFORGE_BUILD_CMD", "make check")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("make check"));
    }

    #[test]
    fn test_config_init_when_present() {
        let dir = create_temp_project();
        init_project(&dir);

        storyforge()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join(".storyforge/storyforge.toml"),
            "[fix_loop]\ngenerator_timeout_secs = 600\nstory_budget_secs = 60\n",
        )
        .unwrap();

        storyforge()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"))
            .stdout(predicate::str::contains("shorter than"));
    }

    #[test]
    fn test_config_validate_default_is_valid() {
        let dir = create_temp_project();
        init_project(&dir);

        storyforge()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }
}
