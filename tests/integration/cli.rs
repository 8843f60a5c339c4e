//! Exit codes and output of the `git-uptodate` binary.

use std::process::{Command, Output};

use crate::fixtures::{write_jar, TestRepo, PLAIN_MANIFEST};

const TASKS: &str = r#"
[evaluation]
consider_manifest = true

[[task]]
name = "bundle"
inputs = ["src"]
artifact = "build/libs/app.jar"
"#;

fn run(repo: &TestRepo, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_git-uptodate"))
        .args(args)
        .arg("--root")
        .arg(&repo.path)
        .env("GIT_UPTODATE_LOG", repo.temp_dir.path().join("uptodate.log"))
        .env_remove("GIT_UPTODATE_DEBUG")
        .output()
        .expect("Failed to run git-uptodate")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn project() -> TestRepo {
    let repo = TestRepo::new();
    repo.write(".git-uptodate.toml", TASKS);
    repo.write("src/App.java", "class App {}\n");
    repo.commit_all("Add sources");
    repo
}

#[test]
fn test_check_stamp_cycle() {
    let repo = project();

    let missing = run(&repo, &["check", "bundle"]);
    assert_eq!(missing.status.code(), Some(1));
    assert!(stdout(&missing).contains("does not exist"));

    write_jar(&repo.join("build/libs/app.jar"), Some(PLAIN_MANIFEST));
    let stamped = run(&repo, &["stamp", "build/libs/app.jar", "--task", "bundle", "--per-input"]);
    assert_eq!(stamped.status.code(), Some(0), "{}", String::from_utf8_lossy(&stamped.stderr));
    assert!(stdout(&stamped).contains(&repo.head()));

    let fresh = run(&repo, &["check", "bundle", "--json"]);
    assert_eq!(fresh.status.code(), Some(0));
    let report: serde_json::Value = serde_json::from_slice(&fresh.stdout).unwrap();
    assert_eq!(report["task"], "bundle");
    assert_eq!(report["fresh"], true);
    assert_eq!(report["reason"], "fresh");

    repo.create_and_commit("src/App.java", "class App { }\n", "Change App");
    let stale = run(&repo, &["check", "bundle"]);
    assert_eq!(stale.status.code(), Some(1));
    assert!(stdout(&stale).starts_with("bundle: stale"));

    let shown = run(&repo, &["show", "build/libs/app.jar"]);
    assert_eq!(shown.status.code(), Some(0));
    assert!(stdout(&shown).contains("Commit-Hash"));
    assert!(stdout(&shown).contains("src"));
}

#[test]
fn test_unknown_task_exits_with_error() {
    let repo = project();
    let output = run(&repo, &["check", "deploy"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown task 'deploy'"));
}

#[test]
fn test_tasks_lists_configuration() {
    let repo = project();
    let output = run(&repo, &["tasks"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output).trim(), "bundle  [src] -> build/libs/app.jar");
}

#[test]
fn test_absolute_input_paths_are_compared() {
    let repo = TestRepo::new();
    let src = repo.join("src");
    repo.write(
        ".git-uptodate.toml",
        &format!(
            "[evaluation]\nconsider_manifest = true\n\n\
             [[task]]\nname = \"bundle\"\ninputs = [{:?}]\nartifact = \"build/app.jar\"\n",
            src.display().to_string()
        ),
    );
    repo.write("src/App.java", "class App {}\n");
    repo.commit_all("Add sources");

    write_jar(&repo.join("build/app.jar"), Some(PLAIN_MANIFEST));
    let src_arg = src.display().to_string();
    let stamped = run(&repo, &["stamp", "build/app.jar", "--input", &src_arg, "--per-input"]);
    assert_eq!(stamped.status.code(), Some(0), "{}", String::from_utf8_lossy(&stamped.stderr));
    assert!(stdout(&stamped).contains("  src"));
    assert_eq!(run(&repo, &["check", "bundle"]).status.code(), Some(0));

    repo.create_and_commit("src/App.java", "class App { }\n", "Change App");
    let stale = run(&repo, &["check", "bundle"]);
    assert_eq!(stale.status.code(), Some(1));
    assert!(stdout(&stale).contains("src"));
}

#[test]
fn test_input_outside_root_is_rejected() {
    let repo = project();
    write_jar(&repo.join("build/libs/app.jar"), Some(PLAIN_MANIFEST));
    let outside = tempfile::TempDir::new().unwrap();
    let outside = outside.path().display().to_string();
    let output = run(&repo, &["stamp", "build/libs/app.jar", "--input", &outside]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("outside"));
}
