//! Freshness verdicts against real repositories and archives.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use git_uptodate::error::Unreadable;
use git_uptodate::vcs::{GitCli, PathRef};
use git_uptodate::{
    evaluate, evaluate_async, stamp, ArchiveOpener, Error, EvaluationOptions, Evaluator, Reason,
    ReferenceSource, Result, TaskConfiguration, UntrackedArtifactPolicy, Verdict,
};
use tempfile::TempDir;

use crate::fixtures::{write_jar, TestRepo, PLAIN_MANIFEST};

const ARTIFACT: &str = "build/libs/app.jar";

fn bundle() -> TaskConfiguration {
    TaskConfiguration::input_artifact(
        "processResources",
        ["src/main/resources", "src/main/java"],
        "jar",
    )
}

fn manifest_options() -> EvaluationOptions {
    EvaluationOptions {
        consider_manifest: true,
        ..EvaluationOptions::default()
    }
}

fn project() -> TestRepo {
    let repo = TestRepo::new();
    repo.write("src/main/java/App.java", "class App {}\n");
    repo.write("src/main/resources/application.properties", "greeting=hello\n");
    repo.commit_all("Add sources");
    repo
}

/// Build and stamp the artifact at the current HEAD.
fn build(repo: &TestRepo, per_input: bool) {
    let location = repo.join(ARTIFACT);
    write_jar(&location, Some(PLAIN_MANIFEST));
    let inputs = vec![
        PathRef::new("src/main/resources"),
        PathRef::new("src/main/java"),
    ];
    stamp(&repo.cli(), &location, &inputs, per_input).unwrap();
}

fn check(repo: &TestRepo, options: &EvaluationOptions) -> Result<Verdict> {
    evaluate(&repo.path, &bundle(), Some(Path::new(ARTIFACT)), options)
}

#[test]
fn test_stamped_artifact_is_fresh_until_an_input_changes() {
    let repo = project();
    build(&repo, false);

    let verdict = check(&repo, &manifest_options()).unwrap();
    assert!(verdict.fresh, "{}", verdict);
    assert!(matches!(
        verdict.reason,
        Reason::Fresh {
            source: ReferenceSource::Manifest,
            ..
        }
    ));

    // Unrelated commits keep it fresh.
    repo.create_and_commit("docs/notes.md", "notes\n", "Docs");
    assert!(check(&repo, &manifest_options()).unwrap().fresh);

    let changed = repo.create_and_commit(
        "src/main/java/App.java",
        "class App { int x; }\n",
        "Change App",
    );
    let verdict = check(&repo, &manifest_options()).unwrap();
    assert!(!verdict.fresh);
    match verdict.reason {
        Reason::InputNewer {
            input,
            input_revision,
            ..
        } => {
            assert_eq!(input.as_str(), "src/main/java");
            assert_eq!(input_revision.as_str(), changed);
        }
        other => panic!("unexpected reason {:?}", other),
    }

    build(&repo, false);
    assert!(check(&repo, &manifest_options()).unwrap().fresh);
}

#[test]
fn test_dirty_input_is_stale() {
    let repo = project();
    build(&repo, false);
    repo.write("src/main/resources/application.properties", "greeting=bye\n");

    let verdict = check(&repo, &manifest_options()).unwrap();
    assert_eq!(
        verdict.reason,
        Reason::InputDirty {
            input: PathRef::new("src/main/resources")
        }
    );
}

#[test]
fn test_switching_to_a_sibling_branch_makes_artifact_stale() {
    let repo = project();
    let base = repo.head();
    repo.create_and_commit("src/main/java/Other.java", "class Other {}\n", "Other");
    build(&repo, false);
    assert!(check(&repo, &manifest_options()).unwrap().fresh);

    repo.checkout_new_branch("experiment", &base);
    repo.create_and_commit(
        "src/main/resources/application.properties",
        "greeting=hi\n",
        "Experiment",
    );
    // The ignored artifact survives the checkout.
    assert!(repo.join(ARTIFACT).exists());
    let verdict = check(&repo, &manifest_options()).unwrap();
    assert!(!verdict.fresh, "{}", verdict);
}

#[test]
fn test_committed_artifact_uses_its_own_history() {
    let repo = project();
    repo.write(".gitignore", "");
    write_jar(&repo.join("dist/app.jar"), Some(PLAIN_MANIFEST));
    repo.commit_all("Publish artifact");

    let config = bundle();
    let artifact = Some(Path::new("dist/app.jar"));
    let verdict = evaluate(&repo.path, &config, artifact, &manifest_options()).unwrap();
    assert!(verdict.fresh, "{}", verdict);
    assert!(matches!(
        verdict.reason,
        Reason::Fresh {
            source: ReferenceSource::TrackedArtifact,
            ..
        }
    ));

    repo.create_and_commit("src/main/java/App.java", "class App { }\n", "Touch App");
    let verdict = evaluate(&repo.path, &config, artifact, &manifest_options()).unwrap();
    assert!(!verdict.fresh);

    // Rebuilding without committing does not count.
    write_jar(&repo.join("dist/app.jar"), None);
    let verdict = evaluate(&repo.path, &config, artifact, &manifest_options()).unwrap();
    assert!(!verdict.fresh);
}

#[test]
fn test_archive_without_manifest_is_an_error() {
    let repo = project();
    write_jar(&repo.join(ARTIFACT), None);
    let err = check(&repo, &manifest_options()).unwrap_err();
    assert!(matches!(
        err,
        Error::ArtifactUnreadable {
            cause: Unreadable::NoManifest,
            ..
        }
    ));
}

#[test]
fn test_unstamped_manifest_is_stale() {
    let repo = project();
    write_jar(&repo.join(ARTIFACT), Some(PLAIN_MANIFEST));
    let verdict = check(&repo, &manifest_options()).unwrap();
    assert!(matches!(verdict.reason, Reason::BuildRevisionMissing { .. }));
}

#[test]
fn test_missing_artifact_is_stale() {
    let repo = project();
    let verdict = check(&repo, &manifest_options()).unwrap();
    assert!(!verdict.fresh);
    assert!(matches!(verdict.reason, Reason::ArtifactMissing { .. }));
}

#[test]
fn test_untracked_artifact_without_manifest_evaluation() {
    let repo = project();
    write_jar(&repo.join(ARTIFACT), None);

    let verdict = check(&repo, &EvaluationOptions::default()).unwrap();
    assert!(matches!(verdict.reason, Reason::NoProvenance { .. }));

    let permissive = EvaluationOptions {
        untracked_artifact: UntrackedArtifactPolicy::AssumeFresh,
        ..EvaluationOptions::default()
    };
    assert!(check(&repo, &permissive).unwrap().fresh);
}

#[test]
fn test_per_input_revisions_and_parallel_lookup() {
    let repo = project();
    build(&repo, true);
    repo.create_and_commit("README.md", "# Changed\n", "Readme");

    let options = EvaluationOptions {
        consider_per_input_hashes: true,
        parallel_inputs: true,
        ..manifest_options()
    };
    let verdict = check(&repo, &options).unwrap();
    assert!(verdict.fresh, "{}", verdict);
    assert!(matches!(
        verdict.reason,
        Reason::Fresh {
            source: ReferenceSource::Manifest,
            ..
        }
    ));

    repo.create_and_commit(
        "src/main/resources/application.properties",
        "greeting=hey\n",
        "Change resources",
    );
    let verdict = check(&repo, &options).unwrap();
    assert!(matches!(
        verdict.reason,
        Reason::InputNewer {
            source: ReferenceSource::StoredInputRevision,
            ..
        }
    ));
}

#[test]
fn test_input_output_task_with_committed_outputs() {
    let repo = project();
    repo.write("generated/App.txt", "generated\n");
    repo.commit_all("Generate");
    let config = TaskConfiguration::input_output("generate", ["src/main/java"], ["generated"]);

    let verdict = evaluate(&repo.path, &config, None, &EvaluationOptions::default()).unwrap();
    assert!(verdict.fresh, "{}", verdict);

    repo.create_and_commit("src/main/java/App.java", "class App {{}}\n", "Change");
    let verdict = evaluate(&repo.path, &config, None, &EvaluationOptions::default()).unwrap();
    assert!(matches!(verdict.reason, Reason::InputNewerThanOutput { .. }));
}

#[test]
fn test_input_output_task_with_untracked_input_is_stale() {
    let repo = project();
    repo.write("generated/App.txt", "generated\n");
    repo.commit_all("Generate");
    repo.write("codegen/Model.java", "class Model {}\n");
    let config = TaskConfiguration::input_output(
        "generate",
        ["src/main/java", "codegen"],
        ["generated"],
    );

    let verdict = evaluate(&repo.path, &config, None, &EvaluationOptions::default()).unwrap();
    assert!(!verdict.fresh);
    assert_eq!(
        verdict.reason,
        Reason::InputUntracked {
            input: PathRef::new("codegen")
        }
    );
}

#[test]
fn test_evaluate_outside_a_repository() {
    let dir = TempDir::new().unwrap();
    let err = evaluate(
        dir.path(),
        &bundle(),
        Some(Path::new(ARTIFACT)),
        &EvaluationOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration(_)));
}

#[test]
fn test_libgit_backend_agrees() {
    let repo = project();
    build(&repo, false);
    repo.create_and_commit("src/main/java/App.java", "class App { int y; }\n", "Change");

    let cli = Evaluator::new(&repo.path, repo.cli(), ArchiveOpener);
    let libgit = Evaluator::new(&repo.path, repo.libgit(), ArchiveOpener);
    let artifact = Some(Path::new(ARTIFACT));
    let a = cli.evaluate(&bundle(), artifact, &manifest_options()).unwrap();
    let b = libgit.evaluate(&bundle(), artifact, &manifest_options()).unwrap();
    assert_eq!(a, b);
    assert!(!a.fresh);
}

#[tokio::test]
async fn test_evaluate_async_with_git_cli() {
    let repo = project();
    build(&repo, false);
    let evaluator = Arc::new(Evaluator::new(
        &repo.path,
        GitCli::new(&repo.path).unwrap(),
        ArchiveOpener,
    ));
    let verdict = evaluate_async(
        evaluator,
        bundle(),
        Some(repo.join(ARTIFACT)),
        manifest_options(),
        Duration::from_secs(30),
    )
    .await
    .unwrap();
    assert!(verdict.fresh, "{}", verdict);
}
