//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Creating temporary git repositories
//! - Writing archives with or without a manifest
//! - Reading manifests back out of archives

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use git_uptodate::manifest::{Manifest, MANIFEST_PATH};
use git_uptodate::vcs::{GitCli, LibGit, Vcs};

/// A test repository with a temporary directory and initialized git.
pub struct TestRepo {
    /// The temporary directory containing the repo.
    pub temp_dir: TempDir,
    /// Canonical path to the repository root.
    pub path: PathBuf,
}

impl TestRepo {
    /// Create a new repository on branch `main` with an initial commit.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir
            .path()
            .canonicalize()
            .expect("Failed to canonicalize temp directory");
        let repo = Self { temp_dir, path };

        repo.git(&["init", "-q"]);
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        repo.git(&["config", "user.email", "test@test.com"]);
        repo.git(&["config", "user.name", "Test User"]);
        repo.git(&["config", "commit.gpgsign", "false"]);

        repo.write("README.md", "# Test Repository\n");
        repo.write(".gitignore", "build/\n");
        repo.commit_all("Initial commit");
        repo
    }

    /// Run git in the repository, panicking on failure. Returns trimmed stdout.
    pub fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .output()
            .expect("Failed to run git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Write a file (creating parent directories) without staging it.
    pub fn write(&self, filename: &str, content: &str) {
        let file_path = self.path.join(filename);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create directories");
        }
        std::fs::write(&file_path, content).expect("Failed to write file");
    }

    /// Stage everything and commit. Returns the new HEAD.
    pub fn commit_all(&self, message: &str) -> String {
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", message]);
        self.head()
    }

    /// Create a file and commit it.
    pub fn create_and_commit(&self, filename: &str, content: &str, message: &str) -> String {
        self.write(filename, content);
        self.git(&["add", filename]);
        self.git(&["commit", "-q", "-m", message]);
        self.head()
    }

    /// Stage everything and commit with fixed author and committer dates.
    pub fn commit_all_at(&self, message: &str, date: &str) -> String {
        self.git(&["add", "-A"]);
        let output = Command::new("git")
            .args(["commit", "-q", "-m", message])
            .env("GIT_AUTHOR_DATE", date)
            .env("GIT_COMMITTER_DATE", date)
            .current_dir(&self.path)
            .output()
            .expect("Failed to run git commit");
        assert!(
            output.status.success(),
            "git commit failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        self.head()
    }

    pub fn head(&self) -> String {
        self.git(&["rev-parse", "HEAD"])
    }

    pub fn checkout(&self, target: &str) {
        self.git(&["checkout", "-q", target]);
    }

    pub fn checkout_new_branch(&self, name: &str, start: &str) {
        self.git(&["checkout", "-q", "-b", name, start]);
    }

    pub fn join(&self, rel: &str) -> PathBuf {
        self.path.join(rel)
    }

    pub fn cli(&self) -> GitCli {
        GitCli::new(&self.path).expect("git binary on PATH")
    }

    pub fn libgit(&self) -> LibGit {
        LibGit::new(&self.path)
    }

    /// Both production backends, labelled for assertion messages.
    pub fn backends(&self) -> Vec<(&'static str, Box<dyn Vcs>)> {
        vec![("cli", Box::new(self.cli())), ("libgit2", Box::new(self.libgit()))]
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Write a small archive with one class file and, optionally, a manifest.
pub fn write_jar(path: &Path, manifest: Option<&str>) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create archive directory");
    }
    let mut writer = ZipWriter::new(File::create(path).expect("Failed to create archive"));
    let options = SimpleFileOptions::default();
    if let Some(manifest) = manifest {
        writer.add_directory("META-INF/", options).unwrap();
        writer.start_file(MANIFEST_PATH, options).unwrap();
        writer.write_all(manifest.as_bytes()).unwrap();
    }
    writer.start_file("com/example/App.class", options).unwrap();
    writer.write_all(b"\xca\xfe\xba\xbe").unwrap();
    writer.start_file("application.properties", options).unwrap();
    writer.write_all(b"greeting=hello\n").unwrap();
    writer.finish().unwrap();
}

/// A minimal manifest as a build tool would write it.
pub const PLAIN_MANIFEST: &str = "Manifest-Version: 1.0\r\nCreated-By: test\r\n\r\n";

pub fn read_manifest(path: &Path) -> Manifest {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut bytes = Vec::new();
    archive
        .by_name(MANIFEST_PATH)
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    Manifest::parse(&bytes).unwrap()
}

pub fn read_entry(path: &Path, name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut bytes = Vec::new();
    archive.by_name(name).unwrap().read_to_end(&mut bytes).unwrap();
    bytes
}
