use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{PathRef, Revision, Vcs};
use crate::error::VcsFailure;
use crate::{ulog_debug, ulog_trace, ulog_warn, Error, Result};

/// Ceiling for a single `git` invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_START: Duration = Duration::from_millis(2);
const POLL_MAX: Duration = Duration::from_millis(50);

/// [`Vcs`] backed by the `git` executable, one process per query.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    binary: PathBuf,
    timeout: Duration,
}

struct Output {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl GitCli {
    pub fn new(root: &Path) -> Result<Self> {
        Self::with_binary(root, "git")
    }

    /// Use a specific binary, looked up on `PATH` unless it is a path.
    pub fn with_binary(root: &Path, binary: impl AsRef<OsStr>) -> Result<Self> {
        let binary = binary.as_ref();
        let resolved = which::which(binary).map_err(|e| {
            Error::ToolNotFound(format!("{}: {}", Path::new(binary).display(), e))
        })?;
        ulog_debug!(
            "GitCli::new root={} binary={}",
            root.display(),
            resolved.display()
        );
        Ok(Self {
            root: root.to_path_buf(),
            binary: resolved,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn describe(&self, args: &[&str]) -> String {
        let name = self
            .binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "git".to_string());
        format!("{} {}", name, args.join(" "))
    }

    /// Spawn, wait at most `self.timeout`, kill on expiry. Output of a killed
    /// process is never returned.
    fn run(&self, args: &[&str]) -> Result<Output> {
        let command = self.describe(args);
        ulog_debug!("exec: {} (cwd={})", command, self.root.display());

        let mut child = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.root)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_OPTIONAL_LOCKS", "0")
            // Paths are literal: no globs, no `:(magic)`.
            .env("GIT_LITERAL_PATHSPECS", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::vcs(&command, VcsFailure::Spawn(e)))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match wait_deadline(&mut child, self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                ulog_warn!("{} timed out after {:?}, killing", command, self.timeout);
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::vcs(&command, VcsFailure::Timeout(self.timeout)));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::vcs(&command, VcsFailure::Spawn(e)));
            }
        };

        let output = Output {
            code: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        };
        ulog_trace!(
            "{} -> {:?} stdout={:?} stderr={:?}",
            command,
            output.code,
            output.stdout,
            output.stderr
        );
        Ok(output)
    }

    /// For queries whose answer is the exit code: 0 is yes, 1 is no.
    fn run_predicate(&self, args: &[&str]) -> Result<bool> {
        let output = self.run(args)?;
        match output.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(Error::vcs(
                self.describe(args),
                VcsFailure::Exit {
                    code,
                    stderr: output.stderr.trim().to_string(),
                },
            )),
        }
    }

    fn run_success(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if output.code != Some(0) {
            return Err(Error::vcs(
                self.describe(args),
                VcsFailure::Exit {
                    code: output.code,
                    stderr: output.stderr.trim().to_string(),
                },
            ));
        }
        Ok(output.stdout)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

fn wait_deadline(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let deadline = Instant::now() + timeout;
    let mut pause = POLL_START;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(pause.min(deadline - now));
        pause = (pause * 2).min(POLL_MAX);
    }
}

/// Revisions can come from an archive manifest; never let one become a flag.
fn checked<'a>(command: &str, rev: &'a Revision) -> Result<&'a str> {
    let id = rev.as_str();
    if id.is_empty() || id.starts_with('-') || id.chars().any(char::is_whitespace) {
        return Err(Error::vcs(command, VcsFailure::InvalidRevision(id.to_string())));
    }
    Ok(id)
}

impl Vcs for GitCli {
    fn is_repository(&self) -> Result<bool> {
        let output = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        Ok(output.code == Some(0) && output.stdout.trim() == "true")
    }

    fn head_revision(&self) -> Result<Revision> {
        let out = self.run_success(&["rev-parse", "--verify", "HEAD"])?;
        Ok(Revision::new(out.trim()))
    }

    fn is_clean(&self, path: &PathRef) -> Result<bool> {
        self.run_predicate(&["diff", "--quiet", "HEAD", "--", path.as_pathspec()])
    }

    fn is_tracked(&self, path: &PathRef) -> Result<bool> {
        let args = ["ls-files", "--error-unmatch", "--", path.as_pathspec()];
        let output = self.run(&args)?;
        match output.code {
            Some(0) => Ok(!output.stdout.trim().is_empty()),
            Some(1) => Ok(false),
            code => Err(Error::vcs(
                self.describe(&args),
                VcsFailure::Exit {
                    code,
                    stderr: output.stderr.trim().to_string(),
                },
            )),
        }
    }

    fn last_changing_revision(&self, path: &PathRef) -> Result<Option<Revision>> {
        let out = self.run_success(&[
            "log",
            "-n",
            "1",
            "--pretty=format:%H",
            "--",
            path.as_pathspec(),
        ])?;
        let id = out.trim();
        if id.is_empty() {
            ulog_debug!("no commit touches {}", path);
            return Ok(None);
        }
        Ok(Some(Revision::new(id)))
    }

    fn is_ancestor_of(
        &self,
        possible_ancestor: &Revision,
        possible_descendant: &Revision,
    ) -> Result<bool> {
        if possible_ancestor == possible_descendant {
            return Ok(false);
        }
        let describe = "merge-base --is-ancestor";
        let ancestor = checked(describe, possible_ancestor)?;
        let descendant = checked(describe, possible_descendant)?;
        self.run_predicate(&["merge-base", "--is-ancestor", ancestor, descendant])
    }
}
