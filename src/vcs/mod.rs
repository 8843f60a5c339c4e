//! Version-control queries used by freshness evaluation.
//!
//! The [`Vcs`] trait is the seam between the evaluator and git. Three
//! backends implement it: [`GitCli`] spawns one `git` process per query and
//! is the reference behavior, [`LibGit`] answers the same questions through
//! libgit2 without spawning, and [`InMemoryVcs`] is a scripted revision graph
//! for tests.

mod cli;
mod libgit;
mod memory;

use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use cli::{GitCli, DEFAULT_TIMEOUT};
pub use libgit::LibGit;
pub use memory::{InMemoryVcs, VcsCall};

/// A point in history. Only equality and ancestry are meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 7 characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A path relative to the working-directory root, always `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathRef(String);

impl PathRef {
    /// Wrap an already relative path. Backslashes are normalized to `/` and
    /// `.` components dropped. Paths that may be absolute go through
    /// [`PathRef::relative_to`].
    pub fn new(path: impl AsRef<str>) -> Self {
        let joined = path
            .as_ref()
            .split(['/', '\\'])
            .filter(|part| !part.is_empty() && *part != ".")
            .collect::<Vec<_>>()
            .join("/");
        Self(joined)
    }

    /// Express `path` relative to `root`. Relative paths are taken as already
    /// relative to `root`. Paths that leave `root` are rejected.
    pub fn relative_to(root: &Path, path: &Path) -> Result<Self> {
        let relative = if path.is_absolute() {
            path.strip_prefix(root).map_err(|_| {
                Error::InvalidConfiguration(format!(
                    "'{}' is outside of '{}'",
                    path.display(),
                    root.display()
                ))
            })?
        } else {
            path
        };

        let mut parts: Vec<String> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(Error::InvalidConfiguration(format!(
                            "'{}' escapes '{}'",
                            path.display(),
                            root.display()
                        )));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::InvalidConfiguration(format!(
                        "'{}' is not relative to '{}'",
                        path.display(),
                        root.display()
                    )));
                }
            }
        }
        Ok(Self(parts.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path git should be given. The root itself is `.`.
    pub fn as_pathspec(&self) -> &str {
        if self.0.is_empty() {
            "."
        } else {
            &self.0
        }
    }

    pub fn to_path(&self, root: &Path) -> std::path::PathBuf {
        root.join(&self.0)
    }
}

impl fmt::Display for PathRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_pathspec())
    }
}

impl From<&str> for PathRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    NotTracked,
    TrackedClean,
    TrackedDirty,
}

/// Read-only history queries against one working directory.
///
/// Every method blocks. Implementations must not retry: a failed query is
/// reported as [`Error::VcsCommandFailed`] and the caller decides.
pub trait Vcs: Send + Sync {
    fn is_repository(&self) -> Result<bool>;

    fn head_revision(&self) -> Result<Revision>;

    /// No uncommitted difference between working copy and HEAD for `path`.
    /// A path that does not exist is still queried, not assumed clean.
    fn is_clean(&self, path: &PathRef) -> Result<bool>;

    fn is_tracked(&self, path: &PathRef) -> Result<bool>;

    /// Most recent revision that modified `path`, if any.
    fn last_changing_revision(&self, path: &PathRef) -> Result<Option<Revision>>;

    /// Strict: a revision is never its own ancestor.
    fn is_ancestor_of(
        &self,
        possible_ancestor: &Revision,
        possible_descendant: &Revision,
    ) -> Result<bool>;

    fn tracking_state(&self, path: &PathRef) -> Result<TrackingState> {
        if !self.is_tracked(path)? {
            return Ok(TrackingState::NotTracked);
        }
        if self.is_clean(path)? {
            Ok(TrackingState::TrackedClean)
        } else {
            Ok(TrackingState::TrackedDirty)
        }
    }
}

impl<T: Vcs + ?Sized> Vcs for &T {
    fn is_repository(&self) -> Result<bool> {
        (**self).is_repository()
    }

    fn head_revision(&self) -> Result<Revision> {
        (**self).head_revision()
    }

    fn is_clean(&self, path: &PathRef) -> Result<bool> {
        (**self).is_clean(path)
    }

    fn is_tracked(&self, path: &PathRef) -> Result<bool> {
        (**self).is_tracked(path)
    }

    fn last_changing_revision(&self, path: &PathRef) -> Result<Option<Revision>> {
        (**self).last_changing_revision(path)
    }

    fn is_ancestor_of(
        &self,
        possible_ancestor: &Revision,
        possible_descendant: &Revision,
    ) -> Result<bool> {
        (**self).is_ancestor_of(possible_ancestor, possible_descendant)
    }
}

impl Vcs for Box<dyn Vcs> {
    fn is_repository(&self) -> Result<bool> {
        (**self).is_repository()
    }

    fn head_revision(&self) -> Result<Revision> {
        (**self).head_revision()
    }

    fn is_clean(&self, path: &PathRef) -> Result<bool> {
        (**self).is_clean(path)
    }

    fn is_tracked(&self, path: &PathRef) -> Result<bool> {
        (**self).is_tracked(path)
    }

    fn last_changing_revision(&self, path: &PathRef) -> Result<Option<Revision>> {
        (**self).last_changing_revision(path)
    }

    fn is_ancestor_of(
        &self,
        possible_ancestor: &Revision,
        possible_descendant: &Revision,
    ) -> Result<bool> {
        (**self).is_ancestor_of(possible_ancestor, possible_descendant)
    }
}
