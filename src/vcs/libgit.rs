use std::collections::{BinaryHeap, HashSet};
use std::path::{Path, PathBuf};

use git2::{DiffOptions, ErrorCode, Oid, Repository};

use super::{PathRef, Revision, Vcs};
use crate::error::VcsFailure;
use crate::{ulog_debug, Error, Result};

/// [`Vcs`] answered in-process by libgit2.
///
/// Semantics follow [`super::GitCli`]: cleanliness compares HEAD against the
/// index and working tree, and the last changing revision is what
/// `git log -1 -- <path>` prints under its default history simplification.
pub struct LibGit {
    root: PathBuf,
}

fn lib(op: &'static str) -> impl FnOnce(git2::Error) -> Error {
    move |e| Error::vcs(op, VcsFailure::Library(e))
}

impl LibGit {
    pub fn new(root: &Path) -> Self {
        ulog_debug!("LibGit::new root={}", root.display());
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repo(&self) -> Result<Repository> {
        Repository::discover(&self.root).map_err(lib("discover"))
    }

    /// `path` rewritten relative to the repository workdir, which may sit
    /// above `root`.
    fn repo_relative(&self, repo: &Repository, path: &PathRef) -> Result<String> {
        let workdir = repo
            .workdir()
            .ok_or_else(|| Error::InvalidConfiguration("bare repository".to_string()))?;
        let workdir = workdir.canonicalize()?;
        let root = self.root.canonicalize()?;
        let prefix = PathRef::relative_to(&workdir, &root)?;
        Ok(match (prefix.as_str(), path.as_str()) {
            ("", p) => p.to_string(),
            (pre, "") => pre.to_string(),
            (pre, p) => format!("{}/{}", pre, p),
        })
    }

    fn parse(op: &'static str, rev: &Revision) -> Result<Oid> {
        Oid::from_str(rev.as_str())
            .map_err(|_| Error::vcs(op, VcsFailure::InvalidRevision(rev.to_string())))
    }
}

impl Vcs for LibGit {
    fn is_repository(&self) -> Result<bool> {
        match Repository::discover(&self.root) {
            Ok(repo) => Ok(!repo.is_bare()),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(lib("discover")(e)),
        }
    }

    fn head_revision(&self) -> Result<Revision> {
        let repo = self.repo()?;
        let commit = repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map_err(lib("head"))?;
        Ok(Revision::new(commit.id().to_string()))
    }

    fn is_clean(&self, path: &PathRef) -> Result<bool> {
        let repo = self.repo()?;
        let spec = self.repo_relative(&repo, path)?;
        let tree = repo
            .head()
            .and_then(|head| head.peel_to_tree())
            .map_err(lib("diff"))?;

        let mut opts = DiffOptions::new();
        if !spec.is_empty() {
            opts.pathspec(&spec).disable_pathspec_match(true);
        }
        let diff = repo
            .diff_tree_to_workdir_with_index(Some(&tree), Some(&mut opts))
            .map_err(lib("diff"))?;
        let clean = diff.deltas().next().is_none();
        ulog_debug!("libgit diff {} clean={}", spec, clean);
        Ok(clean)
    }

    fn is_tracked(&self, path: &PathRef) -> Result<bool> {
        let repo = self.repo()?;
        let spec = self.repo_relative(&repo, path)?;
        let index = repo.index().map_err(lib("index"))?;

        if spec.is_empty() {
            return Ok(!index.is_empty());
        }
        if index.get_path(Path::new(&spec), 0).is_some() {
            return Ok(true);
        }
        let prefix = format!("{}/", spec);
        let tracked = index
            .iter()
            .any(|entry| entry.path.starts_with(prefix.as_bytes()));
        Ok(tracked)
    }

    fn last_changing_revision(&self, path: &PathRef) -> Result<Option<Revision>> {
        let repo = self.repo()?;
        let spec = self.repo_relative(&repo, path)?;

        let entry_of = |commit: &git2::Commit| -> Result<Option<Oid>> {
            let tree = commit.tree().map_err(lib("log"))?;
            if spec.is_empty() {
                return Ok(Some(tree.id()));
            }
            match tree.get_path(Path::new(&spec)) {
                Ok(entry) => Ok(Some(entry.id())),
                Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
                Err(e) => Err(lib("log")(e)),
            }
        };

        // Newest commit first, like `git log`. A merge that kept one parent's
        // entry is followed down that parent only.
        let head = repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map_err(lib("log"))?;
        let mut queue = BinaryHeap::new();
        let mut seen = HashSet::new();
        seen.insert(head.id());
        queue.push((head.time().seconds(), head.id()));

        while let Some((_, oid)) = queue.pop() {
            let commit = repo.find_commit(oid).map_err(lib("log"))?;
            let current = entry_of(&commit)?;

            let parents: Vec<git2::Commit> = commit.parents().collect();
            let mut same = None;
            for parent in &parents {
                if entry_of(parent)? == current {
                    same = Some(parent);
                    break;
                }
            }

            let follow: Vec<&git2::Commit> = match same {
                Some(parent) => vec![parent],
                None if parents.is_empty() && current.is_some() => {
                    return Ok(Some(Revision::new(oid.to_string())))
                }
                None if parents.is_empty() => Vec::new(),
                None => return Ok(Some(Revision::new(oid.to_string()))),
            };
            for parent in follow {
                if seen.insert(parent.id()) {
                    queue.push((parent.time().seconds(), parent.id()));
                }
            }
        }
        Ok(None)
    }

    fn is_ancestor_of(
        &self,
        possible_ancestor: &Revision,
        possible_descendant: &Revision,
    ) -> Result<bool> {
        if possible_ancestor == possible_descendant {
            return Ok(false);
        }
        let ancestor = Self::parse("graph_descendant_of", possible_ancestor)?;
        let descendant = Self::parse("graph_descendant_of", possible_descendant)?;
        let repo = self.repo()?;
        repo.graph_descendant_of(descendant, ancestor)
            .map_err(lib("graph_descendant_of"))
    }
}
