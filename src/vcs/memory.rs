use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

use super::{PathRef, Revision, Vcs};
use crate::error::VcsFailure;
use crate::{Error, Result};

/// Which [`Vcs`] operation was invoked, for call-count assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VcsCall {
    IsRepository,
    HeadRevision,
    IsClean,
    IsTracked,
    LastChangingRevision,
    IsAncestorOf,
}

/// Scripted history: a revision graph plus per-path state.
///
/// ```
/// use git_uptodate::vcs::{InMemoryVcs, PathRef, Revision, Vcs};
///
/// let vcs = InMemoryVcs::new()
///     .commit("r1", &[])
///     .commit("r2", &["r1"])
///     .tracked("src/lib.rs", "r1");
/// assert!(vcs
///     .is_ancestor_of(&Revision::new("r1"), &Revision::new("r2"))
///     .unwrap());
/// assert!(vcs.is_tracked(&PathRef::new("src/lib.rs")).unwrap());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVcs {
    repository: bool,
    head: Option<Revision>,
    parents: HashMap<Revision, Vec<Revision>>,
    last_change: BTreeMap<PathRef, Option<Revision>>,
    dirty: BTreeSet<PathRef>,
    failing: BTreeSet<PathRef>,
    calls: Mutex<HashMap<VcsCall, usize>>,
}

impl InMemoryVcs {
    pub fn new() -> Self {
        Self {
            repository: true,
            ..Self::default()
        }
    }

    pub fn not_a_repository(mut self) -> Self {
        self.repository = false;
        self
    }

    /// Add a revision with its parents. The latest commit becomes HEAD.
    pub fn commit(mut self, id: &str, parents: &[&str]) -> Self {
        let rev = Revision::new(id);
        self.parents
            .insert(rev.clone(), parents.iter().map(|p| Revision::new(*p)).collect());
        self.head = Some(rev);
        self
    }

    /// Mark `path` tracked with `rev` as its last changing revision.
    pub fn tracked(mut self, path: &str, rev: &str) -> Self {
        self.set_last_change(path, rev);
        self
    }

    /// Tracked (in the index) but never committed.
    pub fn staged(mut self, path: &str) -> Self {
        self.last_change.insert(PathRef::new(path), None);
        self
    }

    pub fn dirty(mut self, path: &str) -> Self {
        self.set_dirty(path, true);
        self
    }

    /// Every query about `path` fails as if the tool had crashed.
    pub fn failing(mut self, path: &str) -> Self {
        self.failing.insert(PathRef::new(path));
        self
    }

    pub fn set_last_change(&mut self, path: &str, rev: &str) {
        self.last_change
            .insert(PathRef::new(path), Some(Revision::new(rev)));
    }

    pub fn set_dirty(&mut self, path: &str, dirty: bool) {
        let path = PathRef::new(path);
        if dirty {
            self.dirty.insert(path);
        } else {
            self.dirty.remove(&path);
        }
    }

    pub fn calls(&self, call: VcsCall) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(&call).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    fn record(&self, call: VcsCall) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(call).or_insert(0) += 1;
        }
    }

    fn check(&self, call: VcsCall, path: &PathRef) -> Result<()> {
        self.record(call);
        if self.failing.contains(path) {
            return Err(Error::vcs(
                format!("{:?} {}", call, path),
                VcsFailure::Exit {
                    code: Some(128),
                    stderr: "scripted failure".to_string(),
                },
            ));
        }
        Ok(())
    }

    fn known(&self, rev: &Revision) -> Result<()> {
        if self.parents.contains_key(rev) {
            Ok(())
        } else {
            Err(Error::vcs(
                format!("is_ancestor_of {}", rev),
                VcsFailure::Exit {
                    code: Some(128),
                    stderr: format!("unknown revision {}", rev),
                },
            ))
        }
    }
}

impl Vcs for InMemoryVcs {
    fn is_repository(&self) -> Result<bool> {
        self.record(VcsCall::IsRepository);
        Ok(self.repository)
    }

    fn head_revision(&self) -> Result<Revision> {
        self.record(VcsCall::HeadRevision);
        self.head.clone().ok_or_else(|| {
            Error::vcs(
                "head_revision",
                VcsFailure::Exit {
                    code: Some(128),
                    stderr: "no commits yet".to_string(),
                },
            )
        })
    }

    fn is_clean(&self, path: &PathRef) -> Result<bool> {
        self.check(VcsCall::IsClean, path)?;
        Ok(!self.dirty.contains(path))
    }

    fn is_tracked(&self, path: &PathRef) -> Result<bool> {
        self.check(VcsCall::IsTracked, path)?;
        Ok(self.last_change.contains_key(path))
    }

    fn last_changing_revision(&self, path: &PathRef) -> Result<Option<Revision>> {
        self.check(VcsCall::LastChangingRevision, path)?;
        Ok(self.last_change.get(path).cloned().flatten())
    }

    fn is_ancestor_of(
        &self,
        possible_ancestor: &Revision,
        possible_descendant: &Revision,
    ) -> Result<bool> {
        self.record(VcsCall::IsAncestorOf);
        self.known(possible_ancestor)?;
        self.known(possible_descendant)?;

        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&Revision> = self
            .parents
            .get(possible_descendant)
            .map(|p| p.iter().collect())
            .unwrap_or_default();
        while let Some(rev) = queue.pop_front() {
            if rev == possible_ancestor {
                return Ok(true);
            }
            if seen.insert(rev) {
                if let Some(parents) = self.parents.get(rev) {
                    queue.extend(parents.iter());
                }
            }
        }
        Ok(false)
    }
}
