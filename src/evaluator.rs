//! Freshness evaluation.
//!
//! An artifact is up to date when every declared input was last changed in
//! the revision the artifact was built from, or in one of its ancestors. The
//! reference revision comes from the artifact's own history when it is
//! committed, otherwise from the provenance stamped into its manifest.
//!
//! Evaluation never guesses: a failed VCS query or an input without a
//! committed revision is an error, not a verdict.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provenance::{ArchiveOpener, ProvenanceOpener, ProvenanceReader};
use crate::task::TaskConfiguration;
use crate::util::{blocking_with_timeout, resolve};
use crate::vcs::{GitCli, PathRef, Revision, TrackingState, Vcs};
use crate::{ulog_debug, ulog_info, ulog_warn, Error, Result};

/// What to conclude about an artifact that is neither committed nor checked
/// through its manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UntrackedArtifactPolicy {
    /// Inputs are clean and the artifact exists; take that as enough.
    AssumeFresh,
    #[default]
    AssumeStale,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationOptions {
    /// Fall back to the manifest's `Commit-Hash` for untracked artifacts.
    pub consider_manifest: bool,
    /// Compare inputs against their own stamped revision when present.
    pub consider_per_input_hashes: bool,
    /// An untracked input makes the artifact stale instead of being skipped.
    pub fail_on_untracked_input: bool,
    pub untracked_artifact: UntrackedArtifactPolicy,
    /// Resolve per-input revisions on worker threads.
    pub parallel_inputs: bool,
}

/// Where the revision an input was compared against came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSource {
    TrackedArtifact,
    Manifest,
    StoredInputRevision,
    Outputs,
}

impl fmt::Display for ReferenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReferenceSource::TrackedArtifact => "artifact history",
            ReferenceSource::Manifest => "manifest build revision",
            ReferenceSource::StoredInputRevision => "manifest input revision",
            ReferenceSource::Outputs => "output history",
        };
        f.write_str(s)
    }
}

/// The check that decided a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum Reason {
    Fresh {
        reference: Option<Revision>,
        source: ReferenceSource,
    },
    AssumedFresh {
        artifact: PathBuf,
    },
    ArtifactMissing {
        artifact: PathBuf,
    },
    OutputMissing {
        output: PathRef,
    },
    InputUntracked {
        input: PathRef,
    },
    InputDirty {
        input: PathRef,
    },
    OutputUntracked {
        output: PathRef,
    },
    BuildRevisionMissing {
        artifact: PathBuf,
    },
    NoProvenance {
        artifact: PathBuf,
    },
    InputNewer {
        input: PathRef,
        input_revision: Revision,
        reference: Revision,
        source: ReferenceSource,
    },
    InputNewerThanOutput {
        input: PathRef,
        input_revision: Revision,
        output: PathRef,
        output_revision: Revision,
    },
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Fresh {
                reference: Some(rev),
                source,
            } => write!(f, "all inputs at or before {} ({})", rev.short(), source),
            Reason::Fresh {
                reference: None,
                source,
            } => write!(f, "all inputs at or before {}", source),
            Reason::AssumedFresh { artifact } => write!(
                f,
                "{} exists and inputs are clean; no provenance checked",
                artifact.display()
            ),
            Reason::ArtifactMissing { artifact } => {
                write!(f, "{} does not exist", artifact.display())
            }
            Reason::OutputMissing { output } => write!(f, "output {} does not exist", output),
            Reason::InputUntracked { input } => write!(f, "input {} is not tracked", input),
            Reason::InputDirty { input } => {
                write!(f, "input {} has uncommitted changes", input)
            }
            Reason::OutputUntracked { output } => write!(f, "output {} is not tracked", output),
            Reason::BuildRevisionMissing { artifact } => {
                write!(f, "{} carries no build revision", artifact.display())
            }
            Reason::NoProvenance { artifact } => write!(
                f,
                "{} is not tracked and manifest evaluation is disabled",
                artifact.display()
            ),
            Reason::InputNewer {
                input,
                input_revision,
                reference,
                source,
            } => write!(
                f,
                "input {} changed in {}, not an ancestor of {} ({})",
                input,
                input_revision.short(),
                reference.short(),
                source
            ),
            Reason::InputNewerThanOutput {
                input,
                input_revision,
                output,
                output_revision,
            } => write!(
                f,
                "input {} changed in {}, not an ancestor of output {} at {}",
                input,
                input_revision.short(),
                output,
                output_revision.short()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub fresh: bool,
    #[serde(flatten)]
    pub reason: Reason,
}

impl Verdict {
    fn fresh(reason: Reason) -> Self {
        Self {
            fresh: true,
            reason,
        }
    }

    fn stale(reason: Reason) -> Self {
        Self {
            fresh: false,
            reason,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fresh {
            write!(f, "up to date: {}", self.reason)
        } else {
            write!(f, "stale: {}", self.reason)
        }
    }
}

/// The revision inputs are compared against, and the store it came from.
struct Reference {
    revision: Revision,
    source: ReferenceSource,
    store: Option<Box<dyn ProvenanceReader>>,
}

/// Decides freshness for task configurations under one working directory.
pub struct Evaluator<V, O = ArchiveOpener> {
    root: PathBuf,
    vcs: V,
    opener: O,
}

impl<V: Vcs> Evaluator<V, ArchiveOpener> {
    pub fn with_archives(root: &Path, vcs: V) -> Self {
        Self::new(root, vcs, ArchiveOpener)
    }
}

impl<V: Vcs, O: ProvenanceOpener> Evaluator<V, O> {
    pub fn new(root: &Path, vcs: V, opener: O) -> Self {
        Self {
            root: root.to_path_buf(),
            vcs,
            opener,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Evaluate `config`. `artifact` is required for
    /// [`TaskConfiguration::InputArtifact`] and ignored otherwise; a relative
    /// location is resolved against the root.
    pub fn evaluate(
        &self,
        config: &TaskConfiguration,
        artifact: Option<&Path>,
        options: &EvaluationOptions,
    ) -> Result<Verdict> {
        config.validate()?;
        ulog_debug!("evaluate task={} options={:?}", config.task_name(), options);

        let verdict = match config {
            TaskConfiguration::InputOutput {
                inputs, outputs, ..
            } => {
                if let Some(artifact) = artifact {
                    ulog_debug!("ignoring artifact {} for input/output task", artifact.display());
                }
                self.evaluate_outputs(inputs, outputs, options)?
            }
            TaskConfiguration::InputArtifact {
                inputs,
                artifact_task,
                ..
            } => {
                let location = artifact.ok_or_else(|| {
                    Error::InvalidConfiguration(format!(
                        "task '{}': artifact task '{}' resolved to no artifact",
                        config.task_name(),
                        artifact_task
                    ))
                })?;
                self.evaluate_artifact(inputs, location, options)?
            }
        };

        ulog_info!("{}: {}", config.task_name(), verdict);
        Ok(verdict)
    }

    fn evaluate_artifact(
        &self,
        inputs: &BTreeSet<PathRef>,
        location: &Path,
        options: &EvaluationOptions,
    ) -> Result<Verdict> {
        let artifact = resolve(&self.root, location);
        if !artifact.exists() {
            return Ok(Verdict::stale(Reason::ArtifactMissing { artifact }));
        }

        let judged = match self.judged_inputs(inputs, options)? {
            ControlFlow::Continue(judged) => judged,
            ControlFlow::Break(reason) => return Ok(Verdict::stale(reason)),
        };

        let reference = match self.reference_for(&artifact, options)? {
            ControlFlow::Continue(reference) => reference,
            ControlFlow::Break(verdict) => return Ok(verdict),
        };
        ulog_debug!(
            "reference {} from {} for {} inputs",
            reference.revision.short(),
            reference.source,
            judged.len()
        );

        let per_input = options.consider_per_input_hashes && reference.store.is_some();
        let outcomes = if options.parallel_inputs && judged.len() > 1 {
            self.check_inputs_parallel(&judged, &reference, per_input)?
        } else {
            let mut outcomes = Vec::with_capacity(judged.len());
            for input in &judged {
                let outcome = self.check_input(input, &reference, per_input);
                let stop = !matches!(outcome, Ok(None));
                outcomes.push(outcome);
                if stop {
                    break;
                }
            }
            outcomes
        };

        for outcome in outcomes {
            if let Some(reason) = outcome? {
                return Ok(Verdict::stale(reason));
            }
        }

        Ok(Verdict::fresh(Reason::Fresh {
            reference: Some(reference.revision),
            source: reference.source,
        }))
    }

    /// Inputs that take part in the revision comparison, or the reason the
    /// evaluation already failed.
    fn judged_inputs<'a>(
        &self,
        inputs: &'a BTreeSet<PathRef>,
        options: &EvaluationOptions,
    ) -> Result<ControlFlow<Reason, Vec<&'a PathRef>>> {
        let mut judged = Vec::with_capacity(inputs.len());
        for input in inputs {
            match self.vcs.tracking_state(input)? {
                TrackingState::TrackedClean => judged.push(input),
                TrackingState::TrackedDirty => {
                    return Ok(ControlFlow::Break(Reason::InputDirty {
                        input: input.clone(),
                    }))
                }
                TrackingState::NotTracked if options.fail_on_untracked_input => {
                    return Ok(ControlFlow::Break(Reason::InputUntracked {
                        input: input.clone(),
                    }))
                }
                TrackingState::NotTracked => {
                    ulog_warn!("input {} is not tracked, skipped", input);
                }
            }
        }
        Ok(ControlFlow::Continue(judged))
    }

    fn reference_for(
        &self,
        artifact: &Path,
        options: &EvaluationOptions,
    ) -> Result<ControlFlow<Verdict, Reference>> {
        // An artifact outside the root cannot be tracked by this working tree.
        let tracked = match PathRef::relative_to(&self.root, artifact) {
            Ok(path) if self.vcs.is_tracked(&path)? => Some(path),
            _ => None,
        };

        if let Some(path) = tracked {
            // Only the committed state counts; a rebuilt but uncommitted
            // artifact keeps its last committed revision.
            let revision = self
                .vcs
                .last_changing_revision(&path)?
                .ok_or(Error::StaleEvidenceUnavailable(path))?;
            return Ok(ControlFlow::Continue(Reference {
                revision,
                source: ReferenceSource::TrackedArtifact,
                store: None,
            }));
        }

        if options.consider_manifest {
            let store = self.opener.open(artifact)?;
            return Ok(match store.read_build_revision() {
                Some(revision) => ControlFlow::Continue(Reference {
                    revision,
                    source: ReferenceSource::Manifest,
                    store: Some(store),
                }),
                None => ControlFlow::Break(Verdict::stale(Reason::BuildRevisionMissing {
                    artifact: artifact.to_path_buf(),
                })),
            });
        }

        let artifact = artifact.to_path_buf();
        Ok(ControlFlow::Break(match options.untracked_artifact {
            UntrackedArtifactPolicy::AssumeFresh => {
                Verdict::fresh(Reason::AssumedFresh { artifact })
            }
            UntrackedArtifactPolicy::AssumeStale => {
                Verdict::stale(Reason::NoProvenance { artifact })
            }
        }))
    }

    /// `Some(reason)` when `input` changed after the revision it is compared to.
    fn check_input(
        &self,
        input: &PathRef,
        reference: &Reference,
        per_input: bool,
    ) -> Result<Option<Reason>> {
        let stored = if per_input {
            reference
                .store
                .as_ref()
                .and_then(|store| store.read_input_revision(input))
        } else {
            None
        };
        let (target, source) = match stored {
            Some(rev) => (rev, ReferenceSource::StoredInputRevision),
            None => (reference.revision.clone(), reference.source),
        };

        let input_revision = self
            .vcs
            .last_changing_revision(input)?
            .ok_or_else(|| Error::StaleEvidenceUnavailable(input.clone()))?;

        if self.not_newer(&input_revision, &target)? {
            ulog_debug!("{} at {} <= {}", input, input_revision.short(), target.short());
            return Ok(None);
        }
        Ok(Some(Reason::InputNewer {
            input: input.clone(),
            input_revision,
            reference: target,
            source,
        }))
    }

    /// Per-input checks on worker threads. Outcomes keep input order.
    fn check_inputs_parallel(
        &self,
        inputs: &[&PathRef],
        reference: &Reference,
        per_input: bool,
    ) -> Result<Vec<Result<Option<Reason>>>> {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(inputs.len())
            .max(1);
        let chunk = inputs.len().div_ceil(workers);

        thread::scope(|scope| {
            let handles: Vec<_> = inputs
                .chunks(chunk)
                .map(|batch| {
                    scope.spawn(move || {
                        batch
                            .iter()
                            .map(|input| self.check_input(input, reference, per_input))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            let mut outcomes = Vec::with_capacity(inputs.len());
            for handle in handles {
                let batch = handle
                    .join()
                    .map_err(|_| Error::TaskJoin("input check panicked".to_string()))?;
                outcomes.extend(batch);
            }
            Ok(outcomes)
        })
    }

    fn evaluate_outputs(
        &self,
        inputs: &BTreeSet<PathRef>,
        outputs: &BTreeSet<PathRef>,
        options: &EvaluationOptions,
    ) -> Result<Verdict> {
        if let Some(output) = outputs.iter().find(|o| !o.to_path(&self.root).exists()) {
            return Ok(Verdict::stale(Reason::OutputMissing {
                output: output.clone(),
            }));
        }

        // An input without history cannot be compared against the outputs.
        let strict = EvaluationOptions {
            fail_on_untracked_input: true,
            ..*options
        };
        let judged = match self.judged_inputs(inputs, &strict)? {
            ControlFlow::Continue(judged) => judged,
            ControlFlow::Break(reason) => return Ok(Verdict::stale(reason)),
        };

        let mut output_revisions = Vec::with_capacity(outputs.len());
        for output in outputs {
            if !self.vcs.is_tracked(output)? {
                return Ok(Verdict::stale(Reason::OutputUntracked {
                    output: output.clone(),
                }));
            }
        }
        for output in outputs {
            let revision = self
                .vcs
                .last_changing_revision(output)?
                .ok_or_else(|| Error::StaleEvidenceUnavailable(output.clone()))?;
            output_revisions.push((output, revision));
        }

        for input in judged {
            let input_revision = self
                .vcs
                .last_changing_revision(input)?
                .ok_or_else(|| Error::StaleEvidenceUnavailable(input.clone()))?;
            for (output, output_revision) in &output_revisions {
                if !self.not_newer(&input_revision, output_revision)? {
                    return Ok(Verdict::stale(Reason::InputNewerThanOutput {
                        input: input.clone(),
                        input_revision,
                        output: (*output).clone(),
                        output_revision: output_revision.clone(),
                    }));
                }
            }
        }

        Ok(Verdict::fresh(Reason::Fresh {
            reference: None,
            source: ReferenceSource::Outputs,
        }))
    }

    /// Equal counts as not newer; unrelated revisions do not.
    fn not_newer(&self, input: &Revision, reference: &Revision) -> Result<bool> {
        Ok(input == reference || self.vcs.is_ancestor_of(input, reference)?)
    }
}

/// Evaluate with the `git` CLI and real archives under `root`.
pub fn evaluate(
    root: &Path,
    config: &TaskConfiguration,
    artifact: Option<&Path>,
    options: &EvaluationOptions,
) -> Result<Verdict> {
    let vcs = GitCli::new(root)?;
    if !vcs.is_repository()? {
        return Err(Error::InvalidConfiguration(format!(
            "'{}' is not inside a git working tree",
            root.display()
        )));
    }
    Evaluator::with_archives(root, vcs).evaluate(config, artifact, options)
}

/// Run an evaluation on the blocking pool, giving up after `ceiling`.
///
/// The evaluation itself is not interrupted on expiry; each VCS query still
/// ends at its own timeout.
pub async fn evaluate_async<V, O>(
    evaluator: Arc<Evaluator<V, O>>,
    config: TaskConfiguration,
    artifact: Option<PathBuf>,
    options: EvaluationOptions,
    ceiling: Duration,
) -> Result<Verdict>
where
    V: Vcs + 'static,
    O: ProvenanceOpener + 'static,
{
    blocking_with_timeout(ceiling, move || {
        evaluator.evaluate(&config, artifact.as_deref(), &options)
    })
    .await
}
