pub mod config;
pub mod digest;
pub mod error;
pub mod evaluator;
pub mod log;
pub mod manifest;
pub mod provenance;
pub mod task;
pub mod util;
pub mod vcs;

pub use error::{Error, Result};
pub use evaluator::{
    evaluate, evaluate_async, EvaluationOptions, Evaluator, Reason, ReferenceSource,
    UntrackedArtifactPolicy, Verdict,
};
pub use provenance::{stamp, ArchiveOpener, ArchiveProvenanceStore, ProvenanceRecord};
pub use task::TaskConfiguration;
pub use vcs::{PathRef, Revision, TrackingState, Vcs};
