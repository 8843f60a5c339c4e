//! Task configurations handed to the evaluator.
//!
//! A task either produces plain outputs that are committed alongside its
//! inputs, or is bundled into an archive produced by another task.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::vcs::PathRef;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskConfiguration {
    InputOutput {
        task_name: String,
        inputs: BTreeSet<PathRef>,
        outputs: BTreeSet<PathRef>,
    },
    InputArtifact {
        task_name: String,
        inputs: BTreeSet<PathRef>,
        /// Task that produces the archive these inputs end up in.
        artifact_task: String,
    },
}

impl TaskConfiguration {
    pub fn input_output<I, O>(task_name: &str, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PathRef>,
        O: IntoIterator,
        O::Item: Into<PathRef>,
    {
        TaskConfiguration::InputOutput {
            task_name: task_name.to_string(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn input_artifact<I>(task_name: &str, inputs: I, artifact_task: &str) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PathRef>,
    {
        TaskConfiguration::InputArtifact {
            task_name: task_name.to_string(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            artifact_task: artifact_task.to_string(),
        }
    }

    pub fn task_name(&self) -> &str {
        match self {
            TaskConfiguration::InputOutput { task_name, .. }
            | TaskConfiguration::InputArtifact { task_name, .. } => task_name,
        }
    }

    pub fn inputs(&self) -> &BTreeSet<PathRef> {
        match self {
            TaskConfiguration::InputOutput { inputs, .. }
            | TaskConfiguration::InputArtifact { inputs, .. } => inputs,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.task_name().trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "task name cannot be blank".to_string(),
            ));
        }
        if self.inputs().is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "task '{}' declares no inputs",
                self.task_name()
            )));
        }
        match self {
            TaskConfiguration::InputOutput { outputs, .. } if outputs.is_empty() => {
                Err(Error::InvalidConfiguration(format!(
                    "task '{}' declares no outputs",
                    self.task_name()
                )))
            }
            TaskConfiguration::InputArtifact { artifact_task, .. }
                if artifact_task.trim().is_empty() =>
            {
                Err(Error::InvalidConfiguration(format!(
                    "task '{}' names no artifact task",
                    self.task_name()
                )))
            }
            _ => Ok(()),
        }
    }
}
