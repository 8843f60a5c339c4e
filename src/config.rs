use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::evaluator::EvaluationOptions;
use crate::task::TaskConfiguration;
use crate::util::{expand_tilde, resolve};
use crate::vcs::{GitCli, LibGit, PathRef, Vcs};
use crate::{ulog_debug, Error, Result};

pub const CONFIG_FILE: &str = ".git-uptodate.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    #[default]
    #[serde(rename = "cli")]
    Cli,
    #[serde(rename = "libgit2")]
    LibGit2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    pub backend: Backend,
    /// Only used by the `cli` backend.
    pub binary: String,
    pub timeout_secs: u64,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Cli,
            binary: "git".to_string(),
            timeout_secs: 60,
        }
    }
}

/// One `[[task]]` table. Exactly one of `outputs` and `artifact` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    pub outputs: Option<Vec<String>>,
    pub artifact: Option<String>,
}

impl TaskEntry {
    /// Build the evaluator's view of this entry. Paths may be absolute as long
    /// as they lie under `root`.
    pub fn to_configuration(&self, root: &Path) -> Result<TaskConfiguration> {
        let inputs = paths_under(root, &self.inputs)?;
        let config = match (&self.outputs, &self.artifact) {
            (Some(outputs), None) => {
                TaskConfiguration::input_output(&self.name, inputs, paths_under(root, outputs)?)
            }
            (None, Some(artifact)) => {
                TaskConfiguration::input_artifact(&self.name, inputs, artifact)
            }
            (Some(_), Some(_)) => {
                return Err(Error::InvalidConfiguration(format!(
                    "task '{}' sets both outputs and artifact",
                    self.name
                )))
            }
            (None, None) => {
                return Err(Error::InvalidConfiguration(format!(
                    "task '{}' sets neither outputs nor artifact",
                    self.name
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// The archive location for artifact tasks, resolved against `root`.
    pub fn artifact_path(&self, root: &Path) -> Option<PathBuf> {
        self.artifact
            .as_deref()
            .map(|artifact| resolve(root, Path::new(artifact)))
    }
}

/// Configured paths relative to `root`. Paths outside of it are rejected.
pub fn paths_under(root: &Path, paths: &[String]) -> Result<Vec<PathRef>> {
    paths
        .iter()
        .map(|path| PathRef::relative_to(root, Path::new(path)))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub git: GitSettings,
    #[serde(default)]
    pub evaluation: EvaluationOptions,
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskEntry>,
}

impl Config {
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE)
    }

    pub fn load(root: &Path) -> Result<Self> {
        Self::load_from(&Self::path_in(root), root)
    }

    /// A missing file yields defaults. Every task entry is checked up front
    /// against `root`.
    pub fn load_from(path: &Path, root: &Path) -> Result<Self> {
        ulog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            ulog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate(root)?;
        ulog_debug!(
            "Config loaded: backend={:?}, tasks={}, evaluation={:?}",
            config.git.backend,
            config.tasks.len(),
            config.evaluation
        );
        Ok(config)
    }

    fn validate(&self, root: &Path) -> Result<()> {
        let mut names = BTreeSet::new();
        for entry in &self.tasks {
            if !names.insert(entry.name.as_str()) {
                return Err(Error::InvalidConfiguration(format!(
                    "task '{}' is defined twice",
                    entry.name
                )));
            }
            entry.to_configuration(root)?;
        }
        if self.git.timeout_secs == 0 {
            return Err(Error::InvalidConfiguration(
                "git.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn task(&self, name: &str) -> Result<&TaskEntry> {
        self.tasks
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| Error::InvalidConfiguration(format!("unknown task '{}'", name)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.git.timeout_secs)
    }

    pub fn build_vcs(&self, root: &Path) -> Result<Box<dyn Vcs>> {
        ulog_debug!("Config::build_vcs backend={:?} root={}", self.git.backend, root.display());
        match self.git.backend {
            Backend::Cli => {
                let binary = expand_tilde(&self.git.binary);
                let vcs = GitCli::with_binary(root, binary)?.with_timeout(self.timeout());
                Ok(Box::new(vcs))
            }
            Backend::LibGit2 => Ok(Box::new(LibGit::new(root))),
        }
    }
}
