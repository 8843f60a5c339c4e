use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use git_uptodate::config::{paths_under, Config, TaskEntry};
use git_uptodate::digest::{digest, ContentAddress};
use git_uptodate::util::resolve;
use git_uptodate::{
    stamp, ulog_error, ulog_info, ArchiveProvenanceStore, Error, Evaluator, PathRef, Result,
    TaskConfiguration, Vcs, Verdict,
};

/// git-uptodate - decide whether build artifacts are current from git history
#[derive(Parser, Debug)]
#[command(name = "git-uptodate")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    \
    GIT_UPTODATE_DEBUG=1     Enable debug logging (alternative to --debug)\n    \
    GIT_UPTODATE_LOG=PATH    Log file (default ~/.git-uptodate/git-uptodate.log)")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Working directory root (defaults to the current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Task file (defaults to <root>/.git-uptodate.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Evaluate a configured task. Exit 0 when up to date, 1 when stale.
    Check {
        task: String,

        /// Archive location, overriding the task's `artifact`
        #[arg(long)]
        artifact: Option<PathBuf>,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record HEAD (and optionally per-input revisions) in an archive manifest
    Stamp {
        artifact: PathBuf,

        /// Input path to record; repeatable
        #[arg(long = "input")]
        inputs: Vec<String>,

        /// Take the inputs from a configured task
        #[arg(long)]
        task: Option<String>,

        /// Record each input's last changing revision
        #[arg(long)]
        per_input: bool,
    },

    /// Print the provenance stored in an archive
    Show {
        artifact: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// List configured tasks
    Tasks,
}

#[derive(Serialize)]
struct Report<'a> {
    task: &'a str,
    #[serde(flatten)]
    verdict: &'a Verdict,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    git_uptodate::log::init(cli.debug);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            ulog_error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let root = root.canonicalize()?;
    let config = match &cli.config {
        Some(path) => Config::load_from(&resolve(&root, path), &root)?,
        None => Config::load(&root)?,
    };
    ulog_info!("git-uptodate root={} command={:?}", root.display(), cli.command);

    match cli.command {
        Command::Check {
            task,
            artifact,
            json,
        } => run_check(&root, &config, &task, artifact, json),
        Command::Stamp {
            artifact,
            inputs,
            task,
            per_input,
        } => run_stamp(&root, &config, &artifact, inputs, task, per_input),
        Command::Show { artifact, json } => run_show(&root, &config, &artifact, json),
        Command::Tasks => run_tasks(&root, &config),
    }
}

fn repository(root: &Path, config: &Config) -> Result<Box<dyn Vcs>> {
    let vcs = config.build_vcs(root)?;
    if !vcs.is_repository()? {
        return Err(Error::InvalidConfiguration(format!(
            "'{}' is not inside a git working tree",
            root.display()
        )));
    }
    Ok(vcs)
}

fn run_check(
    root: &Path,
    config: &Config,
    task: &str,
    artifact: Option<PathBuf>,
    json: bool,
) -> Result<ExitCode> {
    let entry = config.task(task)?;
    let task_config = entry.to_configuration(root)?;
    let artifact = match artifact {
        Some(path) => Some(resolve(root, &path)),
        None => entry.artifact_path(root),
    };

    let evaluator = Evaluator::with_archives(root, repository(root, config)?);
    let verdict = evaluator.evaluate(&task_config, artifact.as_deref(), &config.evaluation)?;

    if json {
        let report = Report {
            task,
            verdict: &verdict,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}: {}", task, verdict);
    }
    Ok(if verdict.fresh {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn run_stamp(
    root: &Path,
    config: &Config,
    artifact: &Path,
    inputs: Vec<String>,
    task: Option<String>,
    per_input: bool,
) -> Result<ExitCode> {
    let mut paths = paths_under(root, &inputs)?;
    if let Some(task) = task {
        let task_config = config.task(&task)?.to_configuration(root)?;
        paths.extend(task_config.inputs().iter().cloned());
    }
    paths.sort();
    paths.dedup();
    if per_input && paths.is_empty() {
        return Err(Error::InvalidConfiguration(
            "--per-input needs --input or --task".to_string(),
        ));
    }

    let location = resolve(root, artifact);
    let vcs = repository(root, config)?;
    let record = stamp(&vcs, &location, &paths, per_input)?;

    match &record.build_revision {
        Some(rev) => println!("{}: Commit-Hash {}", location.display(), rev),
        None => println!("{}: no build revision recorded", location.display()),
    }
    let names = known_inputs(root, config, &paths);
    for (address, rev) in &record.per_input_revisions {
        println!("  {}  {}", rev.short(), describe(&names, address));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_show(root: &Path, config: &Config, artifact: &Path, json: bool) -> Result<ExitCode> {
    let store = ArchiveProvenanceStore::open(&resolve(root, artifact))?;
    let record = store.record();

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", store.location().display());
    match &record.build_revision {
        Some(rev) => println!("  Commit-Hash: {}", rev),
        None => println!("  Commit-Hash: (none)"),
    }
    let names = known_inputs(root, config, &[]);
    for (address, rev) in &record.per_input_revisions {
        println!("  {}  {}", rev, describe(&names, address));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_tasks(root: &Path, config: &Config) -> Result<ExitCode> {
    if config.tasks.is_empty() {
        println!("No tasks configured");
        return Ok(ExitCode::SUCCESS);
    }
    for entry in &config.tasks {
        println!("{}", describe_task(root, entry)?);
    }
    Ok(ExitCode::SUCCESS)
}

fn describe_task(root: &Path, entry: &TaskEntry) -> Result<String> {
    let inputs = entry.inputs.join(", ");
    Ok(match entry.to_configuration(root)? {
        TaskConfiguration::InputOutput { outputs, .. } => {
            let outputs: Vec<&str> = outputs.iter().map(PathRef::as_str).collect();
            format!("{}  [{}] -> [{}]", entry.name, inputs, outputs.join(", "))
        }
        TaskConfiguration::InputArtifact { artifact_task, .. } => {
            format!("{}  [{}] -> {}", entry.name, inputs, artifact_task)
        }
    })
}

/// Map content addresses back to input paths we know about.
fn known_inputs(
    root: &Path,
    config: &Config,
    extra: &[PathRef],
) -> BTreeMap<ContentAddress, String> {
    let configured = config
        .tasks
        .iter()
        .filter_map(|entry| paths_under(root, &entry.inputs).ok())
        .flatten();
    configured
        .chain(extra.iter().cloned())
        .map(|path| (digest(path.as_str()), path.as_str().to_string()))
        .collect()
}

fn describe(names: &BTreeMap<ContentAddress, String>, address: &ContentAddress) -> String {
    match names.get(address) {
        Some(name) => name.clone(),
        None => format!("hash.{}", address),
    }
}
