use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use swing_release::artifact_store::{self, ArtifactStore};
use swing_release::config::load_config;
use swing_release::exec::HostRunner;
use swing_release::jobs::image::BuildxRegistry;
use swing_release::jobs::release::GhReleaseHost;
use swing_release::pipeline::{format_report, prepare_run_dirs, Pipeline, ReleasePlan};
use swing_release::platform::SUPPORTED_TARGETS;
use swing_release::preflight;
use swing_release::trigger::{ReleaseDescriptor, TriggerConfig};

/// Release-build orchestration pipeline for Swing Music.
#[derive(Parser)]
#[command(name = "swing-release", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// The four release toggles, shared by `run` and `plan`.
#[derive(Args, Clone)]
struct ReleaseFlags {
    /// Build the standalone binary matrix
    #[arg(long)]
    binaries: bool,
    /// Mark the release (and image) as latest
    #[arg(long)]
    latest: bool,
    /// Publish the release as a draft
    #[arg(long)]
    draft: bool,
    /// Build and push the container image
    #[arg(long)]
    docker: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the release pipeline for a tag
    Run {
        /// Release tag, e.g. v2.0.1
        tag: String,
        #[command(flatten)]
        flags: ReleaseFlags,
        /// Pipeline config file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Application source tree
        #[arg(long, default_value = ".")]
        source: PathBuf,
        /// Work directory for run namespaces (default: <source>/.swing-release)
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the job DAG a run would execute, without running anything
    Plan {
        tag: String,
        #[command(flatten)]
        flags: ReleaseFlags,
    },

    /// Print the supported platform matrix and binary names
    Targets,

    /// Delete run namespaces older than the retention window
    Sweep {
        #[arg(long, default_value = ".swing-release")]
        workdir: PathBuf,
        /// Retention window in days
        #[arg(long, default_value_t = 7)]
        days: u64,
    },
}

fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Commands::Run {
            tag,
            flags,
            config,
            source,
            workdir,
            json,
        } => cmd_run(tag, flags, config.as_deref(), &source, workdir, json),
        Commands::Plan { tag, flags } => cmd_plan(tag, flags),
        Commands::Targets => cmd_targets(),
        Commands::Sweep { workdir, days } => cmd_sweep(&workdir, days),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

fn descriptor_from(tag: String, flags: &ReleaseFlags) -> Result<ReleaseDescriptor> {
    TriggerConfig {
        tag,
        build_binaries: flags.binaries,
        is_latest: flags.latest,
        is_draft: flags.draft,
        build_docker: flags.docker,
    }
    .validate()
}

fn cmd_run(
    tag: String,
    flags: ReleaseFlags,
    config_path: Option<&Path>,
    source: &Path,
    workdir: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let desc = descriptor_from(tag, &flags)?;
    let config = load_config(config_path)?;
    let source_root = source
        .canonicalize()
        .with_context(|| format!("resolving source tree '{}'", source.display()))?;
    let workdir = workdir.unwrap_or_else(|| source_root.join(".swing-release"));

    preflight::check_host_tools(&desc, &config)?;

    let run_id = new_run_id(&desc.tag)?;
    let run_root = artifact_store::init_run(&workdir, &run_id, &desc.tag)?;
    let store = ArtifactStore::open(&run_root)?;
    prepare_run_dirs(&run_root)?;

    let runner = HostRunner;
    let release_host = GhReleaseHost {
        runner: &runner,
        repository: config.release.repository.clone(),
    };
    let registry = BuildxRegistry { runner: &runner };

    let pipeline = Pipeline {
        descriptor: &desc,
        config: &config,
        source_root: &source_root,
        run_root: &run_root,
        store: &store,
        runner: &runner,
        release_host: &release_host,
        registry: &registry,
    };

    let mut plan = ReleasePlan::for_descriptor(&desc);
    let report = pipeline.execute(&mut plan)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_report(&report));
    }

    if !report.success {
        bail!("release pipeline for '{}' did not complete", report.tag);
    }
    Ok(())
}

fn cmd_plan(tag: String, flags: ReleaseFlags) -> Result<()> {
    let desc = descriptor_from(tag, &flags)?;
    let plan = ReleasePlan::for_descriptor(&desc);

    println!("plan for {}:", desc.tag);
    for job in plan.jobs() {
        let needs = if job.needs.is_empty() {
            "-".to_string()
        } else {
            job.needs
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!("  {:<22} {:<28} needs: {}", job.id.to_string(), format!("{:?}", job.status), needs);
    }
    Ok(())
}

fn cmd_targets() -> Result<()> {
    println!("{:<10} {:<8} file name", "os", "arch");
    for target in SUPPORTED_TARGETS {
        println!(
            "{:<10} {:<8} {}",
            target.os.to_string(),
            target.arch.to_string(),
            target.binary_file_name()
        );
    }
    Ok(())
}

fn cmd_sweep(workdir: &Path, days: u64) -> Result<()> {
    let removed = artifact_store::sweep_runs(workdir, Duration::from_secs(days * 24 * 60 * 60))?;
    if removed.is_empty() {
        println!("no runs older than {days} days under '{}'", workdir.display());
    } else {
        for path in &removed {
            println!("removed {}", path.display());
        }
    }
    Ok(())
}

fn new_run_id(tag: &str) -> Result<String> {
    let format = time::format_description::parse("[year][month][day]-[hour][minute][second]")
        .context("building run id timestamp format")?;
    let stamp = time::OffsetDateTime::now_utc()
        .format(&format)
        .context("formatting run id timestamp")?;
    Ok(format!("{tag}-{stamp}"))
}
