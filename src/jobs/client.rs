//! Client build job.
//!
//! Checks out the pinned client repository, runs its declared install and
//! build commands, and captures the resulting static-asset directory as the
//! `client` artifact. Always runs; a build failure here fails the job and
//! the only recovery is a rerun.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::artifact_store::ArtifactStore;
use crate::config::ClientConfig;
use crate::exec::{CommandLine, CommandRunner};
use crate::jobs::CLIENT_KEY;

pub fn build_client(
    runner: &dyn CommandRunner,
    config: &ClientConfig,
    work_dir: &Path,
    store: &ArtifactStore,
) -> Result<()> {
    let checkout = work_dir.join("client-src");
    if checkout.exists() {
        fs::remove_dir_all(&checkout)
            .with_context(|| format!("clearing stale checkout '{}'", checkout.display()))?;
    }
    fs::create_dir_all(work_dir)
        .with_context(|| format!("creating work directory '{}'", work_dir.display()))?;

    info!(repo = %config.repo, reference = %config.reference, "checking out client source");
    runner.run(
        &CommandLine::new("git")
            .args(["clone", &config.repo])
            .arg(checkout.display().to_string())
            .current_dir(work_dir),
    )?;
    runner.run(
        &CommandLine::new("git")
            .args(["checkout", &config.reference])
            .current_dir(&checkout),
    )?;

    for argv in config.install.iter().chain(&config.build) {
        let cmd = CommandLine::from_argv(argv)?.current_dir(&checkout);
        info!(command = %cmd, "running client build step");
        runner.run(&cmd)?;
    }

    let output_dir = checkout.join(&config.output_dir);
    if !output_dir.is_dir() {
        bail!(
            "client build produced no output directory at '{}'",
            output_dir.display()
        );
    }
    let is_empty = fs::read_dir(&output_dir)
        .with_context(|| format!("reading '{}'", output_dir.display()))?
        .next()
        .is_none();
    if is_empty {
        bail!(
            "client build output directory '{}' is empty",
            output_dir.display()
        );
    }

    store.put_dir(CLIENT_KEY, &output_dir)?;
    info!("client bundle stored");
    Ok(())
}
