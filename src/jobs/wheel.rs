//! Wheel build job.
//!
//! Packages the application source tree into a single platform-independent
//! wheel. Always runs, because the binary matrix installs from this wheel
//! whenever binaries are requested.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::artifact_store::ArtifactStore;
use crate::config::WheelConfig;
use crate::exec::{CommandLine, CommandRunner};
use crate::jobs::WHEELS_KEY;

pub fn build_wheel(
    runner: &dyn CommandRunner,
    config: &WheelConfig,
    source_root: &Path,
    store: &ArtifactStore,
) -> Result<()> {
    let cmd = CommandLine::from_argv(&config.build)?.current_dir(source_root);
    info!(command = %cmd, "building wheel");
    runner.run(&cmd)?;

    let dist_dir = source_root.join(&config.dist_dir);
    let wheel = find_single_wheel(&dist_dir)?;

    store.put_file(WHEELS_KEY, &wheel)?;
    info!(wheel = %wheel.display(), "wheel stored");
    Ok(())
}

/// The build tool contract is one distributable per invocation; anything
/// else means a stale dist directory or a misconfigured build.
fn find_single_wheel(dist_dir: &Path) -> Result<PathBuf> {
    if !dist_dir.is_dir() {
        bail!(
            "wheel build produced no dist directory at '{}'",
            dist_dir.display()
        );
    }

    let mut wheels: Vec<PathBuf> = fs::read_dir(dist_dir)
        .with_context(|| format!("reading '{}'", dist_dir.display()))?
        .filter_map(|ent| ent.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("whl"))
        .collect();
    wheels.sort();

    match wheels.as_slice() {
        [single] => Ok(single.clone()),
        [] => bail!("no wheel found in '{}'", dist_dir.display()),
        many => bail!(
            "expected exactly one wheel in '{}', found {}: {}",
            dist_dir.display(),
            many.len(),
            many.iter()
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}
