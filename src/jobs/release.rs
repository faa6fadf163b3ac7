//! Release publisher.
//!
//! Terminal sink that gathers every artifact the active flag set requires,
//! then upserts the tagged release on the host: create when absent, update
//! in place when present. Publishing is fail-closed — if any required
//! artifact is missing, the job fails before the host is touched, and a
//! previously published release stays exactly as it was.

use anyhow::{bail, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::artifact_store::ArtifactStore;
use crate::config::ReleaseConfig;
use crate::exec::{CommandLine, CommandRunner};
use crate::jobs::{CLIENT_KEY, WHEELS_KEY};
use crate::platform::SUPPORTED_TARGETS;
use crate::trigger::ReleaseDescriptor;

/// File name of the client bundle asset attached to every release.
pub const CLIENT_ARCHIVE_NAME: &str = "swingmusic-client.tar.zst";

/// Everything one upsert needs; the host applies it atomically per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseUpsert {
    pub tag: String,
    pub title: String,
    pub body: String,
    pub draft: bool,
    pub latest: bool,
    pub assets: Vec<PathBuf>,
}

/// Release host collaborator: create-or-update-by-tag with file attachment.
pub trait ReleaseHost: Send + Sync {
    /// Whether a release record already exists for `tag`.
    fn exists(&self, tag: &str) -> Result<bool>;
    fn create(&self, req: &ReleaseUpsert) -> Result<()>;
    fn update(&self, req: &ReleaseUpsert) -> Result<()>;
}

pub fn publish_release(
    host: &dyn ReleaseHost,
    config: &ReleaseConfig,
    desc: &ReleaseDescriptor,
    store: &ArtifactStore,
    source_root: &Path,
    scratch_dir: &Path,
) -> Result<()> {
    let required = required_keys(desc);

    // Completeness check before anything leaves the machine.
    let missing: Vec<&str> = required
        .iter()
        .filter(|key| matches!(store.get(key), Ok(None) | Err(_)))
        .map(|key| key.as_str())
        .collect();
    if !missing.is_empty() {
        bail!(
            "refusing to publish a partial release for '{}': missing artifacts: {}",
            desc.tag,
            missing.join(", ")
        );
    }

    fs::create_dir_all(scratch_dir)?;
    let mut assets = Vec::with_capacity(required.len());

    // The client bundle is stored as a tar.zst blob; exporting the blob is
    // exactly the single-archive asset the release wants.
    let client_archive = scratch_dir.join(CLIENT_ARCHIVE_NAME);
    store.export_blob(CLIENT_KEY, &client_archive)?;
    assets.push(client_archive);

    let wheel = store.require(WHEELS_KEY)?;
    let wheel_name = wheel
        .entry
        .file_name
        .clone()
        .unwrap_or_else(|| "swingmusic.whl".to_string());
    let wheel_path = scratch_dir.join(&wheel_name);
    store.materialize_to(WHEELS_KEY, &wheel_path)?;
    assets.push(wheel_path);

    if desc.build_binaries {
        for target in SUPPORTED_TARGETS {
            let dest = scratch_dir.join(target.binary_file_name());
            store.materialize_to(&target.artifact_key(), &dest)?;
            assets.push(dest);
        }
    }

    let body = read_notes(&source_root.join(&config.notes_file));

    let req = ReleaseUpsert {
        tag: desc.tag.clone(),
        title: desc.tag.clone(),
        body,
        draft: desc.is_draft,
        latest: desc.is_latest,
        assets,
    };

    if host.exists(&desc.tag)? {
        info!(tag = %desc.tag, "release exists, updating in place");
        host.update(&req)?;
    } else {
        info!(tag = %desc.tag, "creating release");
        host.create(&req)?;
    }

    info!(tag = %desc.tag, assets = req.assets.len(), "release published");
    Ok(())
}

/// Artifact keys the active flag set requires.
pub fn required_keys(desc: &ReleaseDescriptor) -> Vec<String> {
    let mut keys = vec![CLIENT_KEY.to_string(), WHEELS_KEY.to_string()];
    if desc.build_binaries {
        keys.extend(SUPPORTED_TARGETS.iter().map(|t| t.artifact_key()));
    }
    keys
}

fn read_notes(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(body) => body,
        Err(_) => {
            warn!(path = %path.display(), "changelog file not readable, publishing empty body");
            String::new()
        }
    }
}

/// Release host backed by the `gh` CLI.
pub struct GhReleaseHost<'a> {
    pub runner: &'a dyn CommandRunner,
    pub repository: String,
}

impl ReleaseHost for GhReleaseHost<'_> {
    fn exists(&self, tag: &str) -> Result<bool> {
        // A missing release exits non-zero; real transport errors will
        // resurface on the create call that follows.
        let out = self.runner.run_captured(
            &CommandLine::new("gh")
                .args(["release", "view", tag, "--repo", &self.repository]),
        )?;
        Ok(out.success)
    }

    fn create(&self, req: &ReleaseUpsert) -> Result<()> {
        let mut cmd = CommandLine::new("gh")
            .args(["release", "create", &req.tag, "--repo", &self.repository])
            .args(["--title", &req.title])
            .args(["--notes", &req.body]);
        if req.draft {
            cmd = cmd.arg("--draft");
        }
        cmd = cmd.arg(if req.latest { "--latest" } else { "--latest=false" });
        for asset in &req.assets {
            cmd = cmd.arg(asset.display().to_string());
        }
        self.runner.run(&cmd)
    }

    fn update(&self, req: &ReleaseUpsert) -> Result<()> {
        let edit = CommandLine::new("gh")
            .args(["release", "edit", &req.tag, "--repo", &self.repository])
            .args(["--title", &req.title])
            .args(["--notes", &req.body])
            .arg(format!("--draft={}", req.draft))
            .arg(format!("--latest={}", req.latest));
        self.runner.run(&edit)?;

        let mut upload = CommandLine::new("gh").args([
            "release",
            "upload",
            &req.tag,
            "--repo",
            &self.repository,
            "--clobber",
        ]);
        for asset in &req.assets {
            upload = upload.arg(asset.display().to_string());
        }
        self.runner.run(&upload)
    }
}
