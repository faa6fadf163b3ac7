//! Container image publisher.
//!
//! Terminal sink gated on `build_docker`, independent of the binary matrix
//! and of the release sink. Builds a multi-architecture image from the
//! source tree and pushes the version tag, plus `latest` if and only if the
//! run is marked latest.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::ImageConfig;
use crate::exec::{CommandLine, CommandRunner};
use crate::trigger::ReleaseDescriptor;

/// One multi-arch build-and-push request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePush {
    /// Full tag references, e.g. `ghcr.io/org/app:v2.0.1`.
    pub tags: Vec<String>,
    pub platforms: Vec<String>,
    pub dockerfile: PathBuf,
    pub context_dir: PathBuf,
}

/// Container registry collaborator: push-by-tag, several tags per push.
pub trait ImageRegistry: Send + Sync {
    fn push(&self, push: &ImagePush) -> Result<()>;
}

pub fn publish_image(
    registry: &dyn ImageRegistry,
    config: &ImageConfig,
    desc: &ReleaseDescriptor,
    source_root: &Path,
) -> Result<()> {
    let mut tags = vec![format!("{}:{}", config.name, desc.tag)];
    if desc.is_latest {
        tags.push(format!("{}:latest", config.name));
    }

    let push = ImagePush {
        tags,
        platforms: config.platforms.clone(),
        dockerfile: source_root.join(&config.dockerfile),
        context_dir: source_root.to_path_buf(),
    };

    info!(tags = ?push.tags, platforms = ?push.platforms, "pushing container image");
    registry.push(&push)?;
    info!("image push complete");
    Ok(())
}

/// Registry backed by `docker buildx`; one invocation builds every platform
/// and pushes all tags together.
pub struct BuildxRegistry<'a> {
    pub runner: &'a dyn CommandRunner,
}

impl ImageRegistry for BuildxRegistry<'_> {
    fn push(&self, push: &ImagePush) -> Result<()> {
        let mut cmd = CommandLine::new("docker")
            .args(["buildx", "build"])
            .args(["--platform", &push.platforms.join(",")])
            .args(["--file", &push.dockerfile.display().to_string()]);
        for tag in &push.tags {
            cmd = cmd.args(["--tag", tag]);
        }
        cmd = cmd
            .arg("--push")
            .arg(push.context_dir.display().to_string());
        self.runner.run(&cmd)
    }
}
