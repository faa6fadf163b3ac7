//! Pipeline configuration (`release.toml`).
//!
//! The config names the external collaborators the pipeline drives: the
//! client repository and its build commands, the wheel build command, the
//! freeze tool, per-OS-family prerequisite sets, the release repository and
//! the container image. Defaults match the Swing Music project; a config
//! file only needs to state what differs.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::platform::OsFamily;

/// Fully resolved pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub client: ClientConfig,
    pub wheel: WheelConfig,
    pub binaries: BinariesConfig,
    pub release: ReleaseConfig,
    pub image: ImageConfig,
}

/// External client repository and its build contract.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Clone URL of the client source repository.
    pub repo: String,
    /// Pinned reference (branch, tag or commit) to check out.
    pub reference: String,
    /// Dependency install command lines, run in order in the checkout.
    pub install: Vec<Vec<String>>,
    /// Build command lines, run in order in the checkout.
    pub build: Vec<Vec<String>>,
    /// Static-asset directory the build leaves behind, relative to the checkout.
    pub output_dir: PathBuf,
}

/// Wheel (source distributable) build contract.
#[derive(Debug, Clone)]
pub struct WheelConfig {
    /// Build command, run in the application source tree.
    pub build: Vec<String>,
    /// Directory the build tool writes the wheel to, relative to the source tree.
    pub dist_dir: PathBuf,
}

/// Standalone-binary build contract, shared by every matrix instance.
#[derive(Debug, Clone)]
pub struct BinariesConfig {
    /// Prerequisite command lines per OS family; windows has none.
    pub prerequisites_linux: Vec<Vec<String>>,
    pub prerequisites_macos: Vec<Vec<String>>,
    pub prerequisites_windows: Vec<Vec<String>>,
    /// Install command; the locally built wheel path is appended as the final
    /// argument, so the application never comes from a remote index.
    pub install: Vec<String>,
    /// Freeze command, run in the application source tree.
    pub freeze: Vec<String>,
    /// Flag appended to the freeze command to redirect its output directory
    /// into the instance-private workspace.
    pub dist_flag: String,
}

impl BinariesConfig {
    pub fn prerequisites_for(&self, os: OsFamily) -> &[Vec<String>] {
        match os {
            OsFamily::Linux => &self.prerequisites_linux,
            OsFamily::Macos => &self.prerequisites_macos,
            OsFamily::Windows => &self.prerequisites_windows,
        }
    }
}

/// Release host coordinates.
#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    /// `owner/name` of the repository the release record lives in.
    pub repository: String,
    /// Changelog file whose contents become the release body, relative to the
    /// application source tree.
    pub notes_file: PathBuf,
}

/// Container image coordinates.
#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// Fully qualified image name, e.g. `ghcr.io/swing-opensource/swingmusic`.
    pub name: String,
    /// Platforms baked into the multi-arch manifest.
    pub platforms: Vec<String>,
    /// Dockerfile path relative to the application source tree.
    pub dockerfile: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig {
                repo: "https://github.com/swing-opensource/swingmusic-client.git".to_string(),
                reference: "master".to_string(),
                install: vec![argv(&["npm", "ci"])],
                build: vec![argv(&["npm", "run", "build"])],
                output_dir: PathBuf::from("dist"),
            },
            wheel: WheelConfig {
                build: argv(&["poetry", "build", "--format", "wheel"]),
                dist_dir: PathBuf::from("dist"),
            },
            binaries: BinariesConfig {
                prerequisites_linux: vec![
                    argv(&["sudo", "apt-get", "update"]),
                    argv(&["sudo", "apt-get", "install", "-y", "libev-dev"]),
                ],
                prerequisites_macos: vec![argv(&["brew", "install", "libev"])],
                prerequisites_windows: vec![],
                install: argv(&["python", "-m", "pip", "install"]),
                freeze: argv(&["poetry", "run", "pyinstaller", "swingmusic.spec"]),
                dist_flag: "--distpath".to_string(),
            },
            release: ReleaseConfig {
                repository: "swing-opensource/swingmusic".to_string(),
                notes_file: PathBuf::from("changelog.md"),
            },
            image: ImageConfig {
                name: "ghcr.io/swing-opensource/swingmusic".to_string(),
                platforms: vec!["linux/amd64".to_string(), "linux/arm64".to_string()],
                dockerfile: PathBuf::from("Dockerfile"),
            },
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

// Raw TOML shapes. Every field is optional; absent sections fall back to the
// project defaults above.

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReleaseToml {
    client: Option<ClientToml>,
    wheel: Option<WheelToml>,
    binaries: Option<BinariesToml>,
    release: Option<ReleaseHostToml>,
    image: Option<ImageToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientToml {
    repo: Option<String>,
    reference: Option<String>,
    install: Option<Vec<Vec<String>>>,
    build: Option<Vec<Vec<String>>>,
    output_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WheelToml {
    build: Option<Vec<String>>,
    dist_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BinariesToml {
    prerequisites_linux: Option<Vec<Vec<String>>>,
    prerequisites_macos: Option<Vec<Vec<String>>>,
    prerequisites_windows: Option<Vec<Vec<String>>>,
    install: Option<Vec<String>>,
    freeze: Option<Vec<String>>,
    dist_flag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReleaseHostToml {
    repository: Option<String>,
    notes_file: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImageToml {
    name: Option<String>,
    platforms: Option<Vec<String>>,
    dockerfile: Option<String>,
}

/// Load `release.toml` from `path`, or the project defaults when `path` is
/// `None`.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::default();

    if let Some(path) = path {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config '{}'", path.display()))?;
        let parsed: ReleaseToml = toml::from_str(&raw)
            .with_context(|| format!("parsing pipeline config '{}'", path.display()))?;
        apply_overrides(&mut config, parsed);
    }

    validate(&config)?;
    Ok(config)
}

fn apply_overrides(config: &mut PipelineConfig, parsed: ReleaseToml) {
    if let Some(client) = parsed.client {
        let c = &mut config.client;
        if let Some(v) = client.repo {
            c.repo = v;
        }
        if let Some(v) = client.reference {
            c.reference = v;
        }
        if let Some(v) = client.install {
            c.install = v;
        }
        if let Some(v) = client.build {
            c.build = v;
        }
        if let Some(v) = client.output_dir {
            c.output_dir = PathBuf::from(v);
        }
    }
    if let Some(wheel) = parsed.wheel {
        let w = &mut config.wheel;
        if let Some(v) = wheel.build {
            w.build = v;
        }
        if let Some(v) = wheel.dist_dir {
            w.dist_dir = PathBuf::from(v);
        }
    }
    if let Some(binaries) = parsed.binaries {
        let b = &mut config.binaries;
        if let Some(v) = binaries.prerequisites_linux {
            b.prerequisites_linux = v;
        }
        if let Some(v) = binaries.prerequisites_macos {
            b.prerequisites_macos = v;
        }
        if let Some(v) = binaries.prerequisites_windows {
            b.prerequisites_windows = v;
        }
        if let Some(v) = binaries.install {
            b.install = v;
        }
        if let Some(v) = binaries.freeze {
            b.freeze = v;
        }
        if let Some(v) = binaries.dist_flag {
            b.dist_flag = v;
        }
    }
    if let Some(release) = parsed.release {
        let r = &mut config.release;
        if let Some(v) = release.repository {
            r.repository = v;
        }
        if let Some(v) = release.notes_file {
            r.notes_file = PathBuf::from(v);
        }
    }
    if let Some(image) = parsed.image {
        let i = &mut config.image;
        if let Some(v) = image.name {
            i.name = v;
        }
        if let Some(v) = image.platforms {
            i.platforms = v;
        }
        if let Some(v) = image.dockerfile {
            i.dockerfile = PathBuf::from(v);
        }
    }
}

fn validate(config: &PipelineConfig) -> Result<()> {
    if config.client.repo.trim().is_empty() {
        bail!("client.repo must not be empty");
    }
    if config.client.reference.trim().is_empty() {
        bail!("client.reference must not be empty");
    }
    for cmd in config.client.install.iter().chain(&config.client.build) {
        require_argv(cmd, "client command")?;
    }
    require_argv(&config.wheel.build, "wheel.build")?;
    require_argv(&config.binaries.install, "binaries.install")?;
    require_argv(&config.binaries.freeze, "binaries.freeze")?;
    for cmd in config
        .binaries
        .prerequisites_linux
        .iter()
        .chain(&config.binaries.prerequisites_macos)
        .chain(&config.binaries.prerequisites_windows)
    {
        require_argv(cmd, "binaries prerequisite")?;
    }
    if config.binaries.dist_flag.trim().is_empty() {
        bail!("binaries.dist_flag must not be empty");
    }
    if !config.release.repository.contains('/') {
        bail!(
            "release.repository must be 'owner/name', got '{}'",
            config.release.repository
        );
    }
    if config.image.name.trim().is_empty() {
        bail!("image.name must not be empty");
    }
    if config.image.platforms.is_empty() {
        bail!("image.platforms must list at least one platform");
    }
    Ok(())
}

fn require_argv(argv: &[String], what: &str) -> Result<()> {
    match argv.first() {
        Some(program) if !program.trim().is_empty() => Ok(()),
        _ => bail!("{what} must start with a program name"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = load_config(None).unwrap();
        assert_eq!(config.release.repository, "swing-opensource/swingmusic");
        assert!(config.binaries.prerequisites_windows.is_empty());
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("release.toml");
        fs::write(
            &path,
            r#"
[client]
reference = "v3"

[image]
name = "ghcr.io/example/app"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.client.reference, "v3");
        assert_eq!(config.image.name, "ghcr.io/example/app");
        // Untouched sections keep their defaults.
        assert_eq!(config.wheel.dist_dir, PathBuf::from("dist"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("release.toml");
        fs::write(&path, "[client]\nrepo_url = \"oops\"\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn empty_command_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("release.toml");
        fs::write(&path, "[wheel]\nbuild = []\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn repository_must_be_owner_slash_name() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("release.toml");
        fs::write(&path, "[release]\nrepository = \"swingmusic\"\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
