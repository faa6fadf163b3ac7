//! Standalone-binary matrix job.
//!
//! One instance per supported (OS family, architecture) pair, each in a
//! private work directory with a disjoint artifact key, so instances never
//! share mutable state. The application is installed from the locally built
//! wheel, never from a remote index: the published binary must match the
//! published wheel byte-for-byte.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::artifact_store::ArtifactStore;
use crate::config::BinariesConfig;
use crate::exec::{CommandLine, CommandRunner};
use crate::jobs::WHEELS_KEY;
use crate::platform::PlatformTarget;

pub fn build_binary(
    runner: &dyn CommandRunner,
    config: &BinariesConfig,
    target: PlatformTarget,
    source_root: &Path,
    work_dir: &Path,
    store: &ArtifactStore,
) -> Result<()> {
    fs::create_dir_all(work_dir)
        .with_context(|| format!("creating work directory '{}'", work_dir.display()))?;

    // 1. Native prerequisites for this OS family (none on windows).
    for argv in config.prerequisites_for(target.os) {
        let cmd = CommandLine::from_argv(argv)?;
        info!(target = %target, command = %cmd, "installing prerequisite");
        runner.run(&cmd)?;
    }

    // 2. Install the application from the wheel artifact.
    let wheel_entry = store.require(WHEELS_KEY).with_context(|| {
        format!("binary build for {target} needs the wheel artifact")
    })?;
    let wheel_name = wheel_entry
        .entry
        .file_name
        .clone()
        .unwrap_or_else(|| "swingmusic.whl".to_string());
    let wheel_path = work_dir.join(&wheel_name);
    store.materialize_to(WHEELS_KEY, &wheel_path)?;

    let install = CommandLine::from_argv(&config.install)?
        .arg(wheel_path.display().to_string())
        .current_dir(work_dir);
    info!(target = %target, "installing application from wheel");
    runner.run(&install)?;

    // 3. Freeze into a single self-contained executable.
    let dist_dir = work_dir.join("dist");
    let freeze = CommandLine::from_argv(&config.freeze)?
        .arg(&config.dist_flag)
        .arg(dist_dir.display().to_string())
        .current_dir(source_root);
    info!(target = %target, command = %freeze, "freezing standalone binary");
    runner.run(&freeze)?;

    // 4. Rename the raw output to the published name.
    let raw = find_single_file(&dist_dir)
        .with_context(|| format!("freeze output for {target}"))?;
    let named = dist_dir.join(target.binary_file_name());
    if raw != named {
        fs::rename(&raw, &named).with_context(|| {
            format!("renaming '{}' to '{}'", raw.display(), named.display())
        })?;
    }

    // 5. No partial or misnamed artifact is ever uploaded.
    if !named.is_file() {
        bail!(
            "renamed binary missing for {target}: expected '{}'",
            named.display()
        );
    }

    // 6. Upload under the target's disjoint key.
    store.put_file(&target.artifact_key(), &named)?;
    info!(target = %target, file = target.binary_file_name(), "binary stored");
    Ok(())
}

fn find_single_file(dist_dir: &Path) -> Result<PathBuf> {
    if !dist_dir.is_dir() {
        bail!("freeze produced no output directory at '{}'", dist_dir.display());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dist_dir)
        .with_context(|| format!("reading '{}'", dist_dir.display()))?
        .filter_map(|ent| ent.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    match files.as_slice() {
        [single] => Ok(single.clone()),
        [] => bail!("freeze left no executable in '{}'", dist_dir.display()),
        many => bail!(
            "freeze left {} files in '{}', expected exactly one",
            many.len(),
            dist_dir.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use crate::exec::ExecOutput;
    use crate::platform::{Arch, OsFamily};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FreezeRunner {
        log: Mutex<Vec<CommandLine>>,
        /// Raw file name the fake freeze tool emits; None emits nothing.
        emits: Option<&'static str>,
    }

    impl FreezeRunner {
        fn new(emits: Option<&'static str>) -> Self {
            Self {
                log: Mutex::new(vec![]),
                emits,
            }
        }
    }

    impl CommandRunner for FreezeRunner {
        fn run_captured(&self, cmd: &CommandLine) -> Result<ExecOutput> {
            self.log.lock().unwrap().push(cmd.clone());
            if cmd.program == "poetry" && cmd.args.contains(&"pyinstaller".to_string()) {
                // The dist directory follows the dist flag.
                let flag_pos = cmd.args.iter().position(|a| a == "--distpath").unwrap();
                let dist = PathBuf::from(&cmd.args[flag_pos + 1]);
                fs::create_dir_all(&dist).unwrap();
                if let Some(name) = self.emits {
                    fs::write(dist.join(name), b"elf").unwrap();
                }
            }
            Ok(ExecOutput {
                success: true,
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn store_with_wheel(tmp: &TempDir) -> ArtifactStore {
        let store = ArtifactStore::open(&tmp.path().join("run")).unwrap();
        let wheel = tmp.path().join("swingmusic-2.0.0-py3-none-any.whl");
        fs::write(&wheel, b"wheel").unwrap();
        store.put_file(WHEELS_KEY, &wheel).unwrap();
        store
    }

    const LINUX_AMD64: PlatformTarget = PlatformTarget {
        os: OsFamily::Linux,
        arch: Arch::Amd64,
    };
    const WINDOWS_ARM64: PlatformTarget = PlatformTarget {
        os: OsFamily::Windows,
        arch: Arch::Arm64,
    };

    #[test]
    fn renames_raw_output_and_stores_under_target_key() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_wheel(&tmp);
        let runner = FreezeRunner::new(Some("swingmusic"));
        let config = load_config(None).unwrap().binaries;

        build_binary(
            &runner,
            &config,
            LINUX_AMD64,
            tmp.path(),
            &tmp.path().join("work-linux-amd64"),
            &store,
        )
        .unwrap();

        let stored = store.require("linux-amd64").unwrap();
        assert_eq!(stored.entry.file_name.as_deref(), Some("swingmusic_linux_amd64"));
    }

    #[test]
    fn windows_arm64_gets_exe_name_and_no_prerequisites() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_wheel(&tmp);
        let runner = FreezeRunner::new(Some("swingmusic.exe"));
        let config = load_config(None).unwrap().binaries;

        build_binary(
            &runner,
            &config,
            WINDOWS_ARM64,
            tmp.path(),
            &tmp.path().join("work-windows-arm64"),
            &store,
        )
        .unwrap();

        let stored = store.require("windows-arm64").unwrap();
        assert_eq!(stored.entry.file_name.as_deref(), Some("swingmusic_arm64.exe"));

        // No apt/brew commands ran for windows.
        let log = runner.log.lock().unwrap();
        assert!(!log.iter().any(|c| c.program == "sudo" || c.program == "brew"));
    }

    #[test]
    fn linux_runs_its_prerequisite_set() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_wheel(&tmp);
        let runner = FreezeRunner::new(Some("swingmusic"));
        let config = load_config(None).unwrap().binaries;

        build_binary(
            &runner,
            &config,
            LINUX_AMD64,
            tmp.path(),
            &tmp.path().join("work"),
            &store,
        )
        .unwrap();

        let log = runner.log.lock().unwrap();
        assert!(log.iter().any(|c| c.program == "sudo"));
    }

    #[test]
    fn install_is_fed_the_local_wheel_path() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_wheel(&tmp);
        let runner = FreezeRunner::new(Some("swingmusic"));
        let config = load_config(None).unwrap().binaries;

        build_binary(
            &runner,
            &config,
            LINUX_AMD64,
            tmp.path(),
            &tmp.path().join("work"),
            &store,
        )
        .unwrap();

        let log = runner.log.lock().unwrap();
        let install = log
            .iter()
            .find(|c| c.program == "python")
            .expect("pip install ran");
        assert!(install
            .args
            .last()
            .unwrap()
            .ends_with("swingmusic-2.0.0-py3-none-any.whl"));
    }

    #[test]
    fn missing_freeze_output_is_a_hard_failure() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_wheel(&tmp);
        let runner = FreezeRunner::new(None);
        let config = load_config(None).unwrap().binaries;

        let err = build_binary(
            &runner,
            &config,
            LINUX_AMD64,
            tmp.path(),
            &tmp.path().join("work"),
            &store,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("no executable"));
        assert!(store.get("linux-amd64").unwrap().is_none());
    }

    #[test]
    fn missing_wheel_artifact_fails_before_any_freeze() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(&tmp.path().join("run")).unwrap();
        let runner = FreezeRunner::new(Some("swingmusic"));
        let mut config = load_config(None).unwrap().binaries;
        config.prerequisites_linux.clear();

        let err = build_binary(
            &runner,
            &config,
            LINUX_AMD64,
            tmp.path(),
            &tmp.path().join("work"),
            &store,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("wheel artifact"));
        assert!(runner.log.lock().unwrap().is_empty());
    }
}
