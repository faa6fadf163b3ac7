//! Preflight checks for release runs.
//!
//! Validates that the host has the tools the active flag set will invoke
//! before any job starts. This prevents cryptic mid-pipeline errors and
//! keeps the "invalid input aborts before side effects" guarantee.

use anyhow::{bail, Result};
use std::collections::BTreeSet;

use crate::config::PipelineConfig;
use crate::trigger::ReleaseDescriptor;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Programs the given run will invoke on this host.
///
/// Matrix prerequisite commands are excluded: they run inside the per-target
/// build environments, not on the orchestrating host.
pub fn required_programs(desc: &ReleaseDescriptor, config: &PipelineConfig) -> Vec<String> {
    let mut programs = BTreeSet::new();
    programs.insert("git".to_string());

    for cmd in config.client.install.iter().chain(&config.client.build) {
        if let Some(program) = cmd.first() {
            programs.insert(program.clone());
        }
    }
    if let Some(program) = config.wheel.build.first() {
        programs.insert(program.clone());
    }
    if desc.build_binaries {
        for cmd in [&config.binaries.install, &config.binaries.freeze] {
            if let Some(program) = cmd.first() {
                programs.insert(program.clone());
            }
        }
    }
    // The release host is always reached; the registry only when requested.
    programs.insert("gh".to_string());
    if desc.build_docker {
        programs.insert("docker".to_string());
    }

    programs.into_iter().collect()
}

/// Check that every program the run needs is available.
pub fn check_host_tools(desc: &ReleaseDescriptor, config: &PipelineConfig) -> Result<()> {
    let missing: Vec<String> = required_programs(desc, config)
        .into_iter()
        .filter(|program| !command_exists(program))
        .collect();

    if !missing.is_empty() {
        bail!(
            "missing required host tools:\n{}",
            missing
                .iter()
                .map(|p| format!("  {p}"))
                .collect::<Vec<_>>()
                .join("\n")
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use crate::trigger::TriggerConfig;

    fn descriptor(build_binaries: bool, build_docker: bool) -> ReleaseDescriptor {
        TriggerConfig {
            tag: "v1.0.0".to_string(),
            build_binaries,
            is_latest: false,
            is_draft: false,
            build_docker,
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn docker_required_only_when_image_requested() {
        let config = load_config(None).unwrap();

        let with = required_programs(&descriptor(false, true), &config);
        assert!(with.contains(&"docker".to_string()));

        let without = required_programs(&descriptor(false, false), &config);
        assert!(!without.contains(&"docker".to_string()));
    }

    #[test]
    fn binary_tools_required_only_with_binaries_flag() {
        let config = load_config(None).unwrap();

        let with = required_programs(&descriptor(true, false), &config);
        assert!(with.contains(&"python".to_string()));

        let without = required_programs(&descriptor(false, false), &config);
        assert!(!without.contains(&"python".to_string()));
    }

    #[test]
    fn git_and_gh_are_always_required() {
        let config = load_config(None).unwrap();
        let programs = required_programs(&descriptor(false, false), &config);
        assert!(programs.contains(&"git".to_string()));
        assert!(programs.contains(&"gh".to_string()));
    }

    #[test]
    fn command_exists_finds_a_shell() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }
}
