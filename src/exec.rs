//! External command execution.
//!
//! Every collaborator (client build, wheel build, freeze tool, release CLI,
//! container builder) is reached through [`CommandRunner`], so jobs stay a
//! pure function of their inputs and tests can script outcomes without
//! touching the host.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// One external command invocation: program, arguments, working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Build from a configured argv array (`["npm", "run", "build"]`).
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .context("command must have at least a program name")?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: None,
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Result of running a command to completion.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Seam through which all external commands run.
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing output; a non-zero exit is not an error
    /// at this level.
    fn run_captured(&self, cmd: &CommandLine) -> Result<ExecOutput>;

    /// Run to completion and fail on non-zero exit.
    fn run(&self, cmd: &CommandLine) -> Result<()> {
        let output = self.run_captured(cmd)?;
        if !output.success {
            bail!(
                "command failed: {}\n  Exit code: {}\n  stderr: {}",
                cmd,
                output.code.unwrap_or(-1),
                output.stderr.trim()
            );
        }
        Ok(())
    }
}

/// Runner backed by `std::process::Command` on the host.
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run_captured(&self, cmd: &CommandLine) -> Result<ExecOutput> {
        debug!(command = %cmd, cwd = ?cmd.cwd, "running external command");

        let mut process = Command::new(&cmd.program);
        process.args(&cmd.args);
        if let Some(cwd) = &cmd.cwd {
            ensure_dir_exists(cwd)?;
            process.current_dir(cwd);
        }

        let output = process
            .output()
            .with_context(|| format!("failed to execute '{}'", cmd.program))?;

        Ok(ExecOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn ensure_dir_exists(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("working directory does not exist: {}", dir.display());
    }
    Ok(())
}
