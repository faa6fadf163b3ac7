//! Wave scheduler for the release plan.
//!
//! Executes the DAG without polling: each iteration runs every job whose
//! predecessors have succeeded, in parallel, then folds the outcomes back
//! into the plan. Failure never aborts sibling jobs in the same wave; it
//! suppresses dependents on the next iteration. There are no retries — the
//! unit of recovery is a rerun.

use anyhow::{bail, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};

use crate::artifact_store::{ArtifactEntry, ArtifactStore};
use crate::config::PipelineConfig;
use crate::exec::CommandRunner;
use crate::jobs::image::ImageRegistry;
use crate::jobs::release::ReleaseHost;
use crate::jobs::{binary, client, image, release, wheel};
use crate::pipeline::plan::{JobId, JobStatus, ReleasePlan};
use crate::trigger::ReleaseDescriptor;

/// Everything one run needs, threaded explicitly into every job.
pub struct Pipeline<'a> {
    pub descriptor: &'a ReleaseDescriptor,
    pub config: &'a PipelineConfig,
    /// Application source tree (wheel build, freeze spec, Dockerfile, notes).
    pub source_root: &'a Path,
    /// Run namespace directory; work and scratch space live under it.
    pub run_root: &'a Path,
    pub store: &'a ArtifactStore,
    pub runner: &'a dyn CommandRunner,
    pub release_host: &'a dyn ReleaseHost,
    pub registry: &'a dyn ImageRegistry,
}

/// Per-job summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: String,
    pub status: JobStatus,
    pub duration_secs: f64,
    pub error: Option<String>,
}

/// Summary of one run; `success` mirrors the process exit status.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tag: String,
    pub success: bool,
    pub jobs: Vec<JobReport>,
    /// Index entries of every artifact the run stored, newest first.
    pub artifacts: Vec<ArtifactEntry>,
}

impl Pipeline<'_> {
    /// Drive the plan to a settled state and report every job's outcome.
    pub fn execute(&self, plan: &mut ReleasePlan) -> Result<RunReport> {
        let mut errors: HashMap<JobId, String> = HashMap::new();
        let mut durations: HashMap<JobId, f64> = HashMap::new();

        loop {
            plan.propagate_failures();
            let wave = plan.ready();
            if wave.is_empty() {
                break;
            }

            for id in &wave {
                plan.transition(*id, JobStatus::Running)?;
                info!(job = %id, "job started");
            }

            let outcomes: Vec<(JobId, Result<()>, f64)> = wave
                .into_par_iter()
                .map(|id| {
                    let started = Instant::now();
                    let outcome = self.dispatch(id);
                    (id, outcome, started.elapsed().as_secs_f64())
                })
                .collect();

            for (id, outcome, secs) in outcomes {
                durations.insert(id, secs);
                match outcome {
                    Ok(()) => {
                        plan.transition(id, JobStatus::Succeeded)?;
                        info!(job = %id, secs, "job succeeded");
                    }
                    Err(err) => {
                        let message = format!("{err:#}");
                        error!(job = %id, %message, "job failed");
                        errors.insert(id, message);
                        plan.transition(id, JobStatus::Failed)?;
                    }
                }
            }
        }

        if !plan.is_settled() {
            // Can only happen if the plan contains a dependency cycle.
            bail!("pipeline stalled with pending jobs; the plan is not a DAG");
        }

        let jobs = plan
            .jobs()
            .iter()
            .map(|job| JobReport {
                job: job.id.to_string(),
                status: job.status,
                duration_secs: durations.get(&job.id).copied().unwrap_or(0.0),
                error: errors.get(&job.id).cloned(),
            })
            .collect();

        Ok(RunReport {
            tag: self.descriptor.tag.clone(),
            success: plan.overall_success(),
            jobs,
            artifacts: self.store.entries()?,
        })
    }

    fn dispatch(&self, id: JobId) -> Result<()> {
        match id {
            JobId::Client => client::build_client(
                self.runner,
                &self.config.client,
                &self.work_dir("client"),
                self.store,
            ),
            JobId::Wheel => wheel::build_wheel(
                self.runner,
                &self.config.wheel,
                self.source_root,
                self.store,
            ),
            JobId::Binary(target) => binary::build_binary(
                self.runner,
                &self.config.binaries,
                target,
                self.source_root,
                &self.work_dir(&format!("binary-{}", target.artifact_key())),
                self.store,
            ),
            JobId::PublishRelease => release::publish_release(
                self.release_host,
                &self.config.release,
                self.descriptor,
                self.store,
                self.source_root,
                &self.work_dir("release-assets"),
            ),
            JobId::PublishImage => image::publish_image(
                self.registry,
                &self.config.image,
                self.descriptor,
                self.source_root,
            ),
        }
    }

    fn work_dir(&self, name: &str) -> PathBuf {
        self.run_root.join("work").join(name)
    }
}

/// Render the report as the end-of-run status table.
pub fn format_report(report: &RunReport) -> String {
    let mut out = format!("release {}:\n", report.tag);
    for job in &report.jobs {
        let status = match job.status {
            JobStatus::Succeeded => "succeeded".to_string(),
            JobStatus::Failed => "FAILED".to_string(),
            JobStatus::Skipped(reason) => format!("skipped ({reason:?})"),
            other => format!("{other:?}"),
        };
        out.push_str(&format!("  {:<22} {}\n", job.job, status));
        if let Some(err) = &job.error {
            out.push_str(&format!("      {}\n", err.lines().next().unwrap_or("")));
        }
    }
    if !report.artifacts.is_empty() {
        out.push_str("artifacts:\n");
        for entry in &report.artifacts {
            out.push_str(&format!(
                "  {:<14} {:>10} bytes  {}\n",
                entry.key,
                entry.size_bytes,
                entry.file_name.as_deref().unwrap_or("(archive)")
            ));
        }
    }
    out.push_str(if report.success {
        "result: success\n"
    } else {
        "result: FAILURE\n"
    });
    out
}

/// Ensure the work area for a run exists.
pub fn prepare_run_dirs(run_root: &Path) -> Result<()> {
    fs::create_dir_all(run_root.join("work"))?;
    Ok(())
}
