//! Release plan: an explicit DAG built once per run from the descriptor.
//!
//! Each node carries its dependency edges and an initial status; a gating
//! flag that is off puts the node into the plan pre-skipped, with no edges
//! pointing at it from downstream sinks. Dependencies are structural data,
//! not name matching, so nothing can silently depend on a job that was
//! never planned.

use anyhow::{bail, Result};
use serde::Serialize;
use std::fmt;

use crate::platform::{PlatformTarget, SUPPORTED_TARGETS};
use crate::trigger::ReleaseDescriptor;

/// Identity of one pipeline job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobId {
    /// Build the web client bundle.
    Client,
    /// Build the platform-independent wheel.
    Wheel,
    /// Build one standalone executable (matrix instance).
    Binary(PlatformTarget),
    /// Aggregate artifacts and upsert the tagged release.
    PublishRelease,
    /// Build and push the multi-arch container image.
    PublishImage,
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobId::Client => f.write_str("client"),
            JobId::Wheel => f.write_str("wheel"),
            JobId::Binary(target) => write!(f, "binary:{target}"),
            JobId::PublishRelease => f.write_str("publish-release"),
            JobId::PublishImage => f.write_str("publish-image"),
        }
    }
}

/// Why a job was skipped. Only upstream failure makes the run fail overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A gating flag in the descriptor is off; skipping is the requested
    /// behavior.
    GateOff,
    /// A required predecessor did not reach Succeeded.
    UpstreamFailed,
}

/// Job lifecycle. Transitions are monotonic:
/// Pending → Running → {Succeeded, Failed}, or Pending → Skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped(SkipReason),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// One node of the plan.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub id: JobId,
    /// Predecessors that must reach Succeeded before this job runs.
    pub needs: Vec<JobId>,
    pub status: JobStatus,
}

/// The full DAG for one run.
#[derive(Debug, Clone)]
pub struct ReleasePlan {
    jobs: Vec<PlannedJob>,
}

impl ReleasePlan {
    /// Build the plan for a descriptor.
    ///
    /// Gated-off jobs are planned as Skipped(GateOff) with no edges into the
    /// sinks, so a deliberately skipped matrix never blocks publishing.
    pub fn for_descriptor(desc: &ReleaseDescriptor) -> Self {
        let mut jobs = vec![
            PlannedJob {
                id: JobId::Client,
                needs: vec![],
                status: JobStatus::Pending,
            },
            PlannedJob {
                id: JobId::Wheel,
                needs: vec![],
                status: JobStatus::Pending,
            },
        ];

        let mut release_needs = vec![JobId::Client, JobId::Wheel];

        for target in SUPPORTED_TARGETS {
            let id = JobId::Binary(target);
            if desc.build_binaries {
                jobs.push(PlannedJob {
                    id,
                    needs: vec![JobId::Wheel],
                    status: JobStatus::Pending,
                });
                release_needs.push(id);
            } else {
                jobs.push(PlannedJob {
                    id,
                    needs: vec![],
                    status: JobStatus::Skipped(SkipReason::GateOff),
                });
            }
        }

        jobs.push(PlannedJob {
            id: JobId::PublishRelease,
            needs: release_needs,
            status: JobStatus::Pending,
        });

        jobs.push(PlannedJob {
            id: JobId::PublishImage,
            needs: vec![],
            status: if desc.build_docker {
                JobStatus::Pending
            } else {
                JobStatus::Skipped(SkipReason::GateOff)
            },
        });

        Self { jobs }
    }

    pub fn jobs(&self) -> &[PlannedJob] {
        &self.jobs
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.iter().find(|j| j.id == id).map(|j| j.status)
    }

    /// Apply a monotonic status transition.
    pub fn transition(&mut self, id: JobId, to: JobStatus) -> Result<()> {
        let job = match self.jobs.iter_mut().find(|j| j.id == id) {
            Some(job) => job,
            None => bail!("unknown job '{id}'"),
        };
        let valid = matches!(
            (job.status, to),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Skipped(_))
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        );
        if !valid {
            bail!(
                "invalid status transition for '{}': {:?} -> {:?}",
                id,
                job.status,
                to
            );
        }
        job.status = to;
        Ok(())
    }

    /// Mark Pending jobs whose predecessors failed (or were themselves
    /// skipped by a failure) as Skipped(UpstreamFailed). Repeats until the
    /// propagation reaches a fixed point.
    pub fn propagate_failures(&mut self) {
        loop {
            let mut blocked = vec![];
            for job in &self.jobs {
                if job.status != JobStatus::Pending {
                    continue;
                }
                let upstream_failed = job.needs.iter().any(|need| {
                    matches!(
                        self.status(*need),
                        Some(JobStatus::Failed)
                            | Some(JobStatus::Skipped(SkipReason::UpstreamFailed))
                    )
                });
                if upstream_failed {
                    blocked.push(job.id);
                }
            }
            if blocked.is_empty() {
                return;
            }
            for id in blocked {
                // Pending → Skipped is always a valid transition.
                let _ = self.transition(id, JobStatus::Skipped(SkipReason::UpstreamFailed));
            }
        }
    }

    /// Pending jobs whose predecessors have all Succeeded.
    pub fn ready(&self) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|job| {
                job.status == JobStatus::Pending
                    && job
                        .needs
                        .iter()
                        .all(|need| self.status(*need) == Some(JobStatus::Succeeded))
            })
            .map(|job| job.id)
            .collect()
    }

    /// True once no job can make further progress.
    pub fn is_settled(&self) -> bool {
        self.jobs.iter().all(|job| job.status.is_terminal())
    }

    /// A run succeeds iff nothing failed and nothing was suppressed by a
    /// failure. Gate-off skips are requested behavior, not degradation.
    pub fn overall_success(&self) -> bool {
        self.jobs.iter().all(|job| {
            matches!(
                job.status,
                JobStatus::Succeeded | JobStatus::Skipped(SkipReason::GateOff)
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn full_plan_has_ten_jobs() {
        let plan = ReleasePlan::for_descriptor(&descriptor(true, true));
        // client + wheel + 6 binaries + 2 sinks
        assert_eq!(plan.jobs().len(), 10);
        assert!(plan.jobs().iter().all(|j| j.status == JobStatus::Pending));
    }

    #[test]
    fn binaries_gate_off_preskips_matrix_without_blocking_release() {
        let plan = ReleasePlan::for_descriptor(&descriptor(false, false));

        for job in plan.jobs() {
            if let JobId::Binary(_) = job.id {
                assert_eq!(job.status, JobStatus::Skipped(SkipReason::GateOff));
            }
        }

        let release = plan
            .jobs()
            .iter()
            .find(|j| j.id == JobId::PublishRelease)
            .unwrap();
        assert_eq!(release.needs, vec![JobId::Client, JobId::Wheel]);
    }

    #[test]
    fn docker_gate_off_preskips_image_sink() {
        let plan = ReleasePlan::for_descriptor(&descriptor(true, false));
        assert_eq!(
            plan.status(JobId::PublishImage),
            Some(JobStatus::Skipped(SkipReason::GateOff))
        );
    }

    #[test]
    fn image_sink_is_independent_of_binaries_and_release() {
        let plan = ReleasePlan::for_descriptor(&descriptor(true, true));
        let image = plan
            .jobs()
            .iter()
            .find(|j| j.id == JobId::PublishImage)
            .unwrap();
        assert!(image.needs.is_empty());
    }

    #[test]
    fn ready_respects_edges() {
        let mut plan = ReleasePlan::for_descriptor(&descriptor(true, false));
        let ready = plan.ready();
        assert!(ready.contains(&JobId::Client));
        assert!(ready.contains(&JobId::Wheel));
        assert!(!ready.iter().any(|id| matches!(id, JobId::Binary(_))));

        plan.transition(JobId::Wheel, JobStatus::Running).unwrap();
        plan.transition(JobId::Wheel, JobStatus::Succeeded).unwrap();
        let ready = plan.ready();
        assert_eq!(
            ready
                .iter()
                .filter(|id| matches!(id, JobId::Binary(_)))
                .count(),
            6
        );
    }

    #[test]
    fn failure_propagates_to_dependents_only() {
        let mut plan = ReleasePlan::for_descriptor(&descriptor(true, true));
        plan.transition(JobId::Wheel, JobStatus::Running).unwrap();
        plan.transition(JobId::Wheel, JobStatus::Failed).unwrap();
        plan.propagate_failures();

        // Binaries and the release sink are suppressed...
        for job in plan.jobs() {
            match job.id {
                JobId::Binary(_) | JobId::PublishRelease => assert_eq!(
                    job.status,
                    JobStatus::Skipped(SkipReason::UpstreamFailed)
                ),
                // ...while the independent image sink and the client stay runnable.
                JobId::Client | JobId::PublishImage => {
                    assert_eq!(job.status, JobStatus::Pending)
                }
                JobId::Wheel => assert_eq!(job.status, JobStatus::Failed),
            }
        }
        assert!(!plan.overall_success());
    }

    #[test]
    fn monotonic_transitions_are_enforced() {
        let mut plan = ReleasePlan::for_descriptor(&descriptor(false, false));
        plan.transition(JobId::Client, JobStatus::Running).unwrap();
        plan.transition(JobId::Client, JobStatus::Succeeded).unwrap();
        assert!(plan.transition(JobId::Client, JobStatus::Running).is_err());
        assert!(plan.transition(JobId::Client, JobStatus::Failed).is_err());
    }

    #[test]
    fn gate_off_skips_do_not_fail_the_run() {
        let mut plan = ReleasePlan::for_descriptor(&descriptor(false, false));
        // Run everything runnable to success, wave by wave.
        loop {
            let ready = plan.ready();
            if ready.is_empty() {
                break;
            }
            for id in ready {
                plan.transition(id, JobStatus::Running).unwrap();
                plan.transition(id, JobStatus::Succeeded).unwrap();
            }
        }
        assert!(plan.is_settled());
        assert!(plan.overall_success());
    }
}
