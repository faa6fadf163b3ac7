pub mod plan;
pub mod run;

pub use plan::{JobId, JobStatus, ReleasePlan, SkipReason};
pub use run::{format_report, prepare_run_dirs, Pipeline, RunReport};
