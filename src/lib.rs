//! Release-build orchestration pipeline for Swing Music.
//!
//! Given a version tag and four boolean toggles, this crate builds the web
//! client bundle, the platform-independent wheel, and one standalone
//! executable per supported (OS family, architecture) pair, then publishes
//! the aggregated artifacts to a release host and a container registry. The
//! application itself is an external collaborator reached through opaque
//! build/install commands.
//!
//! - **Trigger validation** - Tag and flag normalization into an immutable run descriptor
//! - **Release plan** - Explicit DAG with per-node gates and dependency edges
//! - **Wave scheduler** - Parallel fan-out over ready jobs, fail-closed sinks
//! - **Artifact store** - Run-scoped, write-once keyed hand-off between jobs
//! - **Preflight checks** - Host tool validation before any job starts
//!
//! # Architecture
//!
//! ```text
//! trigger ──► ReleaseDescriptor
//!                  │
//!         ┌────────┴────────┐
//!         ▼                 ▼
//!      client             wheel
//!         │                 │
//!         │          binary matrix
//!         │        (os × arch, gated)
//!         │                 │
//!         └──► artifact store ◄──┘
//!                  │
//!         ┌────────┴────────┐
//!         ▼                 ▼
//!   publish-release   publish-image (gated)
//! ```
//!
//! The two sinks are independent: neither blocks the other, and only the
//! explicit dependency edges order anything.

pub mod artifact_store;
pub mod config;
pub mod exec;
pub mod jobs;
pub mod pipeline;
pub mod platform;
pub mod preflight;
pub mod trigger;

pub use pipeline::{Pipeline, ReleasePlan, RunReport};
pub use platform::{PlatformTarget, SUPPORTED_TARGETS};
pub use trigger::{ReleaseDescriptor, TriggerConfig};
