//! Pipeline jobs.
//!
//! Each job is a free function over explicit inputs (descriptor fields,
//! config section, work directory, store) plus the collaborator seams it
//! drives. Nothing here reads ambient state; everything a job does is a
//! function of its arguments.

pub mod binary;
pub mod client;
pub mod image;
pub mod release;
pub mod wheel;

/// Store key for the client bundle artifact.
pub const CLIENT_KEY: &str = "client";

/// Store key for the wheel artifact.
pub const WHEELS_KEY: &str = "wheels";
