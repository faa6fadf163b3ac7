//! Release trigger validation.
//!
//! The raw trigger input (a tag string plus four toggles) is normalized
//! exactly once, before any job starts. Everything downstream consumes the
//! resulting [`ReleaseDescriptor`] by reference; no job reads ambient state
//! to decide what to do.

use anyhow::{bail, Result};
use serde::Serialize;

/// Raw release request as it arrives from the trigger surface.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub tag: String,
    pub build_binaries: bool,
    pub is_latest: bool,
    pub is_draft: bool,
    pub build_docker: bool,
}

/// Validated, immutable description of one release run.
///
/// Constructed only through [`TriggerConfig::validate`]; a malformed tag
/// aborts the run here, with no partial side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseDescriptor {
    pub tag: String,
    pub build_binaries: bool,
    pub is_latest: bool,
    pub is_draft: bool,
    pub build_docker: bool,
}

impl TriggerConfig {
    /// Validate the trigger into a descriptor, rejecting malformed tags.
    pub fn validate(self) -> Result<ReleaseDescriptor> {
        let tag = validate_tag(&self.tag)?;
        Ok(ReleaseDescriptor {
            tag,
            build_binaries: self.build_binaries,
            is_latest: self.is_latest,
            is_draft: self.is_draft,
            build_docker: self.build_docker,
        })
    }
}

/// Normalize and validate a release tag.
///
/// The tag is spliced into file names, git refs and image references, so the
/// accepted charset is the intersection of what all three allow.
fn validate_tag(raw: &str) -> Result<String> {
    let tag = raw.trim();
    if tag.is_empty() {
        bail!("release tag must not be empty");
    }
    for c in tag.chars() {
        if !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
            bail!("release tag '{tag}' contains invalid character '{c}' (allowed: [A-Za-z0-9._-])");
        }
    }
    Ok(tag.to_string())
}
