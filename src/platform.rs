//! Supported release platforms and the binary naming policy.
//!
//! The (OS family, architecture) matrix and the exact file name each
//! standalone executable must carry are fixed data, kept apart from the
//! job-execution logic so the mapping can be tested without invoking any
//! build tool.

use serde::Serialize;
use std::fmt;

/// Operating system family of a release target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Macos,
    Windows,
}

impl OsFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Linux => "linux",
            OsFamily::Macos => "macos",
            OsFamily::Windows => "windows",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture of a release target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of the standalone-binary build matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PlatformTarget {
    pub os: OsFamily,
    pub arch: Arch,
}

/// Every (OS family, architecture) pair a release builds binaries for.
pub const SUPPORTED_TARGETS: [PlatformTarget; 6] = [
    PlatformTarget {
        os: OsFamily::Linux,
        arch: Arch::Amd64,
    },
    PlatformTarget {
        os: OsFamily::Linux,
        arch: Arch::Arm64,
    },
    PlatformTarget {
        os: OsFamily::Macos,
        arch: Arch::Amd64,
    },
    PlatformTarget {
        os: OsFamily::Macos,
        arch: Arch::Arm64,
    },
    PlatformTarget {
        os: OsFamily::Windows,
        arch: Arch::Amd64,
    },
    PlatformTarget {
        os: OsFamily::Windows,
        arch: Arch::Arm64,
    },
];

impl PlatformTarget {
    /// Published file name for this target's standalone executable.
    ///
    /// These names are part of the release contract; download links and
    /// update checks depend on them byte-for-byte.
    pub fn binary_file_name(&self) -> &'static str {
        match (self.os, self.arch) {
            (OsFamily::Linux, Arch::Amd64) => "swingmusic_linux_amd64",
            (OsFamily::Linux, Arch::Arm64) => "swingmusic_linux_arm64",
            (OsFamily::Macos, Arch::Amd64) => "swingmusic_macos_amd64",
            (OsFamily::Macos, Arch::Arm64) => "swingmusic_macos_arm64",
            (OsFamily::Windows, Arch::Amd64) => "swingmusic.exe",
            (OsFamily::Windows, Arch::Arm64) => "swingmusic_arm64.exe",
        }
    }

    /// Artifact store key for this target, `<os>-<arch>`.
    ///
    /// Matrix instances write disjoint keys, so parallel uploads never race.
    pub fn artifact_key(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn naming_table_is_exact() {
        let expected = [
            (OsFamily::Linux, Arch::Amd64, "swingmusic_linux_amd64"),
            (OsFamily::Linux, Arch::Arm64, "swingmusic_linux_arm64"),
            (OsFamily::Macos, Arch::Amd64, "swingmusic_macos_amd64"),
            (OsFamily::Macos, Arch::Arm64, "swingmusic_macos_arm64"),
            (OsFamily::Windows, Arch::Amd64, "swingmusic.exe"),
            (OsFamily::Windows, Arch::Arm64, "swingmusic_arm64.exe"),
        ];
        for (os, arch, name) in expected {
            let target = PlatformTarget { os, arch };
            assert_eq!(target.binary_file_name(), name);
        }
    }

    #[test]
    fn matrix_covers_every_pair_once() {
        assert_eq!(SUPPORTED_TARGETS.len(), 6);
        let keys: BTreeSet<String> = SUPPORTED_TARGETS
            .iter()
            .map(|t| t.artifact_key())
            .collect();
        assert_eq!(keys.len(), 6, "artifact keys must be disjoint");
    }

    #[test]
    fn only_windows_names_carry_an_extension() {
        for target in SUPPORTED_TARGETS {
            let has_exe = target.binary_file_name().ends_with(".exe");
            assert_eq!(has_exe, target.os == OsFamily::Windows);
        }
    }

    #[test]
    fn artifact_keys_are_lowercase_os_dash_arch() {
        let target = PlatformTarget {
            os: OsFamily::Macos,
            arch: Arch::Arm64,
        };
        assert_eq!(target.artifact_key(), "macos-arm64");
    }
}
