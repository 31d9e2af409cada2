//! CPU architecture detection and image platform mapping.

use std::fmt;

/// Container image platform passed to `docker build --platform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformTag {
    LinuxAmd64,
    LinuxArm64,
}

impl PlatformTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformTag::LinuxAmd64 => "linux/amd64",
            PlatformTag::LinuxArm64 => "linux/arm64",
        }
    }
}

impl Default for PlatformTag {
    fn default() -> Self {
        PlatformTag::LinuxAmd64
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a machine identifier (`uname -m` style) to a platform tag.
///
/// Unknown architectures fall back to `linux/amd64` and log a warning.
pub fn resolve_platform(machine: &str) -> PlatformTag {
    match machine.trim().to_lowercase().as_str() {
        "x86_64" | "amd64" => PlatformTag::LinuxAmd64,
        "arm64" | "aarch64" => PlatformTag::LinuxArm64,
        other => {
            log::warn!(
                "[Build] Unknown architecture '{}', defaulting to {}",
                other,
                PlatformTag::default()
            );
            PlatformTag::default()
        }
    }
}

/// Read the host machine identifier.
///
/// `uname -m` is preferred so that emulated shells report what the kernel sees;
/// the compile-time architecture is the fallback.
pub fn detect_machine_arch() -> String {
    std::process::Command::new("uname")
        .arg("-m")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| std::env::consts::ARCH.to_string())
}
