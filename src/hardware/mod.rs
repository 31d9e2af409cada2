//! Host detection public API module.
//!
//! The only host fact the deployment driver needs is the CPU architecture,
//! which selects the platform images are built for.

pub mod cpu;

pub use cpu::{detect_machine_arch, resolve_platform, PlatformTag};

/// Host detector with the detected platform cached after first use.
///
/// ```ignore
/// let mut detector = HostDetector::new();
/// println!("Building for {}", detector.platform());
/// ```
#[derive(Debug, Default)]
pub struct HostDetector {
    cached_platform: Option<PlatformTag>,
}

impl HostDetector {
    pub fn new() -> Self {
        HostDetector::default()
    }

    /// Pin the platform instead of detecting it.
    pub fn with_platform(platform: PlatformTag) -> Self {
        HostDetector {
            cached_platform: Some(platform),
        }
    }

    /// Platform for image builds on this host.
    pub fn platform(&mut self) -> PlatformTag {
        if let Some(platform) = self.cached_platform {
            return platform;
        }
        let machine = detect_machine_arch();
        let platform = resolve_platform(&machine);
        log::debug!("[Hardware] Host architecture '{}' -> {}", machine, platform);
        self.cached_platform = Some(platform);
        platform
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_platform_is_returned() {
        let mut detector = HostDetector::with_platform(PlatformTag::LinuxArm64);
        assert_eq!(detector.platform(), PlatformTag::LinuxArm64);
    }

    #[test]
    fn test_platform_is_cached() {
        let mut detector = HostDetector::new();
        let first = detector.platform();
        assert_eq!(detector.cached_platform, Some(first));
        assert_eq!(detector.platform(), first);
    }
}
