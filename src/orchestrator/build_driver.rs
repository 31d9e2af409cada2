//! Change-aware image builds.
//!
//! An image is rebuilt only when it is absent or some file in its build
//! context was modified after the image was created. Images are processed one
//! at a time in declared order; the first failed build aborts the run.

use crate::error::BuildError;
use crate::hardware::PlatformTag;
use crate::models::{ImageDescriptor, RebuildDecision};
use crate::system::{run_command, run_streaming};
use async_trait::async_trait;
use chrono::DateTime;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Newest modification time of any file under `dir`.
///
/// Directories themselves are ignored and unreadable entries are skipped.
/// An empty or missing directory yields `UNIX_EPOCH`.
pub fn newest_mtime(dir: &Path) -> SystemTime {
    let mut newest = UNIX_EPOCH;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("[Build] Skipping unreadable {}: {}", current.display(), e);
                continue;
            }
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(entry.path());
                continue;
            }
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                if modified > newest {
                    newest = modified;
                }
            }
        }
    }

    newest
}

/// Compare the newest source time against the image creation time.
///
/// `image_created` is `None` when the image does not exist.
pub fn decide(newest_source: SystemTime, image_created: Option<SystemTime>) -> RebuildDecision {
    match image_created {
        None => RebuildDecision::Absent,
        Some(image_created) if newest_source > image_created => RebuildDecision::Stale {
            newest_source,
            image_created,
        },
        Some(image_created) => RebuildDecision::Fresh {
            newest_source,
            image_created,
        },
    }
}

/// Parse the RFC 3339 `Created` field reported by the image store.
pub fn parse_created(raw: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| SystemTime::from(dt.with_timezone(&chrono::Utc)))
}

/// Image store the driver queries and builds into.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Creation time of `reference`.
    ///
    /// `Ok(None)` means the image does not exist. A present image whose
    /// timestamp cannot be read should report `UNIX_EPOCH`.
    async fn created_at(&self, reference: &str) -> Result<Option<SystemTime>, BuildError>;

    async fn build(
        &self,
        image: &ImageDescriptor,
        platform: PlatformTag,
        no_cache: bool,
    ) -> Result<(), BuildError>;
}

/// Docker CLI image store
#[derive(Debug, Clone)]
pub struct DockerImageStore {
    inspect_timeout: Duration,
    build_timeout: Duration,
}

impl DockerImageStore {
    pub fn new(inspect_timeout: Duration, build_timeout: Duration) -> Self {
        DockerImageStore {
            inspect_timeout,
            build_timeout,
        }
    }

    /// Arguments for `docker build`.
    pub fn build_args(image: &ImageDescriptor, platform: PlatformTag, no_cache: bool) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--platform".to_string(),
            platform.as_str().to_string(),
            "-t".to_string(),
            image.reference(),
            "-f".to_string(),
            image.dockerfile_path().to_string_lossy().to_string(),
        ];
        for (key, value) in &image.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }
        if no_cache {
            args.push("--no-cache".to_string());
        }
        args.push(image.context.to_string_lossy().to_string());
        args
    }
}

#[async_trait]
impl ImageStore for DockerImageStore {
    async fn created_at(&self, reference: &str) -> Result<Option<SystemTime>, BuildError> {
        let output = run_command(
            "docker",
            &["image", "inspect", "--format", "{{.Created}}", reference],
            None,
            self.inspect_timeout,
        )
        .await
        .map_err(|e| BuildError::PrerequisiteMissing(format!("docker: {}", e)))?;

        if !output.success() {
            // docker exits 1 with "No such image" when absent
            return Ok(None);
        }
        match parse_created(output.text()) {
            Some(created) => Ok(Some(created)),
            None => {
                log::warn!(
                    "[Build] Unreadable creation time '{}' for {}, treating as stale",
                    output.text(),
                    reference
                );
                Ok(Some(UNIX_EPOCH))
            }
        }
    }

    async fn build(
        &self,
        image: &ImageDescriptor,
        platform: PlatformTag,
        no_cache: bool,
    ) -> Result<(), BuildError> {
        let args = Self::build_args(image, platform, no_cache);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let code = run_streaming("docker", &arg_refs, None, self.build_timeout)
            .await
            .map_err(|e| BuildError::ImageBuildFailed {
                image: image.reference(),
                reason: e.to_string(),
            })?;
        if code != 0 {
            return Err(BuildError::ImageBuildFailed {
                image: image.reference(),
                reason: format!("docker build exited with {}", code),
            });
        }
        Ok(())
    }
}

/// Outcome of one `ensure_image` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub reference: String,
    pub decision: RebuildDecision,
    pub built: bool,
    pub elapsed: Duration,
}

/// Drives change-aware builds against an [`ImageStore`]
pub struct BuildDriver<S: ImageStore> {
    store: S,
    platform: PlatformTag,
    no_cache: bool,
}

impl<S: ImageStore> BuildDriver<S> {
    pub fn new(store: S, platform: PlatformTag) -> Self {
        BuildDriver {
            store,
            platform,
            no_cache: false,
        }
    }

    /// Ignore timestamps and rebuild every image.
    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Rebuild decision for one image without building.
    pub async fn evaluate(&self, image: &ImageDescriptor) -> Result<RebuildDecision, BuildError> {
        if self.no_cache {
            return Ok(RebuildDecision::Forced);
        }
        let newest_source = newest_mtime(&image.context);
        let created = match self.store.created_at(&image.reference()).await {
            Ok(created) => created,
            Err(e) => {
                log::warn!(
                    "[Build] Cannot read creation time of {}: {}, assuming stale",
                    image.reference(),
                    e
                );
                Some(UNIX_EPOCH)
            }
        };
        Ok(decide(newest_source, created))
    }

    /// Build `image` if its decision requires it.
    pub async fn ensure_image(&self, image: &ImageDescriptor) -> Result<BuildReport, BuildError> {
        let start = Instant::now();
        let reference = image.reference();

        if !image.context.is_dir() {
            return Err(BuildError::ContextUnreadable(image.context.display().to_string()));
        }
        let dockerfile = image.dockerfile_path();
        if !dockerfile.is_file() {
            return Err(BuildError::DockerfileMissing(dockerfile.display().to_string()));
        }

        let decision = self.evaluate(image).await?;
        if !decision.needs_rebuild() {
            log::info!("[Build] {} is up to date ({}), skipping", reference, decision.describe());
            return Ok(BuildReport {
                reference,
                decision,
                built: false,
                elapsed: start.elapsed(),
            });
        }

        log::info!(
            "[Build] Building {} for {} ({})",
            reference,
            self.platform,
            decision.describe()
        );
        self.store.build(image, self.platform, self.no_cache).await?;
        let elapsed = start.elapsed();
        crate::log_success!("[Build] {} built in {:.1}s", reference, elapsed.as_secs_f64());

        Ok(BuildReport {
            reference,
            decision,
            built: true,
            elapsed,
        })
    }

    /// Ensure every image in order, stopping at the first failure.
    pub async fn ensure_all(&self, images: &[ImageDescriptor]) -> Result<Vec<BuildReport>, BuildError> {
        let mut reports = Vec::with_capacity(images.len());
        for image in images {
            reports.push(self.ensure_image(image).await?);
        }
        let built = reports.iter().filter(|r| r.built).count();
        log::info!(
            "[Build] {} image(s) built, {} cached",
            built,
            reports.len() - built
        );
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_empty_context_is_epoch() {
        let temp = tempfile::tempdir().unwrap();
        assert_eq!(newest_mtime(temp.path()), UNIX_EPOCH);
        assert_eq!(newest_mtime(&temp.path().join("missing")), UNIX_EPOCH);
    }

    #[test]
    fn test_newest_mtime_descends_into_subdirs() {
        let temp = tempfile::tempdir().unwrap();
        let nested = temp.path().join("src").join("deep");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("main.c"), "int main(){}").unwrap();

        let found = newest_mtime(temp.path());
        let expected = fs::metadata(nested.join("main.c")).unwrap().modified().unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_decide_cases() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1_000);
        let t1 = UNIX_EPOCH + Duration::from_secs(2_000);
        assert_eq!(decide(t0, None), RebuildDecision::Absent);
        assert!(matches!(decide(t1, Some(t0)), RebuildDecision::Stale { .. }));
        assert!(matches!(decide(t0, Some(t1)), RebuildDecision::Fresh { .. }));
        // Equal timestamps are a cache hit
        assert!(!decide(t0, Some(t0)).needs_rebuild());
    }

    #[test]
    fn test_parse_created() {
        let parsed = parse_created("2024-03-01T12:00:00.123456789Z\n").unwrap();
        let secs = parsed.duration_since(UNIX_EPOCH).unwrap().as_secs();
        assert_eq!(secs, 1_709_294_400);
        assert!(parse_created("yesterday").is_none());
    }

    #[test]
    fn test_build_args() {
        let mut image = ImageDescriptor::new("edge-terrarium-logthon", "apps/logthon");
        image.build_args.insert("VERSION".to_string(), "1.2".to_string());
        let args = DockerImageStore::build_args(&image, PlatformTag::LinuxArm64, true);
        assert_eq!(&args[..3], &["build", "--platform", "linux/arm64"]);
        assert!(args.contains(&"edge-terrarium-logthon:latest".to_string()));
        assert!(args.contains(&"VERSION=1.2".to_string()));
        assert!(args.contains(&"--no-cache".to_string()));
        assert_eq!(args.last().unwrap(), "apps/logthon");
    }
}
