/// Project path registry
///
/// All filesystem locations the deployment driver touches are resolved here,
/// relative to a project root. The root is found by walking upward from the
/// working directory until a directory containing `configs/` is reached.

use std::path::{Path, PathBuf};

/// Marker directory identifying the project root.
const ROOT_MARKER: &str = "configs";

/// Centralized registry for project-relative path resolution
#[derive(Clone, Debug)]
pub struct ProjectPaths {
    root: PathBuf,
    /// Pid files live here; overridable for tests
    state_dir: PathBuf,
}

impl ProjectPaths {
    /// Use `root` as-is.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ProjectPaths {
            root: root.into(),
            state_dir: std::env::temp_dir(),
        }
    }

    /// Walk upward from `start` looking for the root marker.
    /// Falls back to `start` itself when no marker exists.
    pub fn discover(start: &Path) -> Self {
        let mut current = start.to_path_buf();
        loop {
            if current.join(ROOT_MARKER).is_dir() {
                log::debug!("[Paths] ✓ Project root: {}", current.display());
                return Self::new(current);
            }
            match current.parent() {
                Some(parent) if parent != current => current = parent.to_path_buf(),
                _ => break,
            }
        }
        log::debug!(
            "[Paths] No '{}' directory above {}, using it as root",
            ROOT_MARKER,
            start.display()
        );
        Self::new(start)
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path from config: absolute stays, relative joins the root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.root.join("certs")
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.root.join(ROOT_MARKER)
    }

    pub fn secrets_file(&self) -> PathBuf {
        self.configs_dir().join("vault-secrets.json")
    }

    pub fn smoke_tests_file(&self) -> PathBuf {
        self.configs_dir().join("smoke-tests.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Pid file for a detached port-forward to `service`.
    pub fn pid_file(&self, service: &str) -> PathBuf {
        self.state_dir
            .join(format!("terrarium-port-forward-{}.pid", service))
    }

    /// All recorded port-forward pid files.
    pub fn recorded_pid_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.state_dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| {
                        let n = n.to_string_lossy();
                        n.starts_with("terrarium-port-forward-") && n.ends_with(".pid")
                    })
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_discover_walks_up_to_configs() {
        let temp = tempdir().expect("Failed to create temp dir");
        let nested = temp.path().join("apps").join("logthon");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(temp.path().join("configs")).unwrap();

        let paths = ProjectPaths::discover(&nested);
        assert_eq!(paths.root(), temp.path());
        assert_eq!(paths.certs_dir(), temp.path().join("certs"));
    }

    #[test]
    fn test_discover_without_marker_uses_start() {
        let temp = tempdir().expect("Failed to create temp dir");
        let paths = ProjectPaths::discover(temp.path());
        assert_eq!(paths.root(), temp.path());
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let paths = ProjectPaths::new("/srv/terrarium");
        assert_eq!(
            paths.resolve(Path::new("configs/k3s")),
            PathBuf::from("/srv/terrarium/configs/k3s")
        );
        assert_eq!(paths.resolve(Path::new("/etc/x")), PathBuf::from("/etc/x"));
    }

    #[test]
    fn test_pid_files_listed_from_state_dir() {
        let temp = tempdir().unwrap();
        let paths = ProjectPaths::new("/srv").with_state_dir(temp.path());
        fs::write(paths.pid_file("nginx"), "123").unwrap();
        fs::write(temp.path().join("unrelated.pid"), "1").unwrap();

        let files = paths.recorded_pid_files();
        assert_eq!(files, vec![temp.path().join("terrarium-port-forward-nginx.pid")]);
    }
}
