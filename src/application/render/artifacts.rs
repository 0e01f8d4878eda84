//! Temp-file namespace and cleanup for pipeline artifacts.

use std::{
    ffi::OsString,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::domain::{key::ArtifactKey, types::OutputFormat};

/// Every extension a pipeline run may leave behind.
pub const ARTIFACT_EXTENSIONS: [&str; 6] = ["tex", "pdf", "aux", "log", "svg", "png"];

/// Root directory shared by all pipeline runs.
#[derive(Debug, Clone)]
pub struct ArtifactWorkspace {
    root: PathBuf,
}

impl ArtifactWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if it does not exist yet.
    pub async fn ensure(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    pub fn paths(&self, key: &ArtifactKey) -> ArtifactPaths {
        ArtifactPaths {
            base: self.root.join(key.as_str()),
        }
    }
}

/// The family of files sharing one key-derived base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    base: PathBuf,
}

impl ArtifactPaths {
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// `<base>.<extension>`; the key itself never contains a dot so this is
    /// a plain append.
    pub fn with_extension(&self, extension: &str) -> PathBuf {
        let mut path = OsString::from(self.base.as_os_str());
        path.push(".");
        path.push(extension);
        PathBuf::from(path)
    }

    pub fn tex(&self) -> PathBuf {
        self.with_extension("tex")
    }

    pub fn pdf(&self) -> PathBuf {
        self.with_extension("pdf")
    }

    pub fn output(&self, format: OutputFormat) -> PathBuf {
        self.with_extension(format.extension())
    }

    pub fn all(&self) -> impl Iterator<Item = PathBuf> + '_ {
        ARTIFACT_EXTENSIONS
            .iter()
            .map(|extension| self.with_extension(extension))
    }
}

/// Remove every artifact for `paths`. Never fails; each removal error is
/// logged and dropped. Returns the number of files actually removed.
pub fn cleanup(paths: &ArtifactPaths) -> usize {
    let mut removed = 0;
    for path in paths.all() {
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(
                    target = "tikzrender::render::artifacts",
                    op = "artifacts::cleanup",
                    result = "error",
                    path = %path.display(),
                    error = %err,
                    "Failed to remove pipeline artifact"
                );
            }
        }
    }
    debug!(
        target = "tikzrender::render::artifacts",
        op = "artifacts::cleanup",
        base = %paths.base().display(),
        removed,
        "Cleaned up pipeline artifacts"
    );
    removed
}

/// Runs [`cleanup`] when dropped, so artifacts are removed on every exit path
/// of a pipeline run, unwinding and cancellation included.
#[derive(Debug)]
pub struct CleanupGuard {
    paths: ArtifactPaths,
}

impl CleanupGuard {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        cleanup(&self.paths);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn paths_in(dir: &TempDir) -> ArtifactPaths {
        ArtifactWorkspace::new(dir.path())
            .paths(&ArtifactKey::for_render("\\draw (0,0);", OutputFormat::Svg))
    }

    #[test]
    fn paths_share_the_key_as_base_name() {
        let workspace = ArtifactWorkspace::new("/tmp/work");
        let key = ArtifactKey::for_render("x", OutputFormat::Png);
        let paths = workspace.paths(&key);

        assert_eq!(paths.base(), Path::new("/tmp/work").join(key.as_str()));
        assert_eq!(
            paths.tex(),
            PathBuf::from(format!("/tmp/work/{}.tex", key.as_str()))
        );
        assert_eq!(
            paths.output(OutputFormat::Png),
            PathBuf::from(format!("/tmp/work/{}.png", key.as_str()))
        );
        assert_eq!(paths.all().count(), ARTIFACT_EXTENSIONS.len());
    }

    #[tokio::test]
    async fn ensure_creates_nested_root() {
        let dir = TempDir::new().expect("temp dir");
        let workspace = ArtifactWorkspace::new(dir.path().join("a").join("b"));
        workspace.ensure().await.expect("create");
        workspace.ensure().await.expect("idempotent");
        assert!(workspace.root().is_dir());
    }

    #[test]
    fn cleanup_removes_every_known_extension() {
        let dir = TempDir::new().expect("temp dir");
        let paths = paths_in(&dir);
        for path in paths.all() {
            fs::write(&path, b"x").expect("write artifact");
        }
        let unrelated = dir.path().join("keep.txt");
        fs::write(&unrelated, b"x").expect("write unrelated");

        assert_eq!(cleanup(&paths), ARTIFACT_EXTENSIONS.len());
        assert!(paths.all().all(|path| !path.exists()));
        assert!(unrelated.exists());
    }

    #[test]
    fn cleanup_tolerates_missing_files() {
        let dir = TempDir::new().expect("temp dir");
        let paths = paths_in(&dir);
        fs::write(paths.tex(), b"x").expect("write tex");

        assert_eq!(cleanup(&paths), 1);
        assert_eq!(cleanup(&paths), 0);
    }

    #[test]
    fn cleanup_swallows_individual_failures() {
        let dir = TempDir::new().expect("temp dir");
        let paths = paths_in(&dir);
        // A directory in place of the .aux file cannot be removed with remove_file.
        fs::create_dir(paths.with_extension("aux")).expect("dir");
        fs::write(paths.pdf(), b"x").expect("write pdf");

        assert_eq!(cleanup(&paths), 1);
        assert!(!paths.pdf().exists());
    }

    #[test]
    fn guard_cleans_up_on_drop() {
        let dir = TempDir::new().expect("temp dir");
        let paths = paths_in(&dir);
        fs::write(paths.tex(), b"x").expect("write tex");
        fs::write(paths.with_extension("log"), b"x").expect("write log");

        drop(CleanupGuard::new(paths.clone()));
        assert!(paths.all().all(|path| !path.exists()));
    }
}
