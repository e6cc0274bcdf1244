//! Repository tools exposed to the agents.

mod fs;
mod git;

pub use fs::{GrepTool, ListFilesTool, ReadFileTool, WriteFileTool};
pub use git::{GitDiffTool, GitLogTool, GitShowTool, GitStatusTool};

use crate::git::GitExecutor;
use gitsage_agent_core::{ToolError, ToolRegistry};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Repository root every tool path is resolved against.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            root: root.as_ref().canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a model-supplied path. The result never leaves the root, either
    /// lexically (`..`) or through a symlink, dangling links included.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, ToolError> {
        let requested = requested.trim();
        let joined = if requested.is_empty() {
            self.root.clone()
        } else {
            self.root.join(requested)
        };

        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root) {
            return Err(outside_root(requested));
        }
        self.confine_links(&normalized, requested, MAX_LINK_HOPS)?;
        Ok(normalized)
    }

    /// Follow every existing symlink below the root and require each target,
    /// and whatever that target links to, to stay under the root.
    fn confine_links(&self, path: &Path, requested: &str, hops: usize) -> Result<(), ToolError> {
        let Ok(below_root) = path.strip_prefix(&self.root) else {
            return Err(outside_root(requested));
        };

        let mut prefix = self.root.clone();
        for component in below_root.components() {
            let parent = prefix.clone();
            prefix.push(component);
            let Ok(metadata) = std::fs::symlink_metadata(&prefix) else {
                // Nothing deeper exists.
                return Ok(());
            };
            if !metadata.file_type().is_symlink() {
                continue;
            }
            if hops == 0 {
                return Err(outside_root(requested));
            }

            let link = std::fs::read_link(&prefix)?;
            let target = normalize(&parent.canonicalize()?.join(link));
            if !target.starts_with(&self.root) {
                return Err(outside_root(requested));
            }
            self.confine_links(&target, requested, hops - 1)?;
        }
        Ok(())
    }

    /// Display form of `path` relative to the root.
    pub fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) if relative.as_os_str().is_empty() => ".".to_string(),
            Ok(relative) => relative.to_string_lossy().into_owned(),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

const MAX_LINK_HOPS: usize = 40;

/// Lexical normalisation: drops `.` and applies `..` without touching the disk.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn outside_root(requested: &str) -> ToolError {
    ToolError::InvalidArguments(format!("path `{requested}` is outside the repository"))
}

/// The read-only repository tools, plus `write_file` when `allow_write` is set.
pub fn repository_tools(
    workspace: Workspace,
    git: Arc<dyn GitExecutor>,
    allow_write: bool,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new()
        .with(GitStatusTool::new(git.clone()))
        .with(GitDiffTool::new(git.clone()))
        .with(GitLogTool::new(git.clone()))
        .with(GitShowTool::new(git))
        .with(ReadFileTool::new(workspace.clone()))
        .with(ListFilesTool::new(workspace.clone()))
        .with(GrepTool::new(workspace.clone()));

    if allow_write {
        registry.register(Arc::new(WriteFileTool::new(workspace)));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(error) => panic!("tempdir: {error}"),
        };
        let workspace = match Workspace::new(dir.path()) {
            Ok(workspace) => workspace,
            Err(error) => panic!("workspace: {error}"),
        };
        (dir, workspace)
    }

    #[test]
    fn resolves_paths_inside_the_root() {
        let (_dir, workspace) = workspace();
        let resolved = match workspace.resolve("src/../src/./main.rs") {
            Ok(path) => path,
            Err(error) => panic!("should resolve: {error}"),
        };
        assert_eq!(resolved, workspace.root().join("src/main.rs"));
        assert_eq!(workspace.relative(&resolved), "src/main.rs");

        let root = match workspace.resolve("") {
            Ok(path) => path,
            Err(error) => panic!("should resolve: {error}"),
        };
        assert_eq!(workspace.relative(&root), ".");
    }

    #[test]
    fn rejects_escapes() {
        let (_dir, workspace) = workspace();
        for path in ["../secret", "src/../../secret", "/etc/passwd"] {
            assert!(
                matches!(workspace.resolve(path), Err(ToolError::InvalidArguments(_))),
                "{path} should be rejected"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlinks_pointing_outside() {
        let (dir, workspace) = workspace();
        let outside = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(error) => panic!("tempdir: {error}"),
        };
        if let Err(error) = std::os::unix::fs::symlink(outside.path(), dir.path().join("link")) {
            panic!("symlink: {error}");
        }

        assert!(matches!(
            workspace.resolve("link/file.txt"),
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_dangling_symlinks_pointing_outside() {
        let (dir, workspace) = workspace();
        let outside = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(error) => panic!("tempdir: {error}"),
        };
        let target = outside.path().join("pwned.txt");
        if let Err(error) = std::os::unix::fs::symlink(&target, dir.path().join("evil")) {
            panic!("symlink: {error}");
        }
        if let Err(error) = std::os::unix::fs::symlink("evil", dir.path().join("chained")) {
            panic!("symlink: {error}");
        }

        for path in ["evil", "chained"] {
            assert!(
                matches!(workspace.resolve(path), Err(ToolError::InvalidArguments(_))),
                "{path} should be rejected"
            );
        }
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn accepts_symlinks_that_stay_inside() {
        let (dir, workspace) = workspace();
        if let Err(error) = std::fs::create_dir(dir.path().join("real")) {
            panic!("mkdir: {error}");
        }
        if let Err(error) = std::os::unix::fs::symlink("real", dir.path().join("alias")) {
            panic!("symlink: {error}");
        }
        if let Err(error) = std::os::unix::fs::symlink("real/new.txt", dir.path().join("pending")) {
            panic!("symlink: {error}");
        }

        assert!(workspace.resolve("alias/file.txt").is_ok());
        assert!(workspace.resolve("pending").is_ok());
    }

    #[test]
    fn write_access_is_opt_in() {
        let (_dir, workspace) = workspace();
        let git: Arc<dyn GitExecutor> = Arc::new(crate::git::GitCli::new(workspace.root()));

        let read_only = repository_tools(workspace.clone(), git.clone(), false);
        assert!(read_only.get("write_file").is_none());
        assert_eq!(
            read_only.names(),
            vec![
                "git_status",
                "git_diff",
                "git_log",
                "git_show",
                "read_file",
                "list_files",
                "grep"
            ]
        );

        let writable = repository_tools(workspace, git, true);
        assert!(writable.get("write_file").is_some());
    }
}
