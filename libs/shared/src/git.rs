//! Plain-text git operations backed by the `git` binary.

use async_trait::async_trait;
use gitsage_agent_core::RetryClassify;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`git {command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("invalid revision `{0}`")]
    InvalidRevision(String),

    #[error("not inside a git repository")]
    NotARepository,
}

impl RetryClassify for GitError {
    fn is_timeout(&self) -> bool {
        match self {
            GitError::Spawn { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    fn is_network(&self) -> bool {
        match self {
            GitError::Spawn { source, .. } => source.is_network(),
            _ => false,
        }
    }
}

#[async_trait]
pub trait GitExecutor: Send + Sync {
    /// Staged changes.
    async fn diff_cached(&self) -> Result<String, GitError>;

    /// Unstaged changes in the working tree.
    async fn diff_worktree(&self) -> Result<String, GitError>;

    /// Changes on `head` since it diverged from `base`.
    async fn diff_branches(&self, base: &str, head: &str) -> Result<String, GitError>;

    async fn log_range(&self, range: &str, max_count: usize) -> Result<String, GitError>;

    async fn status(&self) -> Result<String, GitError>;

    async fn commit(&self, message: &str) -> Result<String, GitError>;

    async fn current_branch(&self) -> Result<String, GitError>;

    async fn current_user(&self) -> Result<String, GitError>;

    async fn show(&self, revision: &str) -> Result<String, GitError>;
}

/// Revisions and ranges come from the model; anything that could be read as
/// an option is refused.
pub fn validate_revision(revision: &str) -> Result<(), GitError> {
    let valid = !revision.is_empty()
        && !revision.starts_with('-')
        && !revision.chars().any(|c| c.is_whitespace() || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(GitError::InvalidRevision(revision.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
    program: String,
}

impl GitCli {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            program: "git".to_string(),
        }
    }

    /// Use another executable in place of `git`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Locate the repository enclosing `dir`.
    pub async fn discover(dir: impl AsRef<Path>) -> Result<Self, GitError> {
        let probe = Self::new(dir.as_ref());
        let top = probe
            .run(&["rev-parse", "--show-toplevel"])
            .await
            .map_err(|error| match error {
                GitError::CommandFailed { .. } => GitError::NotARepository,
                other => other,
            })?;
        Ok(Self::new(top.trim()))
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        tracing::debug!(args = ?args, "running git");

        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.repo_root)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| GitError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(GitError::CommandFailed {
                command: args.join(" "),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl GitExecutor for GitCli {
    async fn diff_cached(&self) -> Result<String, GitError> {
        self.run(&["diff", "--cached", "--no-color", "--no-ext-diff"])
            .await
    }

    async fn diff_worktree(&self) -> Result<String, GitError> {
        self.run(&["diff", "--no-color", "--no-ext-diff"]).await
    }

    async fn diff_branches(&self, base: &str, head: &str) -> Result<String, GitError> {
        validate_revision(base)?;
        validate_revision(head)?;
        let range = format!("{base}...{head}");
        self.run(&["diff", "--no-color", "--no-ext-diff", &range])
            .await
    }

    async fn log_range(&self, range: &str, max_count: usize) -> Result<String, GitError> {
        validate_revision(range)?;
        let max_count = format!("--max-count={max_count}");
        self.run(&[
            "log",
            "--no-color",
            "--date=short",
            "--format=%h %ad %an%n  %s%n%b",
            &max_count,
            range,
        ])
        .await
    }

    async fn status(&self) -> Result<String, GitError> {
        self.run(&["status", "--short", "--branch"]).await
    }

    async fn commit(&self, message: &str) -> Result<String, GitError> {
        self.run(&["commit", "--message", message]).await
    }

    async fn current_branch(&self) -> Result<String, GitError> {
        Ok(self
            .run(&["rev-parse", "--abbrev-ref", "HEAD"])
            .await?
            .trim()
            .to_string())
    }

    async fn current_user(&self) -> Result<String, GitError> {
        Ok(self.run(&["config", "user.name"]).await?.trim().to_string())
    }

    async fn show(&self, revision: &str) -> Result<String, GitError> {
        validate_revision(revision)?;
        self.run(&["show", "--no-color", "--stat", "--patch", revision])
            .await
    }
}
