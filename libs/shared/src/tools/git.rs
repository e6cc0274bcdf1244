use crate::git::{GitError, GitExecutor};
use async_trait::async_trait;
use gitsage_agent_core::{Tool, ToolError, ToolSchema, optional_str, required_str};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DEFAULT_LOG_COUNT: usize = 20;
const MAX_LOG_COUNT: usize = 200;

impl From<GitError> for ToolError {
    fn from(error: GitError) -> Self {
        match error {
            GitError::InvalidRevision(_) => ToolError::InvalidArguments(error.to_string()),
            other => ToolError::Execution(other.to_string()),
        }
    }
}

fn or_placeholder(output: String, placeholder: &str) -> String {
    if output.trim().is_empty() {
        placeholder.to_string()
    } else {
        output
    }
}

pub struct GitStatusTool {
    git: Arc<dyn GitExecutor>,
}

impl GitStatusTool {
    pub fn new(git: Arc<dyn GitExecutor>) -> Self {
        Self { git }
    }
}

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        "git_status"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: "Show the current branch and short working tree status.".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, _: &Value, _: &CancellationToken) -> Result<String, ToolError> {
        Ok(self.git.status().await?)
    }
}

pub struct GitDiffTool {
    git: Arc<dyn GitExecutor>,
}

impl GitDiffTool {
    pub fn new(git: Arc<dyn GitExecutor>) -> Self {
        Self { git }
    }
}

#[async_trait]
impl Tool for GitDiffTool {
    fn name(&self) -> &str {
        "git_diff"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: "Show a diff. With `base`, the changes of HEAD since it diverged from \
                that branch; otherwise staged changes (default) or unstaged ones."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "staged": {"type": "boolean", "description": "Diff the index instead of the working tree (default true)"},
                    "base": {"type": "string", "description": "Base branch or revision to compare HEAD against"}
                }
            }),
        }
    }

    async fn execute(&self, arguments: &Value, _: &CancellationToken) -> Result<String, ToolError> {
        let staged = arguments
            .get("staged")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let diff = match optional_str(arguments, "base") {
            Some(base) => self.git.diff_branches(base, "HEAD").await?,
            None if staged => self.git.diff_cached().await?,
            None => self.git.diff_worktree().await?,
        };
        Ok(or_placeholder(diff, "No changes."))
    }
}

pub struct GitLogTool {
    git: Arc<dyn GitExecutor>,
}

impl GitLogTool {
    pub fn new(git: Arc<dyn GitExecutor>) -> Self {
        Self { git }
    }
}

#[async_trait]
impl Tool for GitLogTool {
    fn name(&self) -> &str {
        "git_log"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: "Show commits (hash, date, author, subject, body) for a revision range."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "range": {"type": "string", "description": "Revision or range, e.g. 'main..HEAD' (default HEAD)"},
                    "max_count": {"type": "integer", "minimum": 1, "maximum": MAX_LOG_COUNT}
                }
            }),
        }
    }

    async fn execute(&self, arguments: &Value, _: &CancellationToken) -> Result<String, ToolError> {
        let range = optional_str(arguments, "range").unwrap_or("HEAD");
        let max_count = arguments
            .get("max_count")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_LOG_COUNT, |n| n as usize)
            .clamp(1, MAX_LOG_COUNT);

        let log = self.git.log_range(range, max_count).await?;
        Ok(or_placeholder(log, "No commits in range."))
    }
}

pub struct GitShowTool {
    git: Arc<dyn GitExecutor>,
}

impl GitShowTool {
    pub fn new(git: Arc<dyn GitExecutor>) -> Self {
        Self { git }
    }
}

#[async_trait]
impl Tool for GitShowTool {
    fn name(&self) -> &str {
        "git_show"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: "Show one commit with its stat and patch.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "revision": {"type": "string", "description": "Commit hash, tag or branch"}
                },
                "required": ["revision"]
            }),
        }
    }

    async fn execute(&self, arguments: &Value, _: &CancellationToken) -> Result<String, ToolError> {
        let revision = required_str(arguments, "revision")?;
        Ok(self.git.show(revision).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::validate_revision;
    use std::sync::Mutex;

    /// Records every call and answers with canned output.
    #[derive(Default)]
    struct FakeGit {
        calls: Mutex<Vec<String>>,
        diff: String,
        fail_with: Option<String>,
    }

    impl FakeGit {
        fn record(&self, call: String) -> Result<(), GitError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
            match &self.fail_with {
                Some(stderr) => Err(GitError::CommandFailed {
                    command: "fake".to_string(),
                    status: "exit status: 128".to_string(),
                    stderr: stderr.clone(),
                }),
                None => Ok(()),
            }
        }

        fn calls(&self) -> Vec<String> {
            match self.calls.lock() {
                Ok(calls) => calls.clone(),
                Err(_) => Vec::new(),
            }
        }
    }

    #[async_trait]
    impl GitExecutor for FakeGit {
        async fn diff_cached(&self) -> Result<String, GitError> {
            self.record("diff --cached".to_string())?;
            Ok(self.diff.clone())
        }

        async fn diff_worktree(&self) -> Result<String, GitError> {
            self.record("diff".to_string())?;
            Ok(self.diff.clone())
        }

        async fn diff_branches(&self, base: &str, head: &str) -> Result<String, GitError> {
            validate_revision(base)?;
            self.record(format!("diff {base}...{head}"))?;
            Ok(self.diff.clone())
        }

        async fn log_range(&self, range: &str, max_count: usize) -> Result<String, GitError> {
            self.record(format!("log {range} -n{max_count}"))?;
            Ok("a1b2c3d 2026-01-02 Sam\n  feat: add parser\n".to_string())
        }

        async fn status(&self) -> Result<String, GitError> {
            self.record("status".to_string())?;
            Ok("## main\n M src/lib.rs\n".to_string())
        }

        async fn commit(&self, message: &str) -> Result<String, GitError> {
            self.record(format!("commit {message}"))?;
            Ok("[main a1b2c3d] committed\n".to_string())
        }

        async fn current_branch(&self) -> Result<String, GitError> {
            self.record("branch".to_string())?;
            Ok("main".to_string())
        }

        async fn current_user(&self) -> Result<String, GitError> {
            self.record("user".to_string())?;
            Ok("Sam".to_string())
        }

        async fn show(&self, revision: &str) -> Result<String, GitError> {
            validate_revision(revision)?;
            self.record(format!("show {revision}"))?;
            Ok(format!("commit {revision}\n"))
        }
    }

    async fn run(tool: &dyn Tool, arguments: Value) -> Result<String, ToolError> {
        tool.execute(&arguments, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn diff_selects_staged_worktree_or_branch() {
        let git = Arc::new(FakeGit::default());
        let tool = GitDiffTool::new(git.clone());

        for arguments in [
            json!({}),
            json!({"staged": false}),
            json!({"base": "main"}),
        ] {
            match run(&tool, arguments).await {
                Ok(output) => assert_eq!(output, "No changes."),
                Err(error) => panic!("diff failed: {error}"),
            }
        }

        assert_eq!(git.calls(), vec!["diff --cached", "diff", "diff main...HEAD"]);
    }

    #[tokio::test]
    async fn log_clamps_the_commit_count() {
        let git = Arc::new(FakeGit::default());
        let tool = GitLogTool::new(git.clone());

        let _ = run(&tool, json!({})).await;
        let _ = run(&tool, json!({"range": "v1.0..HEAD", "max_count": 5000})).await;

        assert_eq!(git.calls(), vec!["log HEAD -n20", "log v1.0..HEAD -n200"]);
    }

    #[tokio::test]
    async fn git_failures_become_tool_errors() {
        let git = Arc::new(FakeGit {
            fail_with: Some("fatal: bad revision".to_string()),
            ..FakeGit::default()
        });

        match run(&GitStatusTool::new(git.clone()), json!({})).await {
            Err(ToolError::Execution(message)) => assert!(message.contains("fatal: bad revision")),
            other => panic!("expected execution error, got {other:?}"),
        }

        assert!(matches!(
            run(&GitShowTool::new(git.clone()), json!({"revision": "--output=x"})).await,
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(matches!(
            run(&GitShowTool::new(git), json!({})).await,
            Err(ToolError::InvalidArguments(_))
        ));
    }
}
