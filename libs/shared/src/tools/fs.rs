use super::Workspace;
use async_trait::async_trait;
use gitsage_agent_core::{Tool, ToolError, ToolSchema, optional_str, required_str};
use globset::{Glob, GlobMatcher};
use grep_regex::RegexMatcher;
use grep_searcher::Searcher;
use grep_searcher::sinks::UTF8;
use ignore::WalkBuilder;
use serde_json::{Value, json};
use std::path::Path;
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_LINES: usize = 400;
const DEFAULT_MAX_ENTRIES: usize = 300;
const DEFAULT_MAX_MATCHES: usize = 200;
const BINARY_PROBE_BYTES: usize = 8000;

fn optional_usize(arguments: &Value, key: &str) -> Result<Option<usize>, ToolError> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| ToolError::InvalidArguments(format!("`{key}` must be a positive integer"))),
    }
}

fn compile_glob(pattern: Option<&str>) -> Result<Option<GlobMatcher>, ToolError> {
    pattern
        .map(|pattern| {
            Glob::new(pattern)
                .map(|glob| glob.compile_matcher())
                .map_err(|e| ToolError::InvalidArguments(format!("invalid glob `{pattern}`: {e}")))
        })
        .transpose()
}

fn glob_matches(glob: &GlobMatcher, relative: &str, path: &Path) -> bool {
    glob.is_match(relative) || path.file_name().is_some_and(|name| glob.is_match(name))
}

/// Gitignore-aware walk that never descends into `.git`.
fn walker(root: &Path) -> ignore::Walk {
    WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .require_git(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build()
}

pub struct ReadFileTool {
    workspace: Workspace,
    max_lines: usize,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            max_lines: DEFAULT_MAX_LINES,
        }
    }

    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines.max(1);
        self
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: "Read a text file from the repository with line numbers. \
                Use start_line/end_line (1-based, inclusive) for large files."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path relative to the repository root"},
                    "start_line": {"type": "integer", "minimum": 1},
                    "end_line": {"type": "integer", "minimum": 1}
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(
        &self,
        arguments: &Value,
        _cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let requested = required_str(arguments, "path")?;
        let path = self.workspace.resolve(requested)?;
        let relative = self.workspace.relative(&path);

        if path.is_dir() {
            return Err(ToolError::InvalidArguments(format!(
                "`{relative}` is a directory; use list_files"
            )));
        }

        let bytes = tokio::fs::read(&path).await?;
        if bytes.iter().take(BINARY_PROBE_BYTES).any(|&b| b == 0) {
            return Err(ToolError::Execution(format!(
                "`{relative}` looks like a binary file"
            )));
        }
        let content = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = content.lines().collect();

        let start = optional_usize(arguments, "start_line")?.unwrap_or(1).max(1);
        let end = optional_usize(arguments, "end_line")?
            .unwrap_or(lines.len())
            .min(lines.len());
        if !lines.is_empty() && start > lines.len() {
            return Err(ToolError::InvalidArguments(format!(
                "start_line {start} is beyond the end of `{relative}` ({} lines)",
                lines.len()
            )));
        }

        let selected = lines
            .iter()
            .enumerate()
            .skip(start - 1)
            .take(end.saturating_sub(start - 1).min(self.max_lines));
        let body = selected
            .map(|(i, line)| format!("{:4}: {}", i + 1, line))
            .collect::<Vec<_>>()
            .join("\n");

        let shown_end = end.min(start - 1 + self.max_lines);
        let mut result = if start == 1 && shown_end == lines.len() {
            format!("File: {relative} ({} lines)\n{body}", lines.len())
        } else {
            format!(
                "File: {relative} (lines {start}-{shown_end} of {})\n{body}",
                lines.len()
            )
        };
        if shown_end < end {
            result.push_str("\n...");
        }
        Ok(result)
    }
}

pub struct WriteFileTool {
    workspace: Workspace,
}

impl WriteFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: "Create or overwrite a file in the repository.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path relative to the repository root"},
                    "content": {"type": "string", "description": "Full new file content"}
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn execute(
        &self,
        arguments: &Value,
        _cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let path = self.workspace.resolve(required_str(arguments, "path")?)?;
        let content = required_str(arguments, "content")?;

        if path.is_dir() {
            return Err(ToolError::InvalidArguments(format!(
                "`{}` is a directory",
                self.workspace.relative(&path)
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;

        tracing::debug!(path = %path.display(), bytes = content.len(), "wrote file");
        Ok(format!(
            "Wrote {} bytes to {}",
            content.len(),
            self.workspace.relative(&path)
        ))
    }
}

pub struct ListFilesTool {
    workspace: Workspace,
    max_entries: usize,
}

impl ListFilesTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: "List files under a directory, honouring .gitignore. \
                Optionally filter with a glob such as '*.rs' or 'src/**/*.ts'."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory relative to the repository root (default: root)"},
                    "glob": {"type": "string"}
                }
            }),
        }
    }

    async fn execute(
        &self,
        arguments: &Value,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let base = self
            .workspace
            .resolve(optional_str(arguments, "path").unwrap_or(""))?;
        let glob_pattern = optional_str(arguments, "glob");
        let glob = compile_glob(glob_pattern)?;
        let shown = self.workspace.relative(&base);

        if !base.is_dir() {
            return Err(ToolError::InvalidArguments(format!(
                "`{shown}` is not a directory"
            )));
        }

        let mut entries = Vec::new();
        for entry in walker(&base).flatten() {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }

            let entry_path = entry.path();
            let relative = match entry_path.strip_prefix(&base) {
                Ok(relative) if !relative.as_os_str().is_empty() => {
                    relative.to_string_lossy().into_owned()
                }
                _ => continue,
            };
            if let Some(glob) = &glob
                && !glob_matches(glob, &relative, entry_path)
            {
                continue;
            }

            if entry_path.is_dir() {
                entries.push(format!("{relative}/"));
            } else {
                entries.push(relative);
            }
        }

        if entries.is_empty() {
            return Ok(match glob_pattern {
                Some(pattern) => format!("No files matching '{pattern}' in {shown}"),
                None => format!("No files in {shown}"),
            });
        }

        entries.sort();
        let total = entries.len();
        entries.truncate(self.max_entries);

        let mut result = format!("Files in \"{shown}\" ({total} entries):\n\n{}", entries.join("\n"));
        if total > self.max_entries {
            result.push_str(&format!("\n\n... and {} more", total - self.max_entries));
        }
        Ok(result)
    }
}

pub struct GrepTool {
    workspace: Workspace,
    max_matches: usize,
}

impl GrepTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            max_matches: DEFAULT_MAX_MATCHES,
        }
    }

    pub fn with_max_matches(mut self, max_matches: usize) -> Self {
        self.max_matches = max_matches.max(1);
        self
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: "Search file contents with a regular expression, honouring .gitignore. \
                Results are `path:line:text`."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Regular expression"},
                    "path": {"type": "string", "description": "File or directory relative to the repository root (default: root)"},
                    "glob": {"type": "string", "description": "Only search files matching this glob"}
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn execute(
        &self,
        arguments: &Value,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let pattern = required_str(arguments, "pattern")?;
        let matcher = RegexMatcher::new(pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("invalid regex `{pattern}`: {e}")))?;
        let glob = compile_glob(optional_str(arguments, "glob"))?;
        let base = self
            .workspace
            .resolve(optional_str(arguments, "path").unwrap_or(""))?;
        let shown = self.workspace.relative(&base);

        let mut matches: Vec<String> = Vec::new();
        let mut files_with_matches = 0;
        let mut searcher = Searcher::new();

        for entry in walker(&base).flatten() {
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            if matches.len() >= self.max_matches {
                break;
            }

            let entry_path = entry.path();
            if !entry_path.is_file() {
                continue;
            }
            let relative = self.workspace.relative(entry_path);
            if let Some(glob) = &glob
                && !glob_matches(glob, &relative, entry_path)
            {
                continue;
            }

            let mut file_matches = Vec::new();
            let budget = self.max_matches - matches.len();
            let searched = searcher.search_path(
                &matcher,
                entry_path,
                UTF8(|line_number, line| {
                    file_matches.push(format!("{relative}:{line_number}:{}", line.trim_end()));
                    Ok(file_matches.len() < budget)
                }),
            );
            if let Err(error) = searched {
                tracing::debug!(path = %entry_path.display(), %error, "skipping unsearchable file");
                continue;
            }

            if !file_matches.is_empty() {
                files_with_matches += 1;
                matches.extend(file_matches);
            }
        }

        if matches.is_empty() {
            return Ok(format!("No matches for '{pattern}' in {shown}"));
        }

        let truncated = matches.len() >= self.max_matches;
        Ok(format!(
            "Grep results for '{pattern}' in \"{shown}\" ({} matches in {files_with_matches} files):\n\n{}{}",
            matches.len(),
            matches.join("\n"),
            if truncated { "\n\n... (truncated)" } else { "" }
        ))
    }
}
