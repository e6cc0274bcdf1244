//! System prompts, terminal tools and output rendering per agent.

use gitsage_agent_core::{AgentOutcome, TerminalTool};
use serde_json::{Value, json};

pub const COMMIT_AGENT: &str = "commit";
pub const PR_AGENT: &str = "pr";
pub const REPORT_AGENT: &str = "report";
pub const DEBUG_AGENT: &str = "debug";

const SHARED_RULES: &str = "You work inside a git repository through the tools you are given. \
Inspect the repository before you write anything; never guess at changes you have not seen. \
Keep tool calls focused: prefer a narrow diff, log range or grep over reading whole files.";

fn language_rule(language: &str) -> String {
    format!("Write all generated text in {language}. Keep code identifiers, paths and commands unchanged.")
}

pub fn commit_system_prompt(language: &str) -> String {
    format!(
        "You are a release engineer writing git commit messages.\n\n{SHARED_RULES}\n\n\
         Look at the staged diff, then call `submit_commit` exactly once. The subject is \
         imperative, at most 72 characters, and follows Conventional Commits \
         (`type(scope): summary`). The body explains what changed and why, wrapped at 72 \
         columns; leave it empty for trivial changes.\n\n{}",
        language_rule(language)
    )
}

pub fn pr_system_prompt(language: &str) -> String {
    format!(
        "You are a senior engineer writing a pull request description.\n\n{SHARED_RULES}\n\n\
         Compare the current branch with its base, read the commits and the relevant code, then \
         call `submit_pr` exactly once with a concise title and a Markdown description covering \
         the motivation, the main changes and how they were tested.\n\n{}",
        language_rule(language)
    )
}

pub fn report_system_prompt(language: &str) -> String {
    format!(
        "You are an engineer summarising recent work for a status report.\n\n{SHARED_RULES}\n\n\
         Read the commits in the requested range (use git_show for commits that need detail), \
         group related work, then call `submit_report` exactly once with a short summary and \
         one highlight per meaningful piece of work.\n\n{}",
        language_rule(language)
    )
}

pub fn debug_system_prompt(language: &str, allow_write: bool) -> String {
    let access = if allow_write {
        "You may edit files with write_file when a fix is clear; describe every edit you make."
    } else {
        "You have read-only access; propose fixes as code snippets instead of editing files."
    };
    format!(
        "You are a debugging assistant.\n\n{SHARED_RULES}\n\n\
         Investigate the reported problem: form hypotheses, check them against the code and \
         history, and narrow down the root cause. {access} When you are done, answer with a \
         report covering the root cause, the evidence and the recommended fix.\n\n{}",
        language_rule(language)
    )
}

pub fn commit_tool() -> TerminalTool {
    TerminalTool::new(
        "submit_commit",
        "Submit the final commit message.",
        json!({
            "type": "object",
            "properties": {
                "subject": {"type": "string", "description": "Single-line subject, at most 72 characters"},
                "body": {"type": "string", "description": "Optional body; empty for trivial changes"}
            },
            "required": ["subject"]
        }),
    )
}

pub fn pr_tool() -> TerminalTool {
    TerminalTool::new(
        "submit_pr",
        "Submit the final pull request title and description.",
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "description": {"type": "string", "description": "Markdown body"}
            },
            "required": ["title", "description"]
        }),
    )
}

pub fn report_tool() -> TerminalTool {
    TerminalTool::new(
        "submit_report",
        "Submit the final work report.",
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "highlights": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["summary", "highlights"]
        }),
    )
}

/// Append the user's extra context to a task, if any.
pub fn with_context(task: String, context: Option<&str>) -> String {
    match context.map(str::trim).filter(|context| !context.is_empty()) {
        Some(context) => format!("{task}\n\nAdditional context from the user:\n{context}"),
        None => task,
    }
}

fn text_field<'a>(payload: &'a Value, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or("").trim()
}

/// Commit message text, or `None` when the payload has no subject.
pub fn commit_message(payload: &Value) -> Option<String> {
    let subject = text_field(payload, "subject");
    if subject.is_empty() {
        return None;
    }
    let body = text_field(payload, "body");
    Some(if body.is_empty() {
        subject.to_string()
    } else {
        format!("{subject}\n\n{body}")
    })
}

/// Plain-text rendering of a finished run.
pub fn render_outcome(outcome: &AgentOutcome) -> String {
    match outcome {
        AgentOutcome::Submitted { tool, payload } => match tool.as_str() {
            "submit_commit" => commit_message(payload).unwrap_or_default(),
            "submit_pr" => format!(
                "# {}\n\n{}",
                text_field(payload, "title"),
                text_field(payload, "description")
            ),
            "submit_report" => {
                let mut report = text_field(payload, "summary").to_string();
                let highlights: Vec<&str> = payload
                    .get("highlights")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                if !highlights.is_empty() {
                    report.push_str("\n\n");
                    report.push_str(
                        &highlights
                            .iter()
                            .map(|item| format!("- {}", item.trim()))
                            .collect::<Vec<_>>()
                            .join("\n"),
                    );
                }
                report
            }
            _ => serde_json::to_string_pretty(payload).unwrap_or_default(),
        },
        AgentOutcome::Answer { text } => text.trim().to_string(),
        AgentOutcome::Cancelled => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_carry_the_language() {
        for prompt in [
            commit_system_prompt("French"),
            pr_system_prompt("French"),
            report_system_prompt("French"),
            debug_system_prompt("French", false),
        ] {
            assert!(prompt.contains("Write all generated text in French."));
        }
        assert!(debug_system_prompt("English", true).contains("write_file"));
        assert!(debug_system_prompt("English", false).contains("read-only"));
    }

    #[test]
    fn context_is_appended_only_when_present() {
        assert_eq!(with_context("Task".into(), None), "Task");
        assert_eq!(with_context("Task".into(), Some("   ")), "Task");
        assert_eq!(
            with_context("Task".into(), Some(" fixes #12 ")),
            "Task\n\nAdditional context from the user:\nfixes #12"
        );
    }

    #[test]
    fn commit_payload_renders_subject_and_body() {
        assert_eq!(
            commit_message(&json!({"subject": "fix(io): close handles", "body": "Leaked on error."})),
            Some("fix(io): close handles\n\nLeaked on error.".to_string())
        );
        assert_eq!(
            commit_message(&json!({"subject": "chore: bump deps", "body": ""})),
            Some("chore: bump deps".to_string())
        );
        assert_eq!(commit_message(&json!({"body": "no subject"})), None);
    }

    #[test]
    fn pr_and_report_payloads_render_as_markdown() {
        let pr = AgentOutcome::Submitted {
            tool: "submit_pr".into(),
            payload: json!({"title": "Add retry", "description": "Retries transient errors."}),
        };
        assert_eq!(render_outcome(&pr), "# Add retry\n\nRetries transient errors.");

        let report = AgentOutcome::Submitted {
            tool: "submit_report".into(),
            payload: json!({"summary": "Busy week.", "highlights": ["Parser", " Docs "]}),
        };
        assert_eq!(render_outcome(&report), "Busy week.\n\n- Parser\n- Docs");

        let answer = AgentOutcome::Answer {
            text: "\nRoot cause: stale cache.\n".into(),
        };
        assert_eq!(render_outcome(&answer), "Root cause: stale cache.");
    }

    #[test]
    fn terminal_tools_require_their_fields() {
        assert_eq!(commit_tool().name(), "submit_commit");
        assert_eq!(pr_tool().schema.parameters["required"], json!(["title", "description"]));
        assert_eq!(report_tool().schema.parameters["required"], json!(["summary", "highlights"]));
    }
}
