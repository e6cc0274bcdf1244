//! The artifact-producing commands: commit, pr, report and debug.

use super::Exit;
use super::runner::{AgentRun, INTERRUPT_GRACE, RunExit};
use crate::config::AppConfig;
use crate::prompts;
use anyhow::{Context, Result, bail};
use gitsage_agent_core::{
    AgentConfig, AgentOutcome, FileSessionStore, FinalAnswerPolicy, Seed, SessionStore,
    TerminalTool, ToolRegistry, generate_session_id,
};
use gitsage_ai::OpenAiClient;
use gitsage_shared::{GitCli, GitExecutor, Workspace, repository_tools};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Commit count inspected by `report` when no `--since` is given.
const DEFAULT_REPORT_COMMITS: usize = 30;

/// Agent settings shared by every command, specialised per agent.
pub fn agent_config(
    app: &AppConfig,
    agent_type: &str,
    system_prompt: String,
    terminal_tool: Option<TerminalTool>,
) -> Result<AgentConfig> {
    let mut config = AgentConfig::new(agent_type, system_prompt);
    config.max_iterations = app.agent.max_iterations;
    config.retry = app.retry_config()?;
    config.history = app.history_config();
    config.final_answer = if terminal_tool.is_some() {
        FinalAnswerPolicy::RequireTerminalTool
    } else {
        FinalAnswerPolicy::AcceptText
    };
    config.terminal_tool = terminal_tool;
    Ok(config)
}

/// Resume an existing session, or start a fresh one with a new id.
pub fn seed(
    agent_type: &str,
    resume: Option<String>,
    task: impl FnOnce() -> String,
    metadata: BTreeMap<String, String>,
) -> Seed {
    match resume {
        Some(session_id) => Seed::Resume { session_id },
        None => Seed::Fresh {
            session_id: generate_session_id(agent_type),
            task: task(),
            metadata,
        },
    }
}

struct Repository {
    git: Arc<GitCli>,
    workspace: Workspace,
}

async fn open_repository() -> Result<Repository> {
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let git = GitCli::discover(&cwd)
        .await
        .context("gitsage must run inside a git repository")?;
    let workspace = Workspace::new(git.repo_root()).with_context(|| {
        format!("failed to open repository at {}", git.repo_root().display())
    })?;
    Ok(Repository {
        git: Arc::new(git),
        workspace,
    })
}

fn base_metadata(command: &str, branch: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("command".to_string(), command.to_string()),
        ("branch".to_string(), branch.to_string()),
    ])
}

/// Run the agent and print its result. Returns the rendered output of a
/// finished run.
async fn run_and_report(
    app: &AppConfig,
    command: &str,
    config: AgentConfig,
    tools: ToolRegistry,
    seed: Seed,
) -> Result<Option<AgentOutcome>> {
    let model = OpenAiClient::new(app.openai_config()).context("failed to create model client")?;
    let store = FileSessionStore::new(app.sessions_dir());
    let session_id = seed.session_id().to_string();

    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {error}");
            std::future::pending::<()>().await;
        }
    };

    let run = AgentRun {
        model: &model,
        tools: &tools,
        config: &config,
        store: &store,
        seed,
        verbose: app.debug,
    };
    let exit = run.execute(interrupt, INTERRUPT_GRACE).await;

    let outcome = match exit {
        Ok(RunExit::Finished(result)) => {
            tracing::debug!(
                session_id = %result.session_id,
                iterations = result.iterations,
                tokens = result.total_usage.total_tokens,
                "run finished"
            );
            Some(result.outcome)
        }
        Ok(RunExit::Interrupted { session_id }) => {
            eprintln!("Session saved. Resume with:\n  gitsage {command} --resume {session_id}");
            None
        }
        Err(error) => {
            tracing::error!(session_id = %session_id, "run failed: {error}");
            eprintln!("Session {session_id} was kept. Resume with:\n  gitsage {command} --resume {session_id}");
            return Err(error.into());
        }
    };

    prune_sessions(&store, app.sessions.max_keep).await;
    Ok(outcome)
}

pub(crate) async fn prune_sessions(store: &dyn SessionStore, max_keep: usize) {
    if max_keep == 0 {
        return;
    }
    match store.cleanup_old(max_keep).await {
        Ok(0) => {}
        Ok(removed) => tracing::debug!(removed, max_keep, "pruned old sessions"),
        Err(error) => tracing::warn!("failed to prune old sessions: {error}"),
    }
}

fn print_outcome(outcome: Option<AgentOutcome>) -> Exit {
    match outcome {
        Some(AgentOutcome::Cancelled) | None => Exit::Interrupted,
        Some(outcome) => {
            println!("{}", prompts::render_outcome(&outcome));
            Exit::Success
        }
    }
}

pub async fn commit(
    app: &AppConfig,
    resume: Option<String>,
    context: Option<String>,
    apply: bool,
) -> Result<Exit> {
    let repo = open_repository().await?;

    if resume.is_none() && repo.git.diff_cached().await?.trim().is_empty() {
        bail!("no staged changes; stage files with `git add` first");
    }
    let branch = repo.git.current_branch().await.unwrap_or_default();

    let config = agent_config(
        app,
        prompts::COMMIT_AGENT,
        prompts::commit_system_prompt(&app.agent.language),
        Some(prompts::commit_tool()),
    )?;
    let seed = seed(
        prompts::COMMIT_AGENT,
        resume,
        || {
            prompts::with_context(
                format!("Write the commit message for the changes staged on branch `{branch}`."),
                context.as_deref(),
            )
        },
        base_metadata(prompts::COMMIT_AGENT, &branch),
    );
    let tools = repository_tools(repo.workspace.clone(), repo.git.clone(), false);

    let outcome = run_and_report(app, prompts::COMMIT_AGENT, config, tools, seed).await?;

    let message = match &outcome {
        Some(AgentOutcome::Submitted { payload, .. }) => prompts::commit_message(payload),
        _ => None,
    };
    let exit = print_outcome(outcome);

    if apply && let Some(message) = message {
        let output = repo
            .git
            .commit(&message)
            .await
            .context("failed to commit")?;
        eprintln!("{}", output.trim_end());
    }
    Ok(exit)
}

pub async fn pr(
    app: &AppConfig,
    base: String,
    resume: Option<String>,
    context: Option<String>,
) -> Result<Exit> {
    let repo = open_repository().await?;
    let branch = repo
        .git
        .current_branch()
        .await
        .context("failed to read the current branch")?;
    if resume.is_none() && branch == base {
        bail!("the current branch is the base branch `{base}`; check out a feature branch first");
    }

    let config = agent_config(
        app,
        prompts::PR_AGENT,
        prompts::pr_system_prompt(&app.agent.language),
        Some(prompts::pr_tool()),
    )?;
    let mut metadata = base_metadata(prompts::PR_AGENT, &branch);
    metadata.insert("base".to_string(), base.clone());
    let seed = seed(
        prompts::PR_AGENT,
        resume,
        || {
            prompts::with_context(
                format!(
                    "Write the pull request for branch `{branch}` against `{base}`. \
                     Start with git_diff using base `{base}` and git_log with range `{base}..HEAD`."
                ),
                context.as_deref(),
            )
        },
        metadata,
    );
    let tools = repository_tools(repo.workspace, repo.git, false);

    let outcome = run_and_report(app, prompts::PR_AGENT, config, tools, seed).await?;
    Ok(print_outcome(outcome))
}

pub async fn report(
    app: &AppConfig,
    since: Option<String>,
    resume: Option<String>,
    context: Option<String>,
) -> Result<Exit> {
    let repo = open_repository().await?;
    let branch = repo.git.current_branch().await.unwrap_or_default();
    let author = repo
        .git
        .current_user()
        .await
        .ok()
        .filter(|user| !user.is_empty());

    let config = agent_config(
        app,
        prompts::REPORT_AGENT,
        prompts::report_system_prompt(&app.agent.language),
        Some(prompts::report_tool()),
    )?;
    let mut metadata = base_metadata(prompts::REPORT_AGENT, &branch);
    if let Some(since) = &since {
        metadata.insert("since".to_string(), since.clone());
    }
    let seed = seed(
        prompts::REPORT_AGENT,
        resume,
        || {
            let range = match &since {
                Some(since) => format!("the commits in `{since}..HEAD`"),
                None => format!("the last {DEFAULT_REPORT_COMMITS} commits on `{branch}`"),
            };
            let audience = match &author {
                Some(author) => format!(" The report is written for {author}."),
                None => String::new(),
            };
            prompts::with_context(
                format!("Write a work report covering {range}.{audience}"),
                context.as_deref(),
            )
        },
        metadata,
    );
    let tools = repository_tools(repo.workspace, repo.git, false);

    let outcome = run_and_report(app, prompts::REPORT_AGENT, config, tools, seed).await?;
    Ok(print_outcome(outcome))
}

pub async fn debug(
    app: &AppConfig,
    problem: Option<String>,
    resume: Option<String>,
    allow_write: bool,
) -> Result<Exit> {
    let repo = open_repository().await?;
    let branch = repo.git.current_branch().await.unwrap_or_default();

    let config = agent_config(
        app,
        prompts::DEBUG_AGENT,
        prompts::debug_system_prompt(&app.agent.language, allow_write),
        None,
    )?;
    let seed = seed(
        prompts::DEBUG_AGENT,
        resume,
        || problem.unwrap_or_default(),
        base_metadata(prompts::DEBUG_AGENT, &branch),
    );
    let tools = repository_tools(repo.workspace, repo.git, allow_write);

    let outcome = run_and_report(app, prompts::DEBUG_AGENT, config, tools, seed).await?;
    Ok(print_outcome(outcome))
}
