use super::SessionCommands;
use crate::config::AppConfig;
use anyhow::{Context, Result};
use gitsage_agent_core::{FileSessionStore, Role, Session, SessionStore, SessionSummary};

const PREVIEW_CHARS: usize = 120;

pub async fn run(config: &AppConfig, command: SessionCommands) -> Result<()> {
    let store = FileSessionStore::new(config.sessions_dir());
    execute(&store, config.sessions.max_keep, command).await
}

async fn execute(store: &dyn SessionStore, max_keep: usize, command: SessionCommands) -> Result<()> {
    match command {
        SessionCommands::List => {
            let sessions = store.list().await.context("failed to list sessions")?;
            print!("{}", format_list(&sessions));
        }
        SessionCommands::Show { id } => {
            let session = store
                .load(&id)
                .await
                .with_context(|| format!("failed to load session {id}"))?;
            print!("{}", format_session(&session));
        }
        SessionCommands::Delete { id } => {
            store
                .delete(&id)
                .await
                .with_context(|| format!("failed to delete session {id}"))?;
            println!("Deleted session {id}");
        }
        SessionCommands::Prune { keep } => {
            let keep = keep.unwrap_or(max_keep);
            let removed = store
                .cleanup_old(keep)
                .await
                .context("failed to prune sessions")?;
            println!("Removed {removed} session(s), kept the newest {keep}");
        }
    }
    Ok(())
}

fn format_list(sessions: &[SessionSummary]) -> String {
    if sessions.is_empty() {
        return "No sessions stored.\n".to_string();
    }

    let mut out = format!(
        "{:<36} {:<8} {:>10} {:>8}  {}\n",
        "ID", "AGENT", "ITERATIONS", "MESSAGES", "UPDATED"
    );
    for summary in sessions {
        out.push_str(&format!(
            "{:<36} {:<8} {:>10} {:>8}  {}\n",
            summary.id,
            summary.agent_type,
            format!("{}/{}", summary.iteration_count, summary.max_iterations),
            summary.message_count,
            summary.updated_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    out
}

fn preview(content: &str) -> String {
    let line = content.lines().find(|line| !line.trim().is_empty()).unwrap_or("").trim();
    if line.chars().count() > PREVIEW_CHARS {
        let truncated: String = line.chars().take(PREVIEW_CHARS).collect();
        format!("{truncated}...")
    } else {
        line.to_string()
    }
}

fn format_session(session: &Session) -> String {
    let mut out = format!(
        "Session:    {}\nAgent:      {}\nIterations: {}/{}\nTokens:     {}\nCreated:    {}\nUpdated:    {}\n",
        session.id,
        session.agent_type,
        session.iteration_count,
        session.max_iterations,
        session.token_usage.total_tokens,
        session.created_at.format("%Y-%m-%d %H:%M:%S"),
        session.updated_at.format("%Y-%m-%d %H:%M:%S"),
    );
    for (key, value) in &session.metadata {
        out.push_str(&format!("  {key}: {value}\n"));
    }

    out.push_str(&format!("\nMessages ({}):\n", session.messages.len()));
    for (index, message) in session.messages.iter().enumerate() {
        let detail = match message.role {
            Role::Assistant if message.has_tool_calls() => {
                let names: Vec<&str> = message.tool_calls.iter().map(|c| c.name.as_str()).collect();
                format!("calls {}", names.join(", "))
            }
            Role::Tool => format!(
                "[{}] {}",
                message.tool_call_id.as_deref().unwrap_or("?"),
                preview(&message.content)
            ),
            _ => preview(&message.content),
        };
        out.push_str(&format!("{:>3}. {:<9} {}\n", index + 1, message.role, detail));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitsage_agent_core::{InMemorySessionStore, Message, ToolCallRequest};

    fn sample(id: &str) -> Session {
        let mut session = Session::new(id, "commit", 10);
        session.iteration_count = 2;
        session.messages = vec![
            Message::system("You write commit messages."),
            Message::user("Write the commit message."),
            Message::assistant(
                "",
                vec![ToolCallRequest {
                    id: "tc_1".into(),
                    index: 0,
                    name: "git_diff".into(),
                    arguments: "{}".into(),
                }],
            ),
            Message::tool_result("tc_1", "\ndiff --git a/src/lib.rs b/src/lib.rs\n+fn x() {}"),
        ];
        session
            .metadata
            .insert("branch".to_string(), "main".to_string());
        session
    }

    #[test]
    fn session_view_summarises_each_message() {
        let view = format_session(&sample("commit-20260101-000000-aaaaaa"));
        assert!(view.contains("Iterations: 2/10"));
        assert!(view.contains("  branch: main"));
        assert!(view.contains("Messages (4):"));
        assert!(view.contains("  3. assistant calls git_diff"));
        assert!(view.contains("  4. tool      [tc_1] diff --git a/src/lib.rs b/src/lib.rs"));
    }

    #[test]
    fn previews_are_single_line_and_bounded() {
        let long = "x".repeat(PREVIEW_CHARS + 10);
        assert_eq!(preview(&format!("\n\n{long}\nsecond")).chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview("  short  "), "short");
    }

    #[test]
    fn empty_list_says_so() {
        assert_eq!(format_list(&[]), "No sessions stored.\n");
    }

    #[tokio::test]
    async fn delete_and_prune_go_through_the_store() {
        let store = InMemorySessionStore::new();
        for id in ["commit-20260101-000000-aaaaaa", "commit-20260101-000001-bbbbbb"] {
            if let Err(error) = store.save(&sample(id)).await {
                panic!("save failed: {error}");
            }
        }

        let deleted = execute(
            &store,
            50,
            SessionCommands::Delete {
                id: "commit-20260101-000000-aaaaaa".into(),
            },
        )
        .await;
        assert!(deleted.is_ok());
        assert!(
            execute(
                &store,
                50,
                SessionCommands::Show {
                    id: "commit-20260101-000000-aaaaaa".into()
                }
            )
            .await
            .is_err()
        );

        assert!(execute(&store, 50, SessionCommands::Prune { keep: Some(0) }).await.is_ok());
        assert_eq!(store.list().await.map(|list| list.len()).ok(), Some(0));
    }
}
