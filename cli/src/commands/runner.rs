//! Runs one agent to completion or interruption.
//!
//! The loop and the interrupt listener share only the cancellation token.
//! On interrupt the token is cancelled, the loop gets a grace period to reach
//! a checkpoint, and the session is saved from the seed if the loop never
//! wrote one.

use gitsage_agent_core::{
    AgentConfig, AgentError, AgentEvent, AgentLoopResult, AgentOutcome, AgentRunContext,
    Message, ModelClient, Seed, Session, SessionStore, SessionStoreError, ToolRegistry, run_agent,
};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const INTERRUPT_GRACE: Duration = Duration::from_secs(5);
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug)]
pub enum RunExit {
    Finished(AgentLoopResult),
    Interrupted { session_id: String },
}

/// Everything needed to drive one agent run.
pub struct AgentRun<'a> {
    pub model: &'a dyn ModelClient,
    pub tools: &'a ToolRegistry,
    pub config: &'a AgentConfig,
    pub store: &'a dyn SessionStore,
    pub seed: Seed,
    pub verbose: bool,
}

impl AgentRun<'_> {
    /// Drive the loop until it returns or `interrupt` resolves.
    pub async fn execute(
        self,
        interrupt: impl Future<Output = ()>,
        grace: Duration,
    ) -> Result<RunExit, AgentError> {
        let session_id = self.seed.session_id().to_string();
        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel(256);
        let printer = tokio::spawn(print_events(event_rx, self.verbose));

        let mut run = Box::pin(run_agent(
            AgentRunContext::new(),
            self.model,
            self.tools,
            self.config,
            self.seed.clone(),
            self.store,
            event_tx,
            cancel.clone(),
        ));
        tokio::pin!(interrupt);

        let result = tokio::select! {
            result = &mut run => Some(result),
            _ = &mut interrupt => None,
        };

        let exit = match result {
            Some(Ok(result)) if result.outcome == AgentOutcome::Cancelled => {
                Ok(RunExit::Interrupted { session_id })
            }
            Some(Ok(result)) => Ok(RunExit::Finished(result)),
            Some(Err(error)) => Err(error),
            None => {
                eprintln!("[info] Interrupted, saving session...");
                cancel.cancel();
                match tokio::time::timeout(grace, &mut run).await {
                    Ok(Ok(_)) | Ok(Err(AgentError::Cancelled)) => {}
                    Ok(Err(error)) => {
                        tracing::warn!("agent returned an error while stopping: {error}");
                    }
                    Err(_) => {
                        tracing::warn!(?grace, "agent did not stop within the grace period");
                    }
                }
                ensure_session_saved(self.store, self.config, &self.seed).await?;
                Ok(RunExit::Interrupted { session_id })
            }
        };

        // Dropping the loop drops its event sender, which ends the printer.
        drop(run);
        let _ = printer.await;
        exit
    }
}

/// Save a snapshot built from the seed when the store has no record of the
/// session yet.
pub async fn ensure_session_saved(
    store: &dyn SessionStore,
    config: &AgentConfig,
    seed: &Seed,
) -> Result<(), SessionStoreError> {
    let session_id = seed.session_id();
    match store.load(session_id).await {
        Ok(_) => return Ok(()),
        Err(SessionStoreError::NotFound(_)) => {}
        Err(error) => return Err(error),
    }

    let mut session = Session::new(session_id, &config.agent_type, config.max_iterations);
    if let Seed::Fresh { task, metadata, .. } = seed {
        session.messages = vec![
            Message::system(&config.system_prompt),
            Message::user(task.as_str()),
        ];
        session.metadata = metadata.clone();
    }
    tracing::debug!(session_id, "saving seed snapshot of interrupted session");
    store.save(&session).await
}

async fn print_events(mut events: mpsc::Receiver<AgentEvent>, verbose: bool) {
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::RunStarted {
                session_id,
                resumed,
            } => {
                let verb = if resumed { "Resuming" } else { "Starting" };
                eprintln!("[info] {verb} session {session_id}");
            }
            AgentEvent::IterationStarted {
                iteration,
                max_iterations,
            } if verbose => {
                eprintln!("[info] Iteration {iteration}/{max_iterations}");
            }
            AgentEvent::ToolExecutionStarted { tool_name, .. } => {
                eprintln!("  -> {tool_name}");
            }
            AgentEvent::ToolExecutionCompleted {
                tool_name,
                is_error: true,
                ..
            } => {
                eprintln!("[warning] {tool_name} failed");
            }
            AgentEvent::RetryAttempt {
                attempt,
                delay_ms,
                reason,
            } => {
                eprintln!("[warning] Attempt {attempt} failed ({reason}); retrying in {delay_ms} ms");
            }
            AgentEvent::HistoryCompressed {
                messages_before,
                messages_after,
            } if verbose => {
                eprintln!("[info] Compressed history from {messages_before} to {messages_after} messages");
            }
            AgentEvent::RunCompleted {
                iterations,
                total_usage,
                ..
            } if verbose => {
                eprintln!(
                    "[info] Done after {iterations} iterations ({} tokens)",
                    total_usage.total_tokens
                );
            }
            _ => {}
        }
    }
}
