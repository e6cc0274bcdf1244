use crate::{
    classify::is_context_limit_error,
    error::AgentError,
    history::{Compression, HistoryTransform, RepairToolPairs},
    model::{ModelClient, ModelError},
    retry::{RetryError, with_retry_notify},
    session::{Session, SessionStore},
    stream::{AccumulatedResponse, accumulate_stream},
    tools::{ToolError, ToolRegistry, parse_arguments},
    types::{
        AgentConfig, AgentEvent, AgentLoopResult, AgentOutcome, AgentRunContext,
        FinalAnswerPolicy, Message, Role, Seed, TokenUsage, ToolCallRequest, ToolSchema,
    },
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const CANCELLED_RESULT: &str = "Error: cancelled";
pub const SKIPPED_RESULT: &str = "Error: skipped";
pub const SUBMITTED_RESULT: &str = "Submitted.";

enum DispatchOutcome {
    Continue,
    Submitted(AgentOutcome),
    Cancelled,
}

/// Drive one agent run to a terminal tool call, a free-text answer, an
/// error or cancellation.
///
/// The session is checkpointed before the first inference and after every
/// completed iteration. A cancelled run returns `Ok` with
/// [`AgentOutcome::Cancelled`] once the last consistent conversation is saved.
#[allow(clippy::too_many_arguments)]
pub async fn run_agent(
    run: AgentRunContext,
    model: &dyn ModelClient,
    tools: &ToolRegistry,
    config: &AgentConfig,
    seed: Seed,
    store: &dyn SessionStore,
    event_tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
) -> Result<AgentLoopResult, AgentError> {
    config.validate()?;
    let resumed = matches!(seed, Seed::Resume { .. });
    let mut session = seed_session(config, seed, store).await?;

    tracing::debug!(
        run_id = %run.run_id,
        session_id = %session.id,
        agent = %config.agent_type,
        resumed,
        "agent run started"
    );
    emit(
        &event_tx,
        AgentEvent::RunStarted {
            session_id: session.id.clone(),
            resumed,
        },
    )
    .await;

    checkpoint(store, &event_tx, &mut session).await?;

    let schemas = advertised_tools(tools, config);
    let persistent = config.history.persistent_pipeline();
    let mut total_usage = TokenUsage::default();
    let mut iterations = 0usize;
    let mut overflow_compacted = false;

    loop {
        if cancel.is_cancelled() {
            return finish_cancelled(store, &event_tx, session, iterations, total_usage).await;
        }

        if iterations >= config.max_iterations {
            checkpoint(store, &event_tx, &mut session).await?;
            tracing::error!(
                session_id = %session.id,
                max_iterations = config.max_iterations,
                "iteration budget exhausted"
            );
            return Err(AgentError::IterationBudgetExhausted {
                max_iterations: config.max_iterations,
            });
        }

        let iteration = iterations + 1;
        tracing::debug!(session_id = %session.id, iteration, "iteration started");
        emit(
            &event_tx,
            AgentEvent::IterationStarted {
                iteration,
                max_iterations: config.max_iterations,
            },
        )
        .await;

        let progress = config
            .inject_progress
            .then(|| progress_note(&session.messages, iteration, config.max_iterations));
        let request = config
            .history
            .request_pipeline(progress)
            .apply(session.messages.clone());

        let response = match infer(model, &request, &schemas, config, &event_tx, &cancel).await {
            Ok(response) => response,
            Err(RetryError::Cancelled)
            | Err(RetryError::Failed {
                source: ModelError::Cancelled,
                ..
            }) => {
                return finish_cancelled(store, &event_tx, session, iterations, total_usage).await;
            }
            Err(error) => {
                let overflow = error
                    .last_error()
                    .is_some_and(|source| is_context_limit_error(&source.to_string()));
                if overflow && !overflow_compacted {
                    overflow_compacted = true;
                    let before = session.messages.len();
                    session.messages = compact_for_overflow(std::mem::take(&mut session.messages));
                    tracing::warn!(
                        session_id = %session.id,
                        before,
                        after = session.messages.len(),
                        "context limit reached, compacting history"
                    );
                    emit(
                        &event_tx,
                        AgentEvent::HistoryCompressed {
                            messages_before: before,
                            messages_after: session.messages.len(),
                        },
                    )
                    .await;
                    continue;
                }

                checkpoint(store, &event_tx, &mut session).await?;
                tracing::error!(session_id = %session.id, "inference failed: {error}");
                return Err(error.into());
            }
        };

        total_usage.add(&response.usage);
        session.token_usage.add(&response.usage);

        let calls = response.message.tool_calls.clone();
        let text = response.message.content.clone();
        session.messages.push(response.message);
        iterations += 1;
        session.iteration_count += 1;

        if calls.is_empty() {
            checkpoint(store, &event_tx, &mut session).await?;
            return match config.final_answer {
                FinalAnswerPolicy::AcceptText => {
                    finish(
                        &event_tx,
                        session,
                        iterations,
                        total_usage,
                        AgentOutcome::Answer { text },
                    )
                    .await
                }
                FinalAnswerPolicy::RequireTerminalTool => {
                    let tool = config
                        .terminal_tool
                        .as_ref()
                        .map(|terminal| terminal.name().to_string())
                        .unwrap_or_default();
                    tracing::error!(session_id = %session.id, tool = %tool, "no structured output");
                    Err(AgentError::MissingStructuredOutput { tool })
                }
            };
        }

        let dispatch = dispatch_tool_calls(
            tools,
            config,
            &calls,
            &mut session.messages,
            &event_tx,
            &cancel,
        )
        .await;

        if let DispatchOutcome::Cancelled = dispatch {
            return finish_cancelled(store, &event_tx, session, iterations, total_usage).await;
        }

        let before = session.messages.len();
        session.messages = persistent.apply(std::mem::take(&mut session.messages));
        if session.messages.len() < before {
            emit(
                &event_tx,
                AgentEvent::HistoryCompressed {
                    messages_before: before,
                    messages_after: session.messages.len(),
                },
            )
            .await;
        }

        checkpoint(store, &event_tx, &mut session).await?;

        if let DispatchOutcome::Submitted(outcome) = dispatch {
            return finish(&event_tx, session, iterations, total_usage, outcome).await;
        }
    }
}

async fn seed_session(
    config: &AgentConfig,
    seed: Seed,
    store: &dyn SessionStore,
) -> Result<Session, AgentError> {
    match seed {
        Seed::Resume { session_id } => {
            let mut session = store.load(&session_id).await?;
            if session.agent_type != config.agent_type {
                return Err(AgentError::AgentTypeMismatch {
                    session_id,
                    expected: config.agent_type.clone(),
                    found: session.agent_type,
                });
            }
            session.max_iterations = config.max_iterations;
            session.messages = RepairToolPairs.apply(session.messages);
            Ok(session)
        }
        Seed::Fresh {
            session_id,
            task,
            metadata,
        } => {
            let mut session =
                Session::new(session_id, config.agent_type.clone(), config.max_iterations);
            session.metadata = metadata;
            if !config.system_prompt.is_empty() {
                session
                    .messages
                    .push(Message::system(config.system_prompt.clone()));
            }
            session.messages.push(Message::user(task));
            Ok(session)
        }
    }
}

async fn infer(
    model: &dyn ModelClient,
    request: &[Message],
    schemas: &[ToolSchema],
    config: &AgentConfig,
    event_tx: &mpsc::Sender<AgentEvent>,
    cancel: &CancellationToken,
) -> Result<AccumulatedResponse, RetryError<ModelError>> {
    with_retry_notify(
        cancel,
        &config.retry,
        move || async move {
            let stream = model.stream_chat(request, schemas, cancel).await?;
            accumulate_stream(stream, cancel, |delta| {
                if let Some(text) = delta.content.as_deref()
                    && !text.is_empty()
                {
                    emit_now(
                        event_tx,
                        AgentEvent::TextDelta {
                            delta: text.to_string(),
                        },
                    );
                }
            })
            .await
        },
        |retry| {
            emit_now(
                event_tx,
                AgentEvent::RetryAttempt {
                    attempt: retry.attempt,
                    delay_ms: retry.delay.as_millis() as u64,
                    reason: retry.reason.clone(),
                },
            )
        },
    )
    .await
}

/// Answer every call in order. Once the terminal tool is accepted the rest
/// are skipped; on cancellation the rest are marked cancelled.
async fn dispatch_tool_calls(
    tools: &ToolRegistry,
    config: &AgentConfig,
    calls: &[ToolCallRequest],
    messages: &mut Vec<Message>,
    event_tx: &mpsc::Sender<AgentEvent>,
    cancel: &CancellationToken,
) -> DispatchOutcome {
    let terminal = config.terminal_tool.as_ref().map(|terminal| terminal.name());
    let mut submitted: Option<AgentOutcome> = None;

    for (position, call) in calls.iter().enumerate() {
        if submitted.is_some() {
            tracing::debug!(tool = %call.name, "skipping call after terminal tool");
            messages.push(Message::tool_result(call.id.clone(), SKIPPED_RESULT));
            continue;
        }

        if cancel.is_cancelled() {
            append_cancelled_placeholders(event_tx, messages, &calls[position..]).await;
            return DispatchOutcome::Cancelled;
        }

        emit(
            event_tx,
            AgentEvent::ToolExecutionStarted {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
            },
        )
        .await;

        let result = if terminal == Some(call.name.as_str()) {
            parse_arguments(&call.arguments).map(|payload| {
                submitted = Some(AgentOutcome::Submitted {
                    tool: call.name.clone(),
                    payload,
                });
                SUBMITTED_RESULT.to_string()
            })
        } else {
            execute_tool(tools, call, cancel).await
        };

        let (content, is_error) = match result {
            Ok(content) => (content, false),
            Err(ToolError::Cancelled) => {
                append_cancelled_placeholders(event_tx, messages, &calls[position..]).await;
                return DispatchOutcome::Cancelled;
            }
            Err(error) => {
                tracing::debug!(tool = %call.name, "tool call failed: {error}");
                (format!("Error: {error}"), true)
            }
        };

        messages.push(Message::tool_result(call.id.clone(), content));
        emit(
            event_tx,
            AgentEvent::ToolExecutionCompleted {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                is_error,
            },
        )
        .await;
    }

    match submitted {
        Some(outcome) => DispatchOutcome::Submitted(outcome),
        None => DispatchOutcome::Continue,
    }
}

async fn execute_tool(
    tools: &ToolRegistry,
    call: &ToolCallRequest,
    cancel: &CancellationToken,
) -> Result<String, ToolError> {
    let tool = tools
        .get(&call.name)
        .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
    let arguments = parse_arguments(&call.arguments)?;

    tokio::select! {
        _ = cancel.cancelled() => Err(ToolError::Cancelled),
        result = tool.execute(&arguments, cancel) => result,
    }
}

async fn append_cancelled_placeholders(
    event_tx: &mpsc::Sender<AgentEvent>,
    messages: &mut Vec<Message>,
    calls: &[ToolCallRequest],
) {
    for call in calls {
        messages.push(Message::tool_result(call.id.clone(), CANCELLED_RESULT));
        emit(
            event_tx,
            AgentEvent::ToolExecutionCompleted {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                is_error: true,
            },
        )
        .await;
    }
}

fn advertised_tools(tools: &ToolRegistry, config: &AgentConfig) -> Vec<ToolSchema> {
    let mut schemas = tools.schemas();
    if let Some(terminal) = &config.terminal_tool
        && tools.get(terminal.name()).is_none()
    {
        schemas.push(terminal.schema.clone());
    }
    schemas
}

fn progress_note(messages: &[Message], iteration: usize, max_iterations: usize) -> String {
    let (completed, failed) = messages
        .iter()
        .filter(|message| message.role == Role::Tool)
        .fold((0usize, 0usize), |(completed, failed), message| {
            let failed = failed + usize::from(message.content.starts_with("Error:"));
            (completed + 1, failed)
        });

    let mut note = format!(
        "Progress: iteration {iteration} of {max_iterations}. \
         Tool calls completed so far: {completed} ({failed} failed)."
    );
    if iteration == max_iterations {
        note.push_str(" This is the last iteration: finish now.");
    }
    note
}

/// Keep system messages and the newest half of the conversation.
fn compact_for_overflow(messages: Vec<Message>) -> Vec<Message> {
    let keep = (messages.len() / 2).max(1);
    RepairToolPairs.apply(Compression::new(0, keep).apply(messages))
}

async fn checkpoint(
    store: &dyn SessionStore,
    event_tx: &mpsc::Sender<AgentEvent>,
    session: &mut Session,
) -> Result<(), AgentError> {
    session.touch();
    store.save(session).await?;
    emit(
        event_tx,
        AgentEvent::CheckpointSaved {
            session_id: session.id.clone(),
            iteration: session.iteration_count,
        },
    )
    .await;
    Ok(())
}

async fn finish_cancelled(
    store: &dyn SessionStore,
    event_tx: &mpsc::Sender<AgentEvent>,
    mut session: Session,
    iterations: usize,
    total_usage: TokenUsage,
) -> Result<AgentLoopResult, AgentError> {
    tracing::debug!(session_id = %session.id, "agent run cancelled");
    checkpoint(store, event_tx, &mut session).await?;
    finish(
        event_tx,
        session,
        iterations,
        total_usage,
        AgentOutcome::Cancelled,
    )
    .await
}

async fn finish(
    event_tx: &mpsc::Sender<AgentEvent>,
    session: Session,
    iterations: usize,
    total_usage: TokenUsage,
    outcome: AgentOutcome,
) -> Result<AgentLoopResult, AgentError> {
    emit(
        event_tx,
        AgentEvent::RunCompleted {
            session_id: session.id.clone(),
            iterations,
            total_usage,
        },
    )
    .await;

    Ok(AgentLoopResult {
        session_id: session.id,
        outcome,
        iterations,
        total_usage,
        messages: session.messages,
    })
}

async fn emit(event_tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    let _ = event_tx.send(event).await;
}

/// For synchronous callbacks; drops the event when the channel is full.
fn emit_now(event_tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    let _ = event_tx.try_send(event);
}
