use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agents::{Agent, AgentId, Registry};
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result, ToolError, ToolExecutionError, ToolResult};
use crate::history::{HistoryStore, InvocationOutcome, Message, ToolInvocation, Turn, TurnOutcome};
use crate::llm::{DecisionProcedure, DecisionRequest, ToolCall, ToolCallResult, ToolRound};
use crate::storage::ArtifactRef;
use crate::tools::{ToolDefinition, ToolExecutor, ToolInput, ToolOutput};

/// Result of one turn as handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub turn_id: String,
    pub agent_id: AgentId,
    pub text: String,
    pub artifacts: Vec<ArtifactRef>,
    pub invocations: Vec<ToolInvocation>,
}

struct TurnDraft {
    text: Option<String>,
    invocations: Vec<ToolInvocation>,
}

/// Calls issued so far in a turn and the ones that have finished, slot per call.
#[derive(Default)]
struct TurnProgress {
    calls: Vec<ToolCall>,
    finished: Vec<Option<ToolInvocation>>,
}

impl TurnProgress {
    fn start(&mut self, calls: &[ToolCall]) {
        self.calls = calls.to_vec();
        self.finished = vec![None; calls.len()];
    }

    fn finish(&mut self, slot: usize, invocation: ToolInvocation) {
        if let Some(entry) = self.finished.get_mut(slot) {
            *entry = Some(invocation);
        }
    }

    /// Finished invocations, with calls still running reported as cancelled.
    fn settle(&self, elapsed: Duration) -> Vec<ToolInvocation> {
        self.calls
            .iter()
            .zip(&self.finished)
            .map(|(call, done)| {
                done.clone()
                    .unwrap_or_else(|| record_invocation(call, Err(ToolError::Cancelled), elapsed))
            })
            .collect()
    }
}

/// The agent/tool dispatch loop.
pub struct Dispatcher {
    registry: Arc<Registry>,
    decider: Arc<dyn DecisionProcedure>,
    executor: Arc<ToolExecutor>,
    history: Arc<dyn HistoryStore>,
    turn_timeout: Duration,
    cancel_grace: Duration,
    history_window: usize,
    max_tool_calls: usize,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        decider: Arc<dyn DecisionProcedure>,
        executor: Arc<ToolExecutor>,
        history: Arc<dyn HistoryStore>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            decider,
            executor,
            history,
            turn_timeout: config.turn_timeout,
            cancel_grace: config.cancel_grace,
            history_window: config.history_window,
            max_tool_calls: config.max_tool_calls,
        }
    }

    /// Runs one turn for `agent_id`.
    ///
    /// Resolution and decision-procedure failures abort the turn without touching
    /// history. Every other outcome, including timeouts and turns where every tool
    /// call failed, is appended exactly once.
    pub async fn handle(&self, agent_id: &str, message: &str) -> Result<Reply> {
        let (agent, tools) = self.registry.resolve(agent_id).await?;
        let history = self.history.recent_messages(&agent.id, self.history_window).await?;

        let turn_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();
        let caller = Message::caller(message);
        info!("Turn {} started for agent {} ({} tools)", turn_id, agent.id, tools.len());

        let cancel = CancellationToken::new();
        let progress = Mutex::new(TurnProgress::default());
        let work = self.run_turn(&agent, &tools, history, message, &cancel, &progress);
        tokio::pin!(work);

        let draft = tokio::select! {
            result = &mut work => result?,
            _ = tokio::time::sleep(self.turn_timeout) => {
                warn!("Turn {} timed out after {:?}, cancelling tool calls", turn_id, self.turn_timeout);
                cancel.cancel();
                if tokio::time::timeout(self.cancel_grace, &mut work).await.is_err() {
                    debug!("Turn {} did not settle within {:?}", turn_id, self.cancel_grace);
                }

                let invocations = progress.lock().await.settle(clock.elapsed());
                let mut messages = vec![caller];
                messages.extend(invocations.iter().map(tool_message));
                let turn = Turn {
                    id: turn_id.clone(),
                    agent_id: agent.id.clone(),
                    started_at,
                    completed_at: Utc::now(),
                    messages,
                    invocations,
                    outcome: TurnOutcome::Timeout,
                };
                if let Err(e) = self.history.append(&agent.id, turn).await {
                    error!("Failed to record timed out turn {}: {}", turn_id, e);
                }
                return Err(DispatchError::Timeout {
                    turn_id,
                    after: self.turn_timeout,
                });
            }
        };

        let TurnDraft { text, invocations } = draft;
        let mut messages = vec![caller];
        messages.extend(invocations.iter().map(tool_message));

        let all_failed = !invocations.is_empty() && invocations.iter().all(|i| !i.succeeded());
        if all_failed && text.is_none() {
            let failures: Vec<ToolExecutionError> = invocations.iter().filter_map(execution_error).collect();
            warn!("Turn {} failed: all {} tool calls failed", turn_id, failures.len());

            let turn = Turn {
                id: turn_id.clone(),
                agent_id: agent.id.clone(),
                started_at,
                completed_at: Utc::now(),
                messages,
                invocations,
                outcome: TurnOutcome::Failed {
                    reason: format!("all {} tool calls failed", failures.len()),
                },
            };
            self.history.append(&agent.id, turn).await?;
            return Err(DispatchError::TurnFailed { turn_id, failures });
        }

        let text = text.unwrap_or_default();
        if !text.is_empty() {
            messages.push(Message::agent(text.clone()));
        }
        let artifacts: Vec<ArtifactRef> = invocations.iter().flat_map(|i| i.artifacts().to_vec()).collect();

        let turn = Turn {
            id: turn_id.clone(),
            agent_id: agent.id.clone(),
            started_at,
            completed_at: Utc::now(),
            messages,
            invocations: invocations.clone(),
            outcome: TurnOutcome::Completed,
        };
        self.history.append(&agent.id, turn).await?;

        info!(
            "Turn {} completed for agent {}: {} tool calls, {} artifacts",
            turn_id,
            agent.id,
            invocations.len(),
            artifacts.len()
        );
        Ok(Reply {
            turn_id,
            agent_id: agent.id.clone(),
            text,
            artifacts,
            invocations,
        })
    }

    async fn run_turn(
        &self,
        agent: &Agent,
        tools: &[ToolDefinition],
        history: Vec<Message>,
        message: &str,
        cancel: &CancellationToken,
        progress: &Mutex<TurnProgress>,
    ) -> Result<TurnDraft> {
        let mut request = DecisionRequest {
            instructions: agent.instructions.clone(),
            history,
            catalog: tools.iter().map(ToolDefinition::catalog_entry).collect(),
            message: message.to_string(),
            tool_round: None,
        };

        let first = self.decider.decide(request.clone()).await?;
        let preamble = non_empty(first.text);
        if first.tool_calls.is_empty() {
            return Ok(TurnDraft {
                text: preamble,
                invocations: Vec::new(),
            });
        }

        debug!("Agent {} requested {} tool calls", agent.id, first.tool_calls.len());
        progress.lock().await.start(&first.tool_calls);

        // run concurrently, collect in request order
        let invocations = join_all(first.tool_calls.iter().enumerate().map(|(slot, call)| async move {
            let started = Instant::now();
            let result = if slot >= self.max_tool_calls {
                Err(ToolError::InvalidArguments(format!(
                    "more than {} tool calls in one turn",
                    self.max_tool_calls
                )))
            } else {
                self.run_call(call, tools, cancel).await
            };
            let invocation = record_invocation(call, result, started.elapsed());
            progress.lock().await.finish(slot, invocation.clone());
            invocation
        }))
        .await;

        request.tool_round = Some(ToolRound {
            preamble: preamble.clone(),
            calls: first.tool_calls,
            results: invocations.iter().map(call_result).collect(),
        });

        let last = self.decider.decide(request).await?;
        if !last.tool_calls.is_empty() {
            warn!(
                "Ignoring {} tool calls from the follow-up decision for agent {}",
                last.tool_calls.len(),
                agent.id
            );
        }

        Ok(TurnDraft {
            text: non_empty(last.text).or(preamble),
            invocations,
        })
    }

    async fn run_call(
        &self,
        call: &ToolCall,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> ToolResult<ToolOutput> {
        let Some(tool) = tools.iter().find(|t| t.id == call.tool_id) else {
            warn!("Refusing call {} to tool {} outside the agent's catalog", call.id, call.tool_id);
            return Err(ToolError::ToolNotFound(call.tool_id.clone()));
        };

        tool.validate_arguments(&call.arguments)?;
        let input = ToolInput::parse(tool.kind, &call.arguments)?;
        self.executor.execute(input, cancel).await
    }
}

fn record_invocation(call: &ToolCall, result: ToolResult<ToolOutput>, elapsed: Duration) -> ToolInvocation {
    let outcome = match result {
        Ok(output) => InvocationOutcome::Succeeded {
            summary: output.summary,
            artifacts: output.artifacts,
        },
        Err(error) => {
            warn!("Tool call {} ({}) failed: {}", call.id, call.tool_id, error);
            InvocationOutcome::Failed { error }
        }
    };
    ToolInvocation {
        call_id: call.id.clone(),
        tool_id: call.tool_id.clone(),
        arguments: call.arguments.clone(),
        outcome,
        duration_ms: elapsed.as_millis() as u64,
    }
}

fn call_result(invocation: &ToolInvocation) -> ToolCallResult {
    let (content, is_error) = match &invocation.outcome {
        InvocationOutcome::Succeeded { summary, .. } => (summary.clone(), false),
        InvocationOutcome::Failed { error } => (format!("Error ({}): {}", error.kind(), error), true),
    };
    ToolCallResult {
        call_id: invocation.call_id.clone(),
        tool_id: invocation.tool_id.clone(),
        content,
        is_error,
    }
}

fn tool_message(invocation: &ToolInvocation) -> Message {
    let result = call_result(invocation);
    Message::tool(format!("{}: {}", result.tool_id, result.content))
}

fn execution_error(invocation: &ToolInvocation) -> Option<ToolExecutionError> {
    match &invocation.outcome {
        InvocationOutcome::Failed { error } => Some(ToolExecutionError {
            tool_id: invocation.tool_id.clone(),
            call_id: invocation.call_id.clone(),
            error: error.clone(),
        }),
        InvocationOutcome::Succeeded { .. } => None,
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.trim().is_empty())
}
