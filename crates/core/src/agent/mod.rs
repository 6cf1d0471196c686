use anyhow::Result;
use futures::StreamExt;
use sentinel_provider::{
    ChatRequest, ContentPart, Message, MessageContent, ModelInfo, Provider, ProviderError, Role,
    StreamEvent,
};
use tokio::sync::broadcast;

use crate::conversation::Thread;
use crate::streaming::StreamAccumulator;
use crate::tools::permission::ToolPermission;
use crate::tools::{ToolContext, ToolRegistry};

#[derive(Debug, Clone, Default)]
pub struct SessionUsage {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cache_read_tokens: u64,
    pub total_cache_creation_tokens: u64,
    pub total_cost_usd: f64,
    pub turn_input_tokens: u32,
    pub turn_output_tokens: u32,
    pub turn_cache_read_tokens: u32,
    pub turn_cache_creation_tokens: u32,
    pub turn_cost_usd: f64,
}

/// Low-level events emitted while an agent runs a turn. The orchestrator's
/// progress stream (`crate::progress`) is a coarser, review-level view built
/// on top of these, not a replacement for them.
#[derive(Clone)]
pub enum AgentEvent {
    ThinkingDelta(String),
    TextDelta(String),
    ToolCallStart {
        id: String,
        name: String,
    },
    ToolCallDelta {
        id: String,
        args_delta: String,
    },
    ToolCallDone {
        id: String,
        name: String,
        output: String,
        elapsed_ms: u64,
    },
    ToolOutputDelta {
        tool_name: String,
        delta: String,
    },
    Retrying {
        attempt: u32,
        max_retries: u32,
        wait_ms: u64,
        reason: String,
    },
    SubAgentSpawned {
        id: String,
        nickname: String,
        role: Option<String>,
    },
    SubAgentStatusChanged {
        id: String,
        nickname: String,
        status: String,
    },
    SubAgentCompleted {
        id: String,
        nickname: String,
        final_message: Option<String>,
    },
    Usage(SessionUsage),
    SystemMessage(String),
    TurnComplete,
    Error(String),
}

impl std::fmt::Debug for AgentEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ThinkingDelta(s) => f.debug_tuple("ThinkingDelta").field(s).finish(),
            Self::TextDelta(s) => f.debug_tuple("TextDelta").field(s).finish(),
            Self::ToolCallStart { id, name } => f
                .debug_struct("ToolCallStart")
                .field("id", id)
                .field("name", name)
                .finish(),
            Self::ToolCallDelta { id, args_delta } => f
                .debug_struct("ToolCallDelta")
                .field("id", id)
                .field("args_delta", args_delta)
                .finish(),
            Self::ToolCallDone {
                id,
                name,
                output,
                elapsed_ms,
            } => f
                .debug_struct("ToolCallDone")
                .field("id", id)
                .field("name", name)
                .field("output", output)
                .field("elapsed_ms", elapsed_ms)
                .finish(),
            Self::ToolOutputDelta { tool_name, delta } => f
                .debug_struct("ToolOutputDelta")
                .field("tool_name", tool_name)
                .field("delta", delta)
                .finish(),
            Self::Retrying {
                attempt,
                max_retries,
                wait_ms,
                reason,
            } => f
                .debug_struct("Retrying")
                .field("attempt", attempt)
                .field("max_retries", max_retries)
                .field("wait_ms", wait_ms)
                .field("reason", reason)
                .finish(),
            Self::SubAgentSpawned { id, nickname, role } => f
                .debug_struct("SubAgentSpawned")
                .field("id", id)
                .field("nickname", nickname)
                .field("role", role)
                .finish(),
            Self::SubAgentStatusChanged {
                id,
                nickname,
                status,
            } => f
                .debug_struct("SubAgentStatusChanged")
                .field("id", id)
                .field("nickname", nickname)
                .field("status", status)
                .finish(),
            Self::SubAgentCompleted {
                id,
                nickname,
                final_message,
            } => f
                .debug_struct("SubAgentCompleted")
                .field("id", id)
                .field("nickname", nickname)
                .field("final_message", final_message)
                .finish(),
            Self::Usage(u) => f.debug_struct("Usage").field("usage", u).finish(),
            Self::SystemMessage(s) => f.debug_tuple("SystemMessage").field(s).finish(),
            Self::TurnComplete => write!(f, "TurnComplete"),
            Self::Error(s) => f.debug_tuple("Error").field(s).finish(),
        }
    }
}

/// Turn configuration for a single reviewer/validator/fix-verifier agent run.
/// There is no human in the loop for a review run, so this carries none of
/// an interactive assistant's trust/approval/plan-mode machinery.
#[derive(Clone)]
pub struct AgentConfig {
    pub name: String,
    pub system_prompt: String,
    pub max_steps: u32,
    pub max_tokens: Option<u32>,
    pub retry: sentinel_config::RetrySettings,
    pub thinking_enabled: bool,
    pub thinking_budget: Option<u32>,
    pub reasoning_effort: Option<String>,
    pub thinking_level: Option<String>,
    pub agent_name: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "reviewer".to_string(),
            system_prompt: String::new(),
            max_steps: 40,
            max_tokens: None,
            retry: sentinel_config::RetrySettings::default(),
            thinking_enabled: false,
            thinking_budget: None,
            reasoning_effort: None,
            thinking_level: None,
            agent_name: None,
        }
    }
}

pub async fn run_turn(
    provider: &dyn Provider,
    thread: &mut Thread,
    user_input: &str,
    config: &AgentConfig,
    event_tx: &broadcast::Sender<AgentEvent>,
    registry: &ToolRegistry,
    ctx: &ToolContext,
    model_info: Option<&ModelInfo>,
    session_usage: &mut SessionUsage,
) -> Result<()> {
    run_turn_with_content(
        provider,
        thread,
        MessageContent::Text(user_input.to_string()),
        config,
        event_tx,
        registry,
        ctx,
        model_info,
        session_usage,
    )
    .await
}

/// Runs the tool-calling loop to completion: push the user turn, stream the
/// model's reply, execute any tool calls (read-only tools in parallel, the
/// rest sequentially), feed results back, and repeat until the model stops
/// calling tools or `max_steps` is reached.
#[allow(clippy::too_many_arguments)]
pub async fn run_turn_with_content(
    provider: &dyn Provider,
    thread: &mut Thread,
    user_content: MessageContent,
    config: &AgentConfig,
    event_tx: &broadcast::Sender<AgentEvent>,
    registry: &ToolRegistry,
    ctx: &ToolContext,
    model_info: Option<&ModelInfo>,
    session_usage: &mut SessionUsage,
) -> Result<()> {
    thread.push_message(Message {
        role: Role::User,
        content: user_content,
    });

    let tool_defs = if let Some(allowed) = &ctx.allowed_tool_names {
        registry.definitions_filtered(allowed)
    } else {
        registry.definitions()
    };
    let max_tokens = config
        .max_tokens
        .or_else(|| model_info.map(|m| m.max_output_tokens));

    session_usage.turn_input_tokens = 0;
    session_usage.turn_output_tokens = 0;
    session_usage.turn_cache_read_tokens = 0;
    session_usage.turn_cache_creation_tokens = 0;
    session_usage.turn_cost_usd = 0.0;

    for step in 0..config.max_steps {
        let model_id = model_info.map(|m| m.id.to_string()).unwrap_or_default();

        let thinking = if config.thinking_enabled {
            Some(sentinel_provider::ThinkingConfig {
                enabled: true,
                budget_tokens: config.thinking_budget,
                reasoning_effort: config.reasoning_effort.clone(),
                thinking_level: config.thinking_level.clone(),
            })
        } else {
            None
        };

        let request = ChatRequest {
            model: model_id.clone(),
            messages: thread.messages().to_vec(),
            tools: tool_defs.clone(),
            max_tokens,
            temperature: None,
            system: Some(config.system_prompt.clone()),
            stream: true,
            thinking,
        };

        let mut stream_attempt = 0u32;
        let acc = 'stream_retry: loop {
            let mut stream = match provider.chat_stream(&request).await {
                Ok(s) => s,
                Err(e) => {
                    if let Some(pe) = e.downcast_ref::<ProviderError>() {
                        if pe.is_retryable() && stream_attempt < config.retry.max_retries {
                            stream_attempt += 1;
                            let wait = pe
                                .retry_after_ms()
                                .unwrap_or_else(|| {
                                    config
                                        .retry
                                        .initial_backoff_ms
                                        .saturating_mul(2u64.saturating_pow(stream_attempt - 1))
                                })
                                .min(config.retry.max_backoff_ms);
                            let _ = event_tx.send(AgentEvent::Retrying {
                                attempt: stream_attempt,
                                max_retries: config.retry.max_retries,
                                wait_ms: wait,
                                reason: pe.to_string(),
                            });
                            tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
                            continue 'stream_retry;
                        }
                    }
                    return Err(e);
                }
            };

            let mut acc = StreamAccumulator::new();
            let mut stream_err: Option<anyhow::Error> = None;

            while let Some(event) = stream.next().await {
                let event = match event {
                    Ok(ev) => ev,
                    Err(e) => {
                        stream_err = Some(e);
                        break;
                    }
                };
                acc.process(&event);

                match &event {
                    StreamEvent::ThinkingDelta(text) => {
                        let _ = event_tx.send(AgentEvent::ThinkingDelta(text.clone()));
                    }
                    StreamEvent::TextDelta(text) => {
                        let _ = event_tx.send(AgentEvent::TextDelta(text.clone()));
                    }
                    StreamEvent::ToolCallStart { id, name, .. } => {
                        let _ = event_tx.send(AgentEvent::ToolCallStart {
                            id: id.clone(),
                            name: name.clone(),
                        });
                    }
                    StreamEvent::ToolCallDelta {
                        arguments_delta, ..
                    } => {
                        if let Some(tc) = acc.tool_calls.last() {
                            let _ = event_tx.send(AgentEvent::ToolCallDelta {
                                id: tc.id.clone(),
                                args_delta: arguments_delta.clone(),
                            });
                        }
                    }
                    StreamEvent::Error(e) => {
                        let _ = event_tx.send(AgentEvent::Error(e.clone()));
                        return Ok(());
                    }
                    _ => {}
                }
            }

            if let Some(e) = stream_err {
                if let Some(pe) = e.downcast_ref::<ProviderError>() {
                    if pe.is_retryable() && stream_attempt < config.retry.max_retries {
                        stream_attempt += 1;
                        let wait = pe
                            .retry_after_ms()
                            .unwrap_or_else(|| {
                                config
                                    .retry
                                    .initial_backoff_ms
                                    .saturating_mul(2u64.saturating_pow(stream_attempt - 1))
                            })
                            .min(config.retry.max_backoff_ms);
                        let _ = event_tx.send(AgentEvent::Retrying {
                            attempt: stream_attempt,
                            max_retries: config.retry.max_retries,
                            wait_ms: wait,
                            reason: pe.to_string(),
                        });
                        tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
                        continue 'stream_retry;
                    }
                }
                return Err(e);
            }

            break acc;
        };

        if let Some(usage) = &acc.usage {
            session_usage.turn_input_tokens = session_usage
                .turn_input_tokens
                .saturating_add(usage.input_tokens);
            session_usage.turn_output_tokens = session_usage
                .turn_output_tokens
                .saturating_add(usage.output_tokens);
            session_usage.turn_cache_read_tokens = session_usage
                .turn_cache_read_tokens
                .saturating_add(usage.cache_read_tokens);
            session_usage.turn_cache_creation_tokens = session_usage
                .turn_cache_creation_tokens
                .saturating_add(usage.cache_creation_tokens);
            session_usage.total_input_tokens += usage.input_tokens as u64;
            session_usage.total_output_tokens += usage.output_tokens as u64;
            session_usage.total_cache_read_tokens += usage.cache_read_tokens as u64;
            session_usage.total_cache_creation_tokens += usage.cache_creation_tokens as u64;

            if let Some(mi) = model_info {
                let step_cost = mi.cost_usd(usage);
                session_usage.turn_cost_usd += step_cost;
                session_usage.total_cost_usd += step_cost;
            }

            let _ = event_tx.send(AgentEvent::Usage(session_usage.clone()));
        }

        if acc.has_tool_calls() {
            let mut tool_use_parts = Vec::new();
            let mut indexed_results: Vec<(usize, String)> =
                Vec::with_capacity(acc.tool_calls.len());

            let mut parallel_indices = Vec::new();
            let mut sequential_indices = Vec::new();

            for (i, tc) in acc.tool_calls.iter().enumerate() {
                let args: serde_json::Value =
                    serde_json::from_str(&tc.arguments).unwrap_or(serde_json::Value::Null);

                tool_use_parts.push(ContentPart::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input: args.clone(),
                });

                let is_readonly = registry
                    .get(&tc.name)
                    .map(|t| t.permission() == ToolPermission::ReadOnly)
                    .unwrap_or(false);

                if is_readonly {
                    parallel_indices.push((i, args));
                } else {
                    sequential_indices.push((i, args));
                }
            }

            if !parallel_indices.is_empty() {
                let futs = parallel_indices.iter().map(|(i, args)| {
                    let i = *i;
                    let name = acc.tool_calls[i].name.clone();
                    let args = args.clone();
                    async move {
                        let start = std::time::Instant::now();
                        let output = match registry.execute(&name, args, ctx).await {
                            Ok(r) => r.output,
                            Err(e) => format!("Error executing tool: {e}"),
                        };
                        let elapsed_ms = start.elapsed().as_millis() as u64;
                        (i, output, elapsed_ms)
                    }
                });
                let results = futures::future::join_all(futs).await;
                for (i, output, elapsed_ms) in results {
                    let _ = event_tx.send(AgentEvent::ToolCallDone {
                        id: acc.tool_calls[i].id.clone(),
                        name: acc.tool_calls[i].name.clone(),
                        output: output.clone(),
                        elapsed_ms,
                    });
                    indexed_results.push((i, output));
                }
            }

            for (i, args) in sequential_indices {
                let tc = &acc.tool_calls[i];
                let start = std::time::Instant::now();
                let output = match registry.execute(&tc.name, args, ctx).await {
                    Ok(r) => r.output,
                    Err(e) => format!("Error executing tool: {e}"),
                };
                let elapsed_ms = start.elapsed().as_millis() as u64;

                let _ = event_tx.send(AgentEvent::ToolCallDone {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    output: output.clone(),
                    elapsed_ms,
                });
                indexed_results.push((i, output));
            }

            indexed_results.sort_by_key(|(i, _)| *i);

            let tool_result_parts: Vec<ContentPart> = indexed_results
                .into_iter()
                .map(|(i, output)| {
                    let tc = &acc.tool_calls[i];
                    ContentPart::ToolResult {
                        tool_use_id: tc.id.clone(),
                        content: output,
                    }
                })
                .collect();

            thread.push_message(Message {
                role: Role::Assistant,
                content: MessageContent::Parts(tool_use_parts),
            });
            thread.push_message(Message {
                role: Role::User,
                content: MessageContent::Parts(tool_result_parts),
            });
        } else {
            if !acc.text.is_empty() {
                thread.push_message(Message {
                    role: Role::Assistant,
                    content: MessageContent::Text(acc.text),
                });
            }
            break;
        }

        if step + 1 >= config.max_steps {
            let _ = event_tx.send(AgentEvent::Error(
                "Reached maximum tool-calling steps".to_string(),
            ));
            break;
        }
    }

    let _ = event_tx.send(AgentEvent::TurnComplete);
    Ok(())
}
