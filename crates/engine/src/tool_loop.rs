//! The bounded tool loop.
//!
//! model → tool calls → results → model, under four guardrails: a total
//! wall-clock budget, a step cap, a per-step tool-call cap, and per-tool
//! execution timeouts. Whatever happens inside, the loop hands back a
//! usable outcome: a real reply, a recovery completion, a reply
//! synthesized from tool output, or an empty string the caller's fallback
//! ladder finishes off.

use std::sync::Arc;
use std::time::Instant;

use nova_domain::error::Error;
use nova_domain::stream::Usage;
use nova_domain::tool::{ChatMessage, ToolOutcome};
use nova_domain::turn::{GuardrailSnapshot, RetryStep, ToolCallRecord};
use nova_providers::util::with_timeout;
use nova_providers::{ChatRequest, ProviderClient};

use crate::cancel::CancelToken;
use crate::collab::ToolSession;
use crate::guardrails::{
    cap_note, cap_tool_calls_per_step, is_likely_timeout_error, GuardrailCounters, ToolLoopBudget,
};
use crate::state::EngineState;

/// Tools that require a single-use HUD operation token before running.
const SENSITIVE_TOOLS: &[&str] = &["gmail_forward_message", "gmail_reply_draft"];

/// Floors below which clipped timeouts make no sense.
const STEP_TIMEOUT_FLOOR_MS: u64 = 500;
const TOOL_TIMEOUT_FLOOR_MS: u64 = 250;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct ToolLoopOutcome {
    /// May be empty; the caller's fallback ladder then takes over.
    pub reply: String,
    pub usage: Usage,
    pub tool_calls: Vec<ToolCallRecord>,
    pub guardrails: GuardrailSnapshot,
    pub retry_ladder: Vec<RetryStep>,
    /// The recovery completion or tool-output synthesis produced the reply.
    pub used_recovery: bool,
    pub finish_reason: Option<String>,
}

/// Most recent useful tool output, kept for recovery synthesis.
struct LastOutputs {
    useful: Option<(String, String)>,
    error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fatal tool-error classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool-error shapes with a deterministic explanation better than anything
/// the model would improvise. A match ends the loop.
fn classify_fatal_tool_error(tool_name: &str, content: &str) -> Option<String> {
    let lowered = content.to_lowercase();

    if lowered.contains("brave_api_key")
        || (lowered.contains("brave") && lowered.contains("api key"))
    {
        return Some(
            "Web search isn't available right now — the Brave Search API key is missing. \
             Add it in settings and I'll be able to search again."
                .into(),
        );
    }
    if tool_name == "web_search" && lowered.contains("rate limit") {
        return Some(
            "Web search is rate-limited at the moment. Give it a minute and ask me again.".into(),
        );
    }
    if tool_name.starts_with("gmail") {
        if lowered.contains("not connected") || lowered.contains("disconnected") {
            return Some(
                "Gmail isn't connected, so I can't work with email right now. Connect it from \
                 the integrations screen and try again."
                    .into(),
            );
        }
        if lowered.contains("insufficient scope") || lowered.contains("missing scope") {
            return Some(
                "Gmail is connected but missing the permission scope for that action. \
                 Re-connect it with full access to enable this."
                    .into(),
            );
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run_tool_loop(
    state: &EngineState,
    client: Arc<dyn ProviderClient>,
    base_request: ChatRequest,
    tool_session: Arc<dyn ToolSession>,
    hud_op_token: Option<&str>,
    cancel: &CancelToken,
) -> ToolLoopOutcome {
    let timeouts = &state.config.timeouts;
    let loop_cfg = &state.config.tool_loop;
    let budget = ToolLoopBudget::new(timeouts.tool_loop_max_duration_ms);

    let mut counters = GuardrailCounters::default();
    let mut retry_ladder: Vec<RetryStep> = Vec::new();
    let mut records: Vec<ToolCallRecord> = Vec::new();
    let mut last = LastOutputs {
        useful: None,
        error: None,
    };
    let mut messages = base_request.messages.clone();
    let mut model = base_request.model.clone();
    let mut switched_model = false;

    let mut reply = String::new();
    let mut forced_reply: Option<String> = None;
    let mut finish_reason: Option<String> = None;
    let mut usage = Usage::default();

    let mut step: u32 = 0;
    'steps: while step < loop_cfg.max_steps {
        if cancel.is_cancelled() {
            break;
        }
        if budget.is_exhausted() {
            counters.budget_exhausted = true;
            break;
        }
        let step_timeout =
            budget.resolve_timeout_ms(timeouts.tool_loop_request_timeout_ms, STEP_TIMEOUT_FLOOR_MS);
        if step_timeout == 0 {
            counters.budget_exhausted = true;
            break;
        }

        let request = ChatRequest {
            model: model.clone(),
            messages: messages.clone(),
            ..base_request.clone()
        };

        tracing::debug!(step, model = %model, timeout_ms = step_timeout, "tool loop step");

        let response = match with_timeout("tool_loop.step", step_timeout, client.create(&request)).await
        {
            Ok(response) => response,
            Err(e) => {
                if is_likely_timeout_error(&e) {
                    counters.step_timeouts += 1;
                }
                let transport = matches!(e, Error::Http(_) | Error::Timeout(_));
                // One primary→fallback model switch on first-step transport
                // failure.
                if step == 0
                    && transport
                    && !switched_model
                    && state.config.routing.provider_fallback_enabled
                {
                    let fallback = client.kind().fallback_model();
                    if fallback != model {
                        tracing::warn!(from = %model, to = fallback, "tool loop model fallback");
                        retry_ladder.push(RetryStep {
                            stage: "tool_loop_first_step".into(),
                            from_model: model.clone(),
                            to_model: fallback.to_string(),
                            reason: e.to_string(),
                        });
                        model = fallback.to_string();
                        switched_model = true;
                        continue 'steps;
                    }
                }
                last.error = Some(e.to_string());
                break 'steps;
            }
        };

        counters.steps_taken += 1;
        step += 1;
        if let Some(u) = &response.usage {
            usage.accumulate(u);
        }

        // No tool calls: the assistant text is the final reply.
        if response.tool_calls.is_empty() {
            reply = response.content;
            finish_reason = response.finish_reason;
            break;
        }

        // The assistant turn carries every requested tool-use block; capped
        // calls get guardrail-note results instead of executions.
        messages.push(ChatMessage::assistant_with_tool_uses(
            &response.content,
            &response.tool_calls,
        ));

        let capped = cap_tool_calls_per_step(
            response.tool_calls,
            loop_cfg.max_tool_calls_per_step as usize,
        );
        if capped.was_capped {
            counters.calls_capped += capped.dropped.len() as u32;
            tracing::warn!(
                requested = capped.requested_count,
                cap = loop_cfg.max_tool_calls_per_step,
                "tool calls capped this step"
            );
        }

        // Sensitive actions consume the single-use HUD token before any
        // execution; a missing token ends the loop without running the tool.
        for call in &capped.kept {
            if SENSITIVE_TOOLS.contains(&call.tool_name.as_str()) {
                let outcome = state
                    .broadcaster
                    .consume_hud_op_token(hud_op_token, &call.tool_name)
                    .await;
                if !outcome.ok {
                    forced_reply = Some(format!(
                        "That {} action needs a fresh confirmation from the HUD before I can \
                         run it. Trigger it again from there and I'll proceed.",
                        call.tool_name.replace('_', " ")
                    ));
                    break 'steps;
                }
            }
        }

        // Execute kept calls sequentially: the model dictated the order.
        for call in &capped.kept {
            if cancel.is_cancelled() {
                break 'steps;
            }
            let tool_timeout = budget
                .resolve_timeout_ms(timeouts.tool_loop_tool_exec_timeout_ms, TOOL_TIMEOUT_FLOOR_MS);
            if tool_timeout == 0 {
                counters.budget_exhausted = true;
                break 'steps;
            }

            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                std::time::Duration::from_millis(tool_timeout),
                tool_session.execute(call),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    counters.tool_execution_timeouts += 1;
                    ToolOutcome::error(format!(
                        "tool '{}' timed out after {tool_timeout}ms",
                        call.tool_name
                    ))
                }
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            records.push(ToolCallRecord {
                name: call.tool_name.clone(),
                ok: !outcome.is_error,
                duration_ms,
                error: outcome.is_error.then(|| preview(&outcome.content, 160)),
            });

            if outcome.is_error {
                last.error = Some(outcome.content.clone());
                if let Some(fatal) = classify_fatal_tool_error(&call.tool_name, &outcome.content) {
                    messages.push(ChatMessage::tool_result(&call.call_id, &outcome));
                    forced_reply = Some(fatal);
                    break 'steps;
                }
            } else {
                last.useful = Some((call.tool_name.clone(), outcome.content.clone()));
            }

            messages.push(ChatMessage::tool_result(&call.call_id, &outcome));
        }

        for dropped in &capped.dropped {
            let note = ToolOutcome::error(cap_note(
                capped.requested_count,
                loop_cfg.max_tool_calls_per_step as usize,
            ));
            messages.push(ChatMessage::tool_result(&dropped.call_id, &note));
        }
    }

    // ── Recovery completion & synthesis ──────────────────────────────
    let mut used_recovery = false;
    if let Some(forced) = forced_reply {
        reply = forced;
    } else if reply.trim().is_empty() && !records.is_empty() && !cancel.is_cancelled() {
        if let Some(recovered) = recovery_completion(state, &client, &base_request, &messages).await
        {
            reply = recovered;
            used_recovery = true;
        } else if let Some(synthesized) = synthesize_from_tools(&last) {
            reply = synthesized;
            used_recovery = true;
        }
    }

    ToolLoopOutcome {
        reply,
        usage,
        tool_calls: records,
        guardrails: counters.snapshot(),
        retry_ladder,
        used_recovery,
        finish_reason,
    }
}

/// One no-tools completion asking the model to wrap up from the collected
/// tool results, under the recovery sub-budget.
async fn recovery_completion(
    state: &EngineState,
    client: &Arc<dyn ProviderClient>,
    base_request: &ChatRequest,
    messages: &[ChatMessage],
) -> Option<String> {
    let mut recovery_messages = messages.to_vec();
    recovery_messages.push(ChatMessage::user(
        "Provide the final answer from the tool results above. Do not call any more tools.",
    ));
    let request = ChatRequest {
        messages: recovery_messages,
        tools: Vec::new(),
        ..base_request.clone()
    };
    match with_timeout(
        "tool_loop.recovery",
        state.config.timeouts.tool_loop_recovery_timeout_ms,
        client.create(&request),
    )
    .await
    {
        Ok(response) if !response.content.trim().is_empty() => Some(response.content),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "recovery completion failed");
            None
        }
    }
}

/// Deterministic reply from the most recent useful tool output, formatted
/// per tool family; falls back to the last error.
fn synthesize_from_tools(last: &LastOutputs) -> Option<String> {
    if let Some((tool, content)) = &last.useful {
        let body = preview(content, 600);
        let reply = match tool.as_str() {
            "web_search" => format!("Here's what the search turned up:\n{body}"),
            "web_fetch" => format!("Here's what that page says:\n{body}"),
            _ => format!("Here's the tool output I collected:\n{body}"),
        };
        return Some(reply);
    }
    last.error.as_ref().map(|error| {
        format!(
            "I couldn't finish that — the last tool step failed: {}",
            preview(error, 200)
        )
    })
}

fn preview(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification_shapes() {
        assert!(classify_fatal_tool_error("web_search", "BRAVE_API_KEY not set")
            .unwrap()
            .contains("Brave"));
        assert!(classify_fatal_tool_error("web_search", "429 rate limit exceeded")
            .unwrap()
            .contains("rate-limited"));
        assert!(
            classify_fatal_tool_error("gmail_reply_draft", "account not connected")
                .unwrap()
                .contains("Gmail")
        );
        assert!(classify_fatal_tool_error(
            "gmail_forward_message",
            "insufficient scope for this operation"
        )
        .unwrap()
        .contains("scope"));
        assert!(classify_fatal_tool_error("web_search", "no results found").is_none());
        assert!(classify_fatal_tool_error("calculator", "rate limit").is_none());
    }

    #[test]
    fn synthesis_prefers_useful_output() {
        let last = LastOutputs {
            useful: Some(("web_search".into(), "1. Rust 1.80 released".into())),
            error: Some("later failure".into()),
        };
        let reply = synthesize_from_tools(&last).unwrap();
        assert!(reply.starts_with("Here's what the search turned up:"));
        assert!(reply.contains("Rust 1.80"));
    }

    #[test]
    fn synthesis_formats_per_tool_family() {
        let fetch = LastOutputs {
            useful: Some(("web_fetch".into(), "page body".into())),
            error: None,
        };
        assert!(synthesize_from_tools(&fetch).unwrap().contains("that page says"));

        let generic = LastOutputs {
            useful: Some(("calculator".into(), "42".into())),
            error: None,
        };
        assert!(synthesize_from_tools(&generic)
            .unwrap()
            .contains("tool output I collected"));
    }

    #[test]
    fn synthesis_falls_back_to_last_error() {
        let last = LastOutputs {
            useful: None,
            error: Some("connection refused".into()),
        };
        assert!(synthesize_from_tools(&last).unwrap().contains("connection refused"));
        let nothing = LastOutputs {
            useful: None,
            error: None,
        };
        assert!(synthesize_from_tools(&nothing).is_none());
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("short", 10), "short");
        let long = preview(&"é".repeat(20), 5);
        assert_eq!(long.chars().count(), 6); // 5 + ellipsis
    }
}
