//! The chat execution engine.
//!
//! Phases: policy → provider select → fast-path attempt → prompt assembly
//! (lazy) → provider call → recovery → constraint enforcement →
//! normalization → persistence. The engine never throws out of a turn
//! except for config errors (missing key / provider disabled), which the
//! dispatcher surfaces intact.

use std::sync::Arc;

use futures_util::StreamExt;
use uuid::Uuid;

use nova_domain::capability::ProviderKind;
use nova_domain::error::{Error, Result};
use nova_domain::stream::{StreamEvent, Usage};
use nova_domain::tool::{ChatMessage, ToolCall};
use nova_domain::turn::{Route, RunSummary, ToolCallRecord, TurnInput};
use nova_memory::{auto_capture_facts, capture_preferences};
use nova_promptpack::{
    compute_history_token_budget, estimate_tokens, trim_history_to_budget, PromptBuilder,
};
use nova_providers::util::with_timeout;
use nova_providers::{
    estimate_cost, registry::ResolveOptions, resolve_chat_runtime, ChatRequest, ProviderClient,
};
use nova_sessions::{transcript_to_chat_messages, TranscriptTurn};

use crate::cancel::CancelToken;
use crate::collab::ToolSession;
use crate::constraints::OutputConstraints;
use crate::enrichment::run_enrichment;
use crate::fallback::build_constraint_safe_fallback;
use crate::fastpath;
use crate::normalize::{claims_no_web_access, normalize_reply};
use crate::pending::PendingKind;
use crate::policy::{ExecutionPolicy, TurnPolicy};
use crate::shortterm::{ContextDomain, ContextState, DomainPolicy};
use crate::state::EngineState;
use crate::telemetry::LatencyTelemetry;
use crate::tool_loop::run_tool_loop;

/// Utterances at or under this length get a tighter completion cap.
const SHORT_UTTERANCE_CHARS: usize = 80;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run_chat_turn(
    state: &EngineState,
    input: &TurnInput,
    cancel: &CancelToken,
) -> Result<RunSummary> {
    let mut telemetry = LatencyTelemetry::new();
    let stream_id = Uuid::new_v4().to_string();

    // ── Policy ───────────────────────────────────────────────────────
    let constraints = OutputConstraints::parse(&input.text);
    let strict = constraints.is_active();
    let policy = TurnPolicy::derive(&input.text);

    let tool_session: Option<Arc<dyn ToolSession>> = if policy.wants_tools() {
        match state.tool_runtime.init(&input.user_context_id).await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(error = %e, "tool runtime init failed, continuing without tools");
                None
            }
        }
    } else {
        None
    };
    let available_tools: Vec<String> = tool_session
        .as_ref()
        .map(|s| s.tools().iter().map(|t| t.name.clone()).collect())
        .unwrap_or_default();
    let exec = ExecutionPolicy::intersect(&policy, &available_tools, &state.config.tool_loop);
    telemetry.mark("policy");

    // ── Provider selection ───────────────────────────────────────────
    let snapshot = match state.snapshots.get(state.integrations.as_ref(), &input.user_context_id).await
    {
        Ok(snapshot) => snapshot,
        Err(e) => {
            // Transient collaborator failure: surface a deterministic reply
            // instead of throwing.
            let reply = build_constraint_safe_fallback(&constraints, &input.text, strict);
            let mut summary = RunSummary::routed(Route::ChatError, reply.clone());
            summary.ok = false;
            summary.error = Some(format!("integrations snapshot unavailable: {e}"));
            summary.fallback_stage = Some("constraint_safe".into());
            summary.fallback_reason = Some("integrations_snapshot_unavailable".into());
            let (stages, hot) = telemetry.snapshot();
            summary.latency_stages = stages;
            summary.hot_path = hot;
            stream_whole_reply(state, &stream_id, &reply).await;
            return Ok(summary);
        }
    };

    let runtime = resolve_chat_runtime(
        &snapshot,
        &ResolveOptions {
            require_tools: exec.can_run_tool_loop,
            preferred: state.config.routing.preferred_providers.clone(),
            allow_active_override: state.config.routing.allow_active_override,
        },
    )?;
    let client = state
        .client_factory
        .client_for(&runtime, state.config.timeouts.request_timeout_ms)?;
    telemetry.mark("provider_select");

    let mut summary = RunSummary::routed(Route::ChatStream, String::new());
    summary.provider = Some(runtime.kind.as_str().to_string());
    summary.model = Some(runtime.model.clone());
    summary.ranked_candidates = runtime.ranked_candidates.clone();

    // ── Fast-path attempt ────────────────────────────────────────────
    if !strict {
        if let Some(mut fast) = try_fast_paths(state, input, &policy, &mut telemetry).await {
            fast.provider = summary.provider.clone();
            fast.model = summary.model.clone();
            fast.ranked_candidates = summary.ranked_candidates.clone();
            let (stages, hot) = telemetry.snapshot();
            fast.latency_stages = stages;
            fast.hot_path = hot;
            stream_whole_reply(state, &stream_id, &fast.reply).await;
            persist_turn(state, input, &fast.reply, &fast).await;
            return Ok(fast);
        }
    }

    // ── Session context ──────────────────────────────────────────────
    let session_ctx = state.sessions.resolve_session_context(
        &input.session_key,
        &input.user_context_id,
        input.conversation_id.as_deref(),
        &input.source,
        &input.sender_id,
    )?;

    state.broadcaster.stream_start(&stream_id).await;
    state.broadcaster.broadcast_thinking_status("thinking").await;
    if input.source == "voice" {
        state.voice.play_thinking().await;
    }

    // ── Prompt assembly (lazy, single-shot) ──────────────────────────
    let enrichment = if policy.fast_lane_simple_chat {
        Default::default()
    } else {
        run_enrichment(
            state,
            &input.user_context_id,
            &input.text,
            &exec,
            tool_session.as_ref(),
            cancel,
        )
        .await
    };
    telemetry.mark("enrichment");

    let prompt_cfg = &state.config.prompt;
    // The total prompt budget shrinks on fast-lane and strict turns.
    let total_budget = if policy.fast_lane_simple_chat || strict {
        prompt_cfg.max_prompt_tokens / 2
    } else {
        prompt_cfg.max_prompt_tokens
    };
    let mut builder = PromptBuilder::new(
        &state.base_persona,
        total_budget,
        prompt_cfg.context_section_max_tokens,
    );

    builder.append_section("Persona overrides", &persona_overlay(state, input));

    if let Ok(preferences) = state.memory.preference_section(&input.user_context_id, 8) {
        builder.append_section("User preferences", &preferences);
    }
    builder.append_section("Identity signals", &identity_signals(input));
    builder.append_section("Personality calibration", &personality_calibration(input));

    let assistant_policy = DomainPolicy::for_domain(ContextDomain::Assistant);
    if assistant_policy.is_non_critical_follow_up(&input.text) {
        if let Some(ctx) = state.shortterm.get(
            &input.user_context_id,
            &session_ctx.conversation_id,
            ContextDomain::Assistant,
        ) {
            builder.append_section(
                "Recent context",
                &format!(
                    "The user is following up on the previous exchange.\nThey said: {}\nYou replied: {}",
                    ctx.last_user_excerpt, ctx.last_assistant_excerpt
                ),
            );
        }
    }

    if strict {
        builder.append_section("Strict output requirements", &constraints.instructions());
    }

    summary.web_context_used = enrichment.web_context.is_some();
    summary.link_context_used = enrichment.link_context.is_some();
    summary.memory_recall_used = enrichment.memory_context.is_some();
    if let Some(web) = &enrichment.web_context {
        builder.append_section("Live web context", web);
    }
    if let Some(link) = &enrichment.link_context {
        builder.append_section("Linked page context", link);
    }
    if let Some(memory) = &enrichment.memory_context {
        builder.append_section("Recalled memory", memory);
    }

    let history_budget = compute_history_token_budget(
        prompt_cfg,
        builder.used_tokens(),
        estimate_tokens(&input.text),
    );
    let full_history = transcript_to_chat_messages(&session_ctx.recent_turns);
    let history = trim_history_to_budget(&full_history, history_budget);
    builder.note_history(history_budget, history.len());
    let (system_prompt, _prompt_report) = builder.finish();

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(&system_prompt));
    messages.extend(history);
    messages.push(ChatMessage::user(&input.text));
    telemetry.mark("prompt_assembly");

    // ── Provider call ────────────────────────────────────────────────
    let completion_cap =
        adaptive_completion_cap(state, runtime.kind, &constraints, &policy, &input.text);
    let request = ChatRequest {
        model: runtime.model.clone(),
        messages,
        tools: if exec.can_run_tool_loop {
            tool_session.as_ref().map(|s| s.tools()).unwrap_or_default()
        } else {
            Vec::new()
        },
        max_completion_tokens: Some(completion_cap),
        temperature: None,
        json_mode: constraints.json_only,
        verbosity: strict.then(|| "low".to_string()),
        reasoning_effort: None,
    };

    let mut raw_reply = String::new();
    let mut finish_reason: Option<String> = None;
    let mut usage = Usage::default();
    let mut generation_error: Option<Error> = None;

    if strict {
        // Non-streaming direct: token-exact streams are unreliable under
        // strict mode, so buffer the whole completion.
        summary.route = Route::ChatDirect;
        match with_timeout(
            "llm.create",
            state.config.timeouts.request_timeout_ms,
            client.create(&request),
        )
        .await
        {
            Ok(response) => {
                raw_reply = response.content;
                finish_reason = response.finish_reason;
                if let Some(u) = response.usage {
                    usage = u;
                }
            }
            Err(e) => generation_error = Some(e),
        }
    } else if let Some(session) = (exec.can_run_tool_loop && policy.tool_loop_candidate)
        .then(|| tool_session.clone())
        .flatten()
    {
        summary.route = Route::ToolLoop;
        let outcome = run_tool_loop(
            state,
            client.clone(),
            request.clone(),
            session,
            input.hud_op_token.as_deref(),
            cancel,
        )
        .await;
        raw_reply = outcome.reply;
        usage = outcome.usage;
        finish_reason = outcome.finish_reason;
        summary.tool_calls = outcome.tool_calls;
        summary.guardrails = outcome.guardrails;
        summary.retry_ladder = outcome.retry_ladder;
        if outcome.used_recovery {
            summary.route = Route::ToolLoopRecovery;
        }
    } else {
        summary.route = Route::ChatStream;
        match client.stream(&request).await {
            Ok(mut stream) => {
                while let Some(event) = stream.next().await {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match event {
                        Ok(StreamEvent::Token { text }) => {
                            state.broadcaster.stream_delta(&stream_id, &text).await;
                            raw_reply.push_str(&text);
                        }
                        Ok(StreamEvent::Done {
                            usage: u,
                            finish_reason: fr,
                        }) => {
                            if let Some(u) = u {
                                usage = u;
                            }
                            if fr.is_some() {
                                finish_reason = fr;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            generation_error = Some(e);
                            break;
                        }
                    }
                }
            }
            Err(e) => generation_error = Some(e),
        }
    }
    telemetry.mark("generation");

    if let Some(e) = &generation_error {
        tracing::warn!(error = %e, route = %summary.route, "generation failed");
        summary.error = Some(e.to_string());
    }

    // ── Refusal recovery ─────────────────────────────────────────────
    if exec.can_run_web_search && claims_no_web_access(&raw_reply) {
        if let Some(session) = tool_session.as_ref() {
            if let Some(correction) =
                live_web_correction(state, session, &input.text, &mut summary).await
            {
                state.broadcaster.stream_delta(&stream_id, &correction).await;
                raw_reply.push_str(&correction);
            }
        }
        telemetry.mark("refusal_recovery");
    }

    // ── Constraint correction pass (at most once) ────────────────────
    if strict && !raw_reply.trim().is_empty() && constraints.validate(&raw_reply).is_err() {
        if let Some(corrected) =
            constraint_correction(state, &client, &request, &raw_reply, &constraints).await
        {
            raw_reply = corrected;
            summary.constraint_correction_passes += 1;
        }
        telemetry.mark("constraint_correction");
    }

    // ── Normalization & fallback ladder ──────────────────────────────
    let had_candidate = !raw_reply.trim().is_empty();
    let mut reply = normalize_reply(&raw_reply);

    if reply.is_empty() {
        summary.had_candidate_reply = had_candidate;

        // Rung 1: recovery completion, OpenAI-compatible backends only,
        // when the completion ran out of room.
        let length_hit = finish_reason.as_deref() == Some("length")
            || usage.completion_tokens as f32 >= completion_cap as f32 * 0.85;
        if runtime.kind != ProviderKind::Claude && length_hit {
            if let Some(recovered) = empty_reply_recovery(state, &client, &request).await {
                reply = normalize_reply(&recovered);
                if !reply.is_empty() {
                    summary.fallback_stage = Some("recovery_completion".into());
                    summary.fallback_reason = Some("finish_length".into());
                }
            }
        }

        // Rung 2: deterministic, constraint-safe.
        if reply.is_empty() {
            reply = build_constraint_safe_fallback(&constraints, &input.text, strict);
            summary.fallback_stage = Some("constraint_safe".into());
            summary.fallback_reason = Some(match (&generation_error, had_candidate) {
                (Some(_), _) => "generation_error".into(),
                (None, true) => "normalized_to_empty".into(),
                (None, false) => "empty_generation".into(),
            });
        }
        telemetry.mark("fallback");
    }

    // Buffered modes emit the finished reply as one delta.
    if summary.route != Route::ChatStream || summary.fallback_stage.is_some() {
        state.broadcaster.stream_delta(&stream_id, &reply).await;
    }
    state.broadcaster.stream_done(&stream_id).await;

    // ── Persistence & telemetry ──────────────────────────────────────
    summary.reply = reply.clone();
    summary.ok = generation_error.is_none();
    summary.usage = usage;
    summary.estimated_cost_usd = estimate_cost(&runtime.model, &usage);

    persist_chat_turn(state, input, &session_ctx, &runtime.model, &summary).await;
    state
        .broadcaster
        .broadcast_usage(&usage, summary.estimated_cost_usd)
        .await;
    if input.source == "voice" {
        state.voice.speak(&reply).await;
    }
    telemetry.mark("persistence");

    let (stages, hot) = telemetry.snapshot();
    summary.latency_stages = stages;
    summary.hot_path = hot;
    Ok(summary)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fast paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn try_fast_paths(
    state: &EngineState,
    input: &TurnInput,
    policy: &TurnPolicy,
    telemetry: &mut LatencyTelemetry,
) -> Option<RunSummary> {
    if policy.weather_intent {
        let query = fastpath::weather::detect(&input.text)?;
        let result = match query.location {
            Some(location) => match state.weather.lookup(&location).await {
                Ok(report) => {
                    let mut summary = RunSummary::routed(Route::FastPathWeather, report.summary);
                    summary.tool_calls.push(ToolCallRecord {
                        name: "weather_lookup".into(),
                        ok: true,
                        duration_ms: 0,
                        error: None,
                    });
                    Some(summary)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "weather fast-path failed, falling through");
                    None
                }
            },
            None => {
                // Arm the confirmation and ask for the location.
                state.pending.set(
                    &input.session_key,
                    PendingKind::Weather,
                    input.text.clone(),
                    None,
                );
                Some(RunSummary::routed(
                    Route::FastPathWeatherConfirmPrompt,
                    "Which city should I check the weather for? Reply with the city (e.g. \
                     \"yes, Pittsburgh PA\") or \"no\" to skip.",
                ))
            }
        };
        telemetry.mark("fast_path");
        if result.is_some() {
            return result;
        }
    }

    if policy.crypto_intent {
        match state.crypto.report(&input.user_context_id).await {
            Ok(report) => {
                state.remember_crypto_report(&input.user_context_id, &report);
                let mut summary = RunSummary::routed(Route::FastPathCrypto, report);
                summary.tool_calls.push(ToolCallRecord {
                    name: "crypto_report".into(),
                    ok: true,
                    duration_ms: 0,
                    error: None,
                });
                telemetry.mark("fast_path");
                return Some(summary);
            }
            Err(e) => {
                tracing::warn!(error = %e, "crypto fast-path failed, falling through");
                telemetry.mark("fast_path");
            }
        }
    }

    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn persona_overlay(state: &EngineState, input: &TurnInput) -> String {
    let persona = &input.persona;
    let mut lines: Vec<String> = Vec::new();
    if let Some(name) = &persona.assistant_name {
        lines.push(format!("The user calls you {name}; answer to that name."));
    }
    if let Some(tone) = &persona.tone {
        if let Some(normalized) = state.voice.normalize_tone(tone) {
            lines.push(state.voice.tone_directive(&normalized));
        }
    }
    if let Some(style) = &persona.communication_style {
        lines.push(format!("Communication style: {style}."));
    }
    if let Some(custom) = &persona.custom_instructions {
        lines.push(custom.clone());
    }
    lines.join("\n")
}

fn identity_signals(input: &TurnInput) -> String {
    capture_preferences(&input.text)
        .iter()
        .map(|signal| format!("- {}", signal.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn personality_calibration(input: &TurnInput) -> String {
    let persona = &input.persona;
    let mut lines: Vec<String> = Vec::new();
    for (label, value) in [
        ("Proactivity", &persona.proactivity),
        ("Humor", &persona.humor),
        ("Risk appetite", &persona.risk),
        ("Structure", &persona.structure),
        ("Challenge level", &persona.challenge),
    ] {
        if let Some(v) = value {
            lines.push(format!("{label}: {v}."));
        }
    }
    lines.join("\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Completion cap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn adaptive_completion_cap(
    state: &EngineState,
    kind: ProviderKind,
    constraints: &OutputConstraints,
    policy: &TurnPolicy,
    text: &str,
) -> u32 {
    let cfg = &state.config.prompt;
    let mut cap = match kind {
        ProviderKind::Claude => cfg.claude_chat_max_tokens,
        _ => cfg.openai_tool_loop_max_completion_tokens,
    };
    if text.chars().count() <= SHORT_UTTERANCE_CHARS {
        cap = cap.min(512);
    }
    if policy.fast_lane_simple_chat {
        cap = cap.min(cfg.fast_lane_max_completion_tokens);
    }
    if constraints.exact_bullet_count.is_some() || constraints.sentence_count.is_some() {
        cap = cap.min(256);
    }
    if constraints.json_only {
        cap = cap.min(384);
    }
    if constraints.is_active() {
        cap = cap.min(cfg.strict_max_completion_tokens);
    }
    cap
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recovery passes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One web search plus an appended correction paragraph, used when the
/// model wrongly claimed it has no live-web access.
async fn live_web_correction(
    state: &EngineState,
    session: &Arc<dyn ToolSession>,
    query: &str,
    summary: &mut RunSummary,
) -> Option<String> {
    let call = ToolCall {
        call_id: "refusal_recovery".into(),
        tool_name: "web_search".into(),
        arguments: serde_json::json!({ "query": query }),
    };
    let outcome = tokio::time::timeout(
        std::time::Duration::from_millis(state.config.timeouts.web_preload_timeout_ms),
        session.execute(&call),
    )
    .await
    .ok()?;
    if outcome.is_error || outcome.content.trim().is_empty() {
        return None;
    }
    summary.web_context_used = true;
    summary.tool_calls.push(ToolCallRecord {
        name: "web_search".into(),
        ok: true,
        duration_ms: 0,
        error: None,
    });
    let preview: String = outcome.content.chars().take(600).collect();
    Some(format!(
        "\n\nActually, I do have live web access. Current results:\n{preview}"
    ))
}

/// One rewrite pass on the same provider when the reply violates active
/// constraints.
async fn constraint_correction(
    state: &EngineState,
    client: &Arc<dyn ProviderClient>,
    request: &ChatRequest,
    prior_reply: &str,
    constraints: &OutputConstraints,
) -> Option<String> {
    let violation = constraints.validate(prior_reply).err()?;
    let mut messages = request.messages.clone();
    messages.push(ChatMessage::assistant(prior_reply));
    messages.push(ChatMessage::user(format!(
        "Your reply violated the required format ({violation}). Rewrite it so it conforms \
         exactly. Output only the rewritten reply.\n{}",
        constraints.instructions()
    )));
    let correction_request = ChatRequest {
        messages,
        tools: Vec::new(),
        ..request.clone()
    };
    match with_timeout(
        "llm.constraint_correction",
        state.config.timeouts.request_timeout_ms,
        client.create(&correction_request),
    )
    .await
    {
        Ok(response) if !response.content.trim().is_empty() => Some(response.content),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "constraint correction failed");
            None
        }
    }
}

/// Re-ask once after an empty/truncated completion.
async fn empty_reply_recovery(
    state: &EngineState,
    client: &Arc<dyn ProviderClient>,
    request: &ChatRequest,
) -> Option<String> {
    let mut messages = request.messages.clone();
    messages.push(ChatMessage::user(
        "Your previous reply was empty or cut short. Answer the question above completely \
         and concisely now.",
    ));
    let recovery_request = ChatRequest {
        messages,
        tools: Vec::new(),
        ..request.clone()
    };
    match with_timeout(
        "llm.empty_reply_recovery",
        state.config.timeouts.request_timeout_ms,
        client.create(&recovery_request),
    )
    .await
    {
        Ok(response) if !response.content.trim().is_empty() => Some(response.content),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Streams a canned or fast-path reply as one delta inside a fresh stream.
pub(crate) async fn stream_whole_reply(state: &EngineState, stream_id: &str, reply: &str) {
    state.broadcaster.stream_start(stream_id).await;
    state.broadcaster.stream_delta(stream_id, reply).await;
    state.broadcaster.stream_done(stream_id).await;
}

/// Transcript append for routed/fast-path turns that skipped prompt assembly.
pub(crate) async fn persist_turn(
    state: &EngineState,
    input: &TurnInput,
    reply: &str,
    summary: &RunSummary,
) {
    match state.sessions.resolve_session_context(
        &input.session_key,
        &input.user_context_id,
        input.conversation_id.as_deref(),
        &input.source,
        &input.sender_id,
    ) {
        Ok(ctx) => {
            let _ = ctx.append_turn(&TranscriptTurn::user(&input.text));
            let mut turn = TranscriptTurn::assistant(reply);
            turn.provider = summary.provider.clone();
            turn.model = summary.model.clone();
            let _ = ctx.append_turn(&turn);
        }
        Err(e) => tracing::warn!(error = %e, "fast-path transcript append failed"),
    }
}

/// Full persistence for engine-generated turns: transcript, usage counters,
/// memory captures, short-term context.
async fn persist_chat_turn(
    state: &EngineState,
    input: &TurnInput,
    session_ctx: &nova_sessions::SessionContext,
    model: &str,
    summary: &RunSummary,
) {
    let _ = session_ctx.append_turn(&TranscriptTurn::user(&input.text));
    let mut assistant = TranscriptTurn::assistant(&summary.reply);
    assistant.provider = summary.provider.clone();
    assistant.model = Some(model.to_string());
    assistant.usage = Some(summary.usage);
    let _ = session_ctx.append_turn(&assistant);

    state.sessions.persist_usage(&input.session_key, &summary.usage);

    for signal in capture_preferences(&input.text) {
        if let Err(e) = state
            .memory
            .upsert_preference(&input.user_context_id, &signal.key, &signal.text)
        {
            tracing::warn!(error = %e, "preference upsert failed");
        }
    }
    for fact in auto_capture_facts(&input.text) {
        if let Err(e) = state
            .memory
            .upsert_fact(&input.user_context_id, &fact.key, &fact.text)
        {
            tracing::warn!(error = %e, "auto-captured fact upsert failed");
        }
    }

    let policy = DomainPolicy::for_domain(ContextDomain::Assistant);
    let mut ctx = ContextState::new(policy.resolve_topic_affinity_id(&input.text));
    ctx.last_user_excerpt = excerpt(&input.text, 160);
    ctx.last_assistant_excerpt = excerpt(&summary.reply, 160);
    state.shortterm.upsert(
        &input.user_context_id,
        &session_ctx.conversation_id,
        ContextDomain::Assistant,
        ctx,
    );
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        trimmed.chars().take(max_chars).collect()
    }
}
