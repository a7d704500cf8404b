//! The dispatcher.
//!
//! Classifies an inbound turn and picks exactly one downstream path; first
//! match wins. The dispatcher never calls the model itself: everything
//! model-shaped lives in [`crate::turn`]. Whatever happens, one dev-log
//! record is written and `state=idle` is broadcast before the turn returns.

use regex::Regex;
use uuid::Uuid;

use nova_domain::error::Result;
use nova_domain::turn::{Route, RunSummary, ToolCallRecord, TurnInput};
use nova_memory::parse_memory_update;

use crate::cancel::CancelToken;
use crate::fastpath;
use crate::pending::PendingKind;
use crate::shortterm::{ContextDomain, ContextState, DomainPolicy};
use crate::state::EngineState;
use crate::turn::{persist_turn, run_chat_turn, stream_whole_reply};

const SHUTDOWN_REPLY: &str =
    "Shutting down now. If you need me again, just restart the system.";

const DUPLICATE_REPLY: &str =
    "I got that same request again, so I skipped re-running it. Reword it if you want a \
     fresh answer.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Route one turn. The `try/finally` shape: the dev-log record and the idle
/// broadcast happen on every exit, success or error.
pub async fn dispatch_turn(state: &EngineState, input: TurnInput) -> Result<RunSummary> {
    let cancel = CancelToken::new();
    let result = route_turn(state, &input, &cancel).await;

    match &result {
        Ok(summary) => {
            state.devlog.record_turn(
                &input.user_context_id,
                &input.session_key,
                &input.source,
                &input.text,
                summary,
            );
        }
        Err(e) => {
            let mut failed = RunSummary::routed(Route::ChatError, String::new());
            failed.ok = false;
            failed.error = Some(e.to_string());
            state.devlog.record_turn(
                &input.user_context_id,
                &input.session_key,
                &input.source,
                &input.text,
                &failed,
            );
        }
    }

    state.broadcaster.broadcast_state("idle").await;
    result
}

/// Emit a canned reply through a fresh stream and persist the exchange.
async fn canned(
    state: &EngineState,
    input: &TurnInput,
    route: Route,
    reply: impl Into<String>,
) -> RunSummary {
    let summary = RunSummary::routed(route, reply.into());
    stream_whole_reply(state, &Uuid::new_v4().to_string(), &summary.reply).await;
    persist_turn(state, input, &summary.reply, &summary).await;
    summary
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn route_turn(
    state: &EngineState,
    input: &TurnInput,
    cancel: &CancelToken,
) -> Result<RunSummary> {
    let text = input.text.as_str();
    let normalized = normalize_for_match(text);

    // 1. Shutdown phrases.
    if matches!(
        normalized.as_str(),
        "nova shutdown" | "nova shut down" | "shutdown nova"
    ) {
        state.request_shutdown();
        return Ok(canned(state, input, Route::Shutdown, SHUTDOWN_REPLY).await);
    }

    // 2. Duplicate inbound, minus the carve-outs.
    let carve_out = fastpath::crypto::is_explicit_report_request(text)
        || is_mission_request(text)
        || is_any_follow_up_cue(text);
    let duplicate = state.dedupe.check_and_touch(
        &input.source,
        &input.sender_id,
        &input.user_context_id,
        &input.session_key,
        text,
    );
    if duplicate && !carve_out {
        return Ok(canned(state, input, Route::DuplicateSkipped, DUPLICATE_REPLY).await);
    }
    if duplicate && fastpath::crypto::is_explicit_report_request(text) {
        // Replay the last report so the user sees it again.
        if let Some(report) = state.last_crypto_report(&input.user_context_id) {
            return Ok(canned(state, input, Route::DuplicateCryptoReplay, report).await);
        }
    }

    // 3. Explicit memory update.
    if let Some(fact) = parse_memory_update(text) {
        state
            .memory
            .upsert_fact(&input.user_context_id, &fact.key, &fact.text)?;
        let reply = format!("Got it. Memory updated: {}.", fact.text);
        return Ok(canned(state, input, Route::MemoryUpdate, reply).await);
    }

    // 4. Skill-preference update.
    if let Some((skill, directive)) = parse_skill_preference(text) {
        state.memory.upsert_preference(
            &input.user_context_id,
            &format!("skill:{skill}"),
            &directive,
        )?;
        let reply = format!("Noted. For the {skill} skill I'll {directive}.");
        return Ok(canned(state, input, Route::SkillPreference, reply).await);
    }

    let conversation_id = input
        .conversation_id
        .clone()
        .unwrap_or_else(|| nova_sessions::derive_conversation_id(&input.source, &input.sender_id));

    // 5. Mission short-term context: cancel / refine.
    let mission_policy = DomainPolicy::for_domain(ContextDomain::MissionTask);
    if let Some(ctx) =
        state
            .shortterm
            .get(&input.user_context_id, &conversation_id, ContextDomain::MissionTask)
    {
        if mission_policy.is_cancel(text) {
            state.shortterm.clear(
                &input.user_context_id,
                &conversation_id,
                ContextDomain::MissionTask,
            );
            state.pending.clear(&input.session_key, PendingKind::Mission);
            return Ok(canned(
                state,
                input,
                Route::MissionContextCancelled,
                "Okay, I've dropped that mission draft.",
            )
            .await);
        }
        if mission_policy.is_non_critical_follow_up(text)
            && state.pending.get(&input.session_key, PendingKind::Mission).is_none()
            && state.pending.get(&input.session_key, PendingKind::Weather).is_none()
        {
            let base = ctx
                .slots
                .get("prompt")
                .cloned()
                .unwrap_or(ctx.last_user_excerpt);
            let merged = format!("{base} {text}");
            state
                .pending
                .set(&input.session_key, PendingKind::Mission, merged.clone(), None);
            remember_mission_context(state, input, &conversation_id, &merged);
            return Ok(canned(
                state,
                input,
                Route::MissionContextRefined,
                mission_confirm_reply(&merged),
            )
            .await);
        }
    }

    // 6. Pending weather confirmation.
    if let Some(pending) = state.pending.get(&input.session_key, PendingKind::Weather) {
        if let Some(remainder) = yes_like(text) {
            state.pending.clear(&input.session_key, PendingKind::Weather);
            let location = if remainder.is_empty() {
                pending.suggested_location.clone()
            } else {
                Some(remainder)
            };
            return Ok(confirmed_weather_lookup(state, input, location).await);
        }
        if no_like(text) {
            state.pending.clear(&input.session_key, PendingKind::Weather);
            return Ok(canned(
                state,
                input,
                Route::WeatherConfirmDeclined,
                "No problem, skipping the weather check.",
            )
            .await);
        }
        // Anything else clears the pending state so the user isn't trapped
        // in a yes/no loop, then routing continues.
        state.pending.clear(&input.session_key, PendingKind::Weather);
    }

    // 7. Pending mission confirmation.
    if let Some(pending) = state.pending.get(&input.session_key, PendingKind::Mission) {
        if yes_like(text).is_some() {
            state.pending.clear(&input.session_key, PendingKind::Mission);
            let reply = state
                .workflow
                .build(&input.user_context_id, &pending.prompt)
                .await?;
            state.shortterm.clear(
                &input.user_context_id,
                &conversation_id,
                ContextDomain::MissionTask,
            );
            return Ok(canned(state, input, Route::MissionConfirmAccepted, reply).await);
        }
        if no_like(text) {
            state.pending.clear(&input.session_key, PendingKind::Mission);
            return Ok(canned(
                state,
                input,
                Route::MissionConfirmDeclined,
                "Okay, I won't set that mission up.",
            )
            .await);
        }
        if is_mission_detail_follow_up(text) {
            let merged = format!("{} {}", pending.prompt, text);
            state
                .pending
                .set(&input.session_key, PendingKind::Mission, merged.clone(), None);
            remember_mission_context(state, input, &conversation_id, &merged);
            return Ok(canned(
                state,
                input,
                Route::MissionConfirmPrompt,
                mission_confirm_reply(&merged),
            )
            .await);
        }
        // Unrelated turn: leave the pending mission armed and keep routing.
    }

    // 8. Direct workflow build.
    if is_workflow_build_intent(text) {
        let reply = state.workflow.build(&input.user_context_id, text).await?;
        return Ok(canned(state, input, Route::WorkflowBuild, reply).await);
    }

    // 9. Workflow confirmation prompt.
    if is_mission_request(text) {
        state
            .pending
            .set(&input.session_key, PendingKind::Mission, text.to_string(), None);
        remember_mission_context(state, input, &conversation_id, text);
        return Ok(canned(
            state,
            input,
            Route::MissionConfirmPrompt,
            mission_confirm_reply(text),
        )
        .await);
    }

    // 10. Music.
    if is_music_intent(text) {
        let reply = state.music.handle(&input.user_context_id, text).await?;
        return Ok(canned(state, input, Route::Music, reply).await);
    }

    // 11. Everything else: the chat execution engine.
    run_chat_turn(state, input, cancel).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Confirmed weather lookup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn confirmed_weather_lookup(
    state: &EngineState,
    input: &TurnInput,
    location: Option<String>,
) -> RunSummary {
    let Some(location) = location else {
        // Still no city: re-arm and ask again.
        state.pending.set(
            &input.session_key,
            PendingKind::Weather,
            input.text.clone(),
            None,
        );
        return canned(
            state,
            input,
            Route::FastPathWeatherConfirmPrompt,
            "I still need a city. Which one should I check?",
        )
        .await;
    };

    match state.weather.lookup(&location).await {
        Ok(report) => {
            let mut summary = RunSummary::routed(Route::WeatherConfirmAccepted, report.summary);
            summary.tool_calls.push(ToolCallRecord {
                name: "weather_lookup".into(),
                ok: true,
                duration_ms: 0,
                error: None,
            });
            stream_whole_reply(state, &Uuid::new_v4().to_string(), &summary.reply).await;
            persist_turn(state, input, &summary.reply, &summary).await;
            summary
        }
        Err(e) => {
            let mut summary = RunSummary::routed(
                Route::WeatherConfirmAccepted,
                format!("I couldn't fetch the weather for {location} just now. Try again in a bit."),
            );
            summary.tool_calls.push(ToolCallRecord {
                name: "weather_lookup".into(),
                ok: false,
                duration_ms: 0,
                error: Some(e.to_string()),
            });
            stream_whole_reply(state, &Uuid::new_v4().to_string(), &summary.reply).await;
            persist_turn(state, input, &summary.reply, &summary).await;
            summary
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn normalize_for_match(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', '!', '?'])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `yes`-shaped reply. Returns the remainder after the affirmation (used to
/// pick a location out of "yes, Pittsburgh PA").
fn yes_like(text: &str) -> Option<String> {
    let lowered = text.trim().to_lowercase();
    for prefix in ["yes", "yeah", "yep", "sure", "go ahead", "do it", "please do", "y"] {
        if lowered == *prefix {
            return Some(String::new());
        }
        if let Some(rest) = lowered.strip_prefix(prefix) {
            if rest.starts_with([' ', ',', '.', '!', ':', '-']) {
                // Preserve the original casing of the remainder.
                let remainder = text.trim()[prefix.len()..]
                    .trim_start_matches([' ', ',', '.', '!', ':', '-'])
                    .trim()
                    .to_string();
                return Some(remainder);
            }
        }
    }
    None
}

fn no_like(text: &str) -> bool {
    matches!(
        normalize_for_match(text).as_str(),
        "no" | "nope" | "nah" | "no thanks" | "don't" | "dont" | "cancel" | "n"
    )
}

fn is_mission_request(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let names_mission = lowered.contains("mission") || lowered.contains("workflow");
    let creation_verb = ["create", "make", "set up", "setup", "schedule", "automate"]
        .iter()
        .any(|v| lowered.contains(v));
    names_mission && creation_verb
}

fn is_workflow_build_intent(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    Regex::new(r"^(?:please |just )?build (?:the |that |a |an )?(?:mission|workflow)\b")
        .expect("static regex")
        .is_match(&lowered)
}

fn is_mission_detail_follow_up(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let time_like = Regex::new(r"\b(?:at\s+)?\d{1,2}(?::\d{2})?\s*(?:am|pm)\b")
        .expect("static regex")
        .is_match(&lowered);
    let channel_like = ["telegram", "discord", "email", "hud", "novachat"]
        .iter()
        .any(|c| lowered.contains(c));
    let cadence_like = ["daily", "weekly", "every "].iter().any(|c| lowered.contains(c));
    (time_like || channel_like || cadence_like)
        && lowered.split_whitespace().count() <= 12
}

fn is_any_follow_up_cue(text: &str) -> bool {
    [
        ContextDomain::Assistant,
        ContextDomain::MissionTask,
        ContextDomain::Crypto,
    ]
    .into_iter()
    .any(|domain| DomainPolicy::for_domain(domain).is_non_critical_follow_up(text))
}

fn is_music_intent(text: &str) -> bool {
    let lowered = text.to_lowercase();
    if lowered.contains("spotify") {
        return true;
    }
    let play = Regex::new(r"^(?:please )?play\s+(?P<what>.+)$").expect("static regex");
    if let Some(caps) = play.captures(lowered.trim()) {
        let what = &caps["what"];
        // `play a game/video/role` is not music.
        return !Regex::new(r"^(?:a |an |the )?(?:game|video|role|round)\b")
            .expect("static regex")
            .is_match(what);
    }
    false
}

fn parse_skill_preference(text: &str) -> Option<(String, String)> {
    let direct = Regex::new(
        r"(?i)^(?:set |update )?skill preference[:,]?\s+(?P<skill>[a-z0-9_-]+)\s*[:=]?\s+(?P<directive>.+)$",
    )
    .expect("static regex");
    let phrased =
        Regex::new(r"(?i)^for the (?P<skill>[a-z0-9_-]+) skill[,:]?\s+(?P<directive>.+)$")
            .expect("static regex");

    let caps = direct.captures(text.trim()).or_else(|| phrased.captures(text.trim()))?;
    let skill = caps["skill"].to_lowercase();
    let directive = caps["directive"]
        .trim()
        .trim_end_matches(['.', '!'])
        .to_string();
    if directive.is_empty() {
        None
    } else {
        Some((skill, directive))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mission helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn extract_mission_time(text: &str) -> Option<String> {
    // The last time mentioned wins, so refinements override the original.
    let re = Regex::new(r"(?i)\b(?:at\s+)?(\d{1,2}(?::\d{2})?\s*(?:am|pm))\b").expect("static regex");
    re.captures_iter(text)
        .last()
        .map(|caps| caps[1].to_lowercase().replace(' ', ""))
}

fn extract_mission_channel(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)\b(?:on|to|via)\s+(telegram|discord|email|hud|novachat)\b")
        .expect("static regex");
    re.captures(text).map(|caps| {
        let raw = caps[1].to_lowercase();
        let mut chars = raw.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => raw,
        }
    })
}

/// The confirmation prompt for a drafted mission. Leads with what was
/// understood (time, channel) so the user can correct details inline.
fn mission_confirm_reply(prompt: &str) -> String {
    let mut reply = String::from("I can turn that into a mission");
    if let Some(time) = extract_mission_time(prompt) {
        reply.push_str(&format!(" at {time}"));
    }
    if let Some(channel) = extract_mission_channel(prompt) {
        reply.push_str(&format!(" to {channel}"));
    }
    reply.push_str(". Want me to set it up? Reply yes to confirm, no to drop it, or add a \
                    detail like a time or channel.");
    reply
}

fn remember_mission_context(
    state: &EngineState,
    input: &TurnInput,
    conversation_id: &str,
    prompt: &str,
) {
    let policy = DomainPolicy::for_domain(ContextDomain::MissionTask);
    let mut ctx = ContextState::new(policy.resolve_topic_affinity_id(prompt));
    ctx.slots.insert("prompt".into(), prompt.to_string());
    ctx.last_user_excerpt = prompt.chars().take(160).collect();
    state.shortterm.upsert(
        &input.user_context_id,
        conversation_id,
        ContextDomain::MissionTask,
        ctx,
    );
}
