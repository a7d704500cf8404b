//! Token budget math.

use nova_domain::config::PromptBudgetConfig;
use nova_domain::tool::ChatMessage;

/// Estimate the token count of a text.
///
/// Four characters per token, rounded up: coarse, but it only has to be
/// consistent: every budget in the system is computed with the same
/// estimator, so relative comparisons hold.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

/// Compute the token budget available for history messages.
///
/// Subtracts the assembled system prompt, the user message, and the response
/// reserve from the max-prompt budget, clamps the remainder to
/// `[min_history_tokens, max_history_tokens]`, and prefers the lesser of
/// that clamp and `history_target_tokens`.
pub fn compute_history_token_budget(
    cfg: &PromptBudgetConfig,
    system_prompt_tokens: u32,
    user_message_tokens: u32,
) -> u32 {
    let available = cfg
        .max_prompt_tokens
        .saturating_sub(system_prompt_tokens)
        .saturating_sub(user_message_tokens)
        .saturating_sub(cfg.response_reserve_tokens);
    let clamped = available.clamp(cfg.min_history_tokens, cfg.max_history_tokens);
    clamped.min(cfg.history_target_tokens)
}

/// Keep the newest messages that fit in `budget_tokens`, preserving
/// chronological order. Messages are whole: the first one that does not fit
/// ends the walk, so history never truncates mid-sentence.
pub fn trim_history_to_budget(messages: &[ChatMessage], budget_tokens: u32) -> Vec<ChatMessage> {
    let mut spent: u32 = 0;
    let mut kept: Vec<ChatMessage> = Vec::new();

    for msg in messages.iter().rev() {
        let cost = estimate_tokens(&msg.content.joined_text());
        if spent + cost > budget_tokens {
            break;
        }
        spent += cost;
        kept.push(msg.clone());
    }

    kept.reverse();
    kept
}
