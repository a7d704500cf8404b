//! Tool-loop guardrails: the wall-clock budget, the per-step tool-call cap,
//! and timeout classification.

use std::time::{Duration, Instant};

use nova_domain::error::Error;
use nova_domain::tool::ToolCall;
use nova_domain::turn::GuardrailSnapshot;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Total wall-clock budget for one tool loop. Every per-step timeout is
/// clipped to the remaining budget so the loop can never overrun it.
pub struct ToolLoopBudget {
    started: Instant,
    max: Duration,
}

impl ToolLoopBudget {
    pub fn new(max_duration_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            max: Duration::from_millis(max_duration_ms),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.started.elapsed() >= self.max
    }

    pub fn remaining_ms(&self) -> u64 {
        self.max
            .saturating_sub(self.started.elapsed())
            .as_millis() as u64
    }

    /// Clip `desired_ms` to the remaining budget, never dropping below
    /// `floor_ms` while budget remains. Returns 0 when the budget is gone.
    pub fn resolve_timeout_ms(&self, desired_ms: u64, floor_ms: u64) -> u64 {
        let remaining = self.remaining_ms();
        if remaining == 0 {
            return 0;
        }
        desired_ms.min(remaining).max(floor_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-step tool-call cap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CapResult {
    /// The calls to actually execute, in request order.
    pub kept: Vec<ToolCall>,
    /// The calls dropped by the cap (they still need guardrail-note results).
    pub dropped: Vec<ToolCall>,
    pub was_capped: bool,
    pub requested_count: usize,
}

/// Deterministically truncate a step's tool calls to `max`.
pub fn cap_tool_calls_per_step(calls: Vec<ToolCall>, max: usize) -> CapResult {
    let requested_count = calls.len();
    if requested_count <= max {
        return CapResult {
            kept: calls,
            dropped: Vec::new(),
            was_capped: false,
            requested_count,
        };
    }
    let mut kept = calls;
    let dropped = kept.split_off(max);
    CapResult {
        kept,
        dropped,
        was_capped: true,
        requested_count,
    }
}

/// The note injected as the tool result for every dropped call, so the model
/// sees why nothing ran.
pub fn cap_note(requested: usize, max: usize) -> String {
    format!(
        "[guardrail] {requested} tool calls were requested this step; only the first {max} ran. \
         This call was skipped — re-issue it next step if still needed."
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeout classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Whether an error looks like a transport timeout, across the shapes the
/// HTTP stack and tool runtimes produce.
pub fn is_likely_timeout_error(err: &Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    let message = err.to_string().to_lowercase();
    ["timed out", "timeout", "deadline exceeded", "etimedout", "connection reset"]
        .iter()
        .any(|needle| message.contains(needle))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Counters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable guardrail counters for one loop run.
#[derive(Debug, Default)]
pub struct GuardrailCounters {
    pub budget_exhausted: bool,
    pub step_timeouts: u32,
    pub tool_execution_timeouts: u32,
    pub calls_capped: u32,
    pub steps_taken: u32,
}

impl GuardrailCounters {
    pub fn snapshot(&self) -> GuardrailSnapshot {
        GuardrailSnapshot {
            budget_exhausted: self.budget_exhausted,
            step_timeouts: self.step_timeouts,
            tool_execution_timeouts: self.tool_execution_timeouts,
            calls_capped: self.calls_capped,
            steps_taken: self.steps_taken,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            call_id: id.into(),
            tool_name: "t".into(),
            arguments: serde_json::json!({}),
        }
    }

    #[test]
    fn budget_counts_down() {
        let budget = ToolLoopBudget::new(60_000);
        assert!(!budget.is_exhausted());
        assert!(budget.remaining_ms() <= 60_000);
        assert!(budget.remaining_ms() > 55_000);
    }

    #[test]
    fn resolve_timeout_clips_to_remaining() {
        let budget = ToolLoopBudget::new(1_000);
        // Desired above remaining: clipped.
        let resolved = budget.resolve_timeout_ms(20_000, 100);
        assert!(resolved <= 1_000);
        assert!(resolved >= 100);
        // Desired below remaining: untouched.
        assert_eq!(budget.resolve_timeout_ms(50, 0), 50);
    }

    #[test]
    fn exhausted_budget_resolves_zero() {
        let budget = ToolLoopBudget::new(0);
        assert!(budget.is_exhausted());
        assert_eq!(budget.resolve_timeout_ms(5_000, 100), 0);
    }

    #[test]
    fn cap_keeps_prefix_in_order() {
        let result = cap_tool_calls_per_step(vec![call("a"), call("b"), call("c")], 2);
        assert!(result.was_capped);
        assert_eq!(result.requested_count, 3);
        assert_eq!(result.kept.len(), 2);
        assert_eq!(result.kept[0].call_id, "a");
        assert_eq!(result.dropped.len(), 1);
        assert_eq!(result.dropped[0].call_id, "c");
    }

    #[test]
    fn cap_noop_under_limit() {
        let result = cap_tool_calls_per_step(vec![call("a")], 4);
        assert!(!result.was_capped);
        assert!(result.dropped.is_empty());
    }

    #[test]
    fn timeout_classification_shapes() {
        assert!(is_likely_timeout_error(&Error::Timeout("llm".into())));
        assert!(is_likely_timeout_error(&Error::Http(
            "error sending request: operation timed out".into()
        )));
        assert!(is_likely_timeout_error(&Error::Other(
            "ETIMEDOUT while connecting".into()
        )));
        assert!(!is_likely_timeout_error(&Error::Http("HTTP 500".into())));
    }

    #[test]
    fn counters_snapshot() {
        let mut counters = GuardrailCounters::default();
        counters.calls_capped += 2;
        counters.steps_taken = 3;
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.calls_capped, 2);
        assert_eq!(snapshot.steps_taken, 3);
        assert!(snapshot.any_breach());
    }
}
