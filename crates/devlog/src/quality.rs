//! Per-turn quality scoring and tagging.

use serde::{Deserialize, Serialize};

use nova_domain::turn::RunSummary;

/// Turns slower than this end-to-end are tagged `slow_response`.
const SLOW_RESPONSE_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAnnotation {
    /// 0.0 (broken) … 1.0 (clean).
    pub score: f64,
    pub tags: Vec<String>,
}

/// Score one run summary and derive its tag set.
///
/// The score starts at 1.0 and loses a fixed penalty per defect class; it is
/// a triage signal for log scanning, not a product metric.
pub fn annotate(summary: &RunSummary) -> QualityAnnotation {
    let mut score: f64 = 1.0;
    let mut tags: Vec<String> = Vec::new();

    if summary.reply.trim().is_empty() {
        score -= 0.6;
        tags.push("empty_reply".into());
    }
    if summary.error.is_some() {
        score -= 0.5;
        tags.push("runtime_error".into());
    }
    if summary.fallback_stage.is_some() {
        score -= 0.3;
        tags.push("degraded_fallback".into());
    }
    if summary.constraint_correction_passes > 0 {
        score -= 0.1;
        tags.push("constraint_correction_pass".into());
    }

    let total_ms: u64 = summary.latency_stages.values().sum();
    if total_ms > SLOW_RESPONSE_MS {
        score -= 0.1;
        tags.push("slow_response".into());
    }

    if let Some(hot) = &summary.hot_path {
        tags.push(format!("hot_path_{hot}"));
    }

    let g = &summary.guardrails;
    if g.budget_exhausted {
        tags.push("tool_loop_budget_exhausted".into());
    }
    if g.step_timeouts > 0 {
        tags.push("tool_loop_step_timeout".into());
    }
    if g.tool_execution_timeouts > 0 {
        tags.push("tool_loop_tool_exec_timeout".into());
    }
    if g.calls_capped > 0 {
        tags.push("tool_loop_call_capped".into());
    }
    if g.any_breach() {
        score -= 0.2;
    }

    QualityAnnotation {
        score: score.clamp(0.0, 1.0),
        tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_domain::turn::{GuardrailSnapshot, Route};

    fn base_summary() -> RunSummary {
        RunSummary::routed(Route::ChatStream, "a fine reply")
    }

    #[test]
    fn clean_run_scores_full() {
        let a = annotate(&base_summary());
        assert_eq!(a.score, 1.0);
        assert!(a.tags.is_empty());
    }

    #[test]
    fn empty_reply_dominates_score() {
        let mut s = base_summary();
        s.reply = "".into();
        let a = annotate(&s);
        assert!(a.score <= 0.4);
        assert!(a.tags.contains(&"empty_reply".to_string()));
    }

    #[test]
    fn guardrail_tags_are_specific() {
        let mut s = base_summary();
        s.guardrails = GuardrailSnapshot {
            budget_exhausted: true,
            tool_execution_timeouts: 2,
            ..Default::default()
        };
        let a = annotate(&s);
        assert!(a.tags.contains(&"tool_loop_budget_exhausted".to_string()));
        assert!(a.tags.contains(&"tool_loop_tool_exec_timeout".to_string()));
        assert!(!a.tags.contains(&"tool_loop_step_timeout".to_string()));
        assert!(a.score < 1.0);
    }

    #[test]
    fn slow_turn_is_tagged() {
        let mut s = base_summary();
        s.latency_stages.insert("generation".into(), 11_000);
        let a = annotate(&s);
        assert!(a.tags.contains(&"slow_response".to_string()));
    }

    #[test]
    fn hot_path_tag_carries_name() {
        let mut s = base_summary();
        s.hot_path = Some("generation".into());
        let a = annotate(&s);
        assert!(a.tags.contains(&"hot_path_generation".to_string()));
    }

    #[test]
    fn score_never_goes_negative() {
        let mut s = base_summary();
        s.reply = "".into();
        s.error = Some("boom".into());
        s.fallback_stage = Some("deterministic".into());
        s.constraint_correction_passes = 1;
        s.guardrails.budget_exhausted = true;
        s.latency_stages.insert("generation".into(), 60_000);
        let a = annotate(&s);
        assert_eq!(a.score, 0.0);
    }
}
