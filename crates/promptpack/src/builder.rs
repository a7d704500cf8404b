//! Budgeted prompt builder.

use crate::budget::estimate_tokens;
use crate::report::{PromptReport, SectionReport};

/// Appends titled sections to a system prompt while a total token budget and
/// a per-section cap hold. Sections that do not fit are dropped whole (never
/// truncated mid-sentence) and recorded in the report.
pub struct PromptBuilder {
    prompt: String,
    total_budget_tokens: u32,
    section_cap_tokens: u32,
    used_tokens: u32,
    report: PromptReport,
}

impl PromptBuilder {
    /// Start from a base prompt (the persona), which always counts against
    /// the budget but is never dropped.
    pub fn new(base: &str, total_budget_tokens: u32, section_cap_tokens: u32) -> Self {
        let used = estimate_tokens(base);
        Self {
            prompt: base.to_string(),
            total_budget_tokens,
            section_cap_tokens,
            used_tokens: used,
            report: PromptReport::default(),
        }
    }

    /// Append `## title\nbody` when it fits both the per-section cap and the
    /// remaining total budget. Returns whether the section was included.
    pub fn append_section(&mut self, title: &str, body: &str) -> bool {
        let body = body.trim();
        if body.is_empty() {
            self.report.sections.push(SectionReport {
                title: title.to_string(),
                tokens: 0,
                included: false,
                drop_reason: Some("empty".into()),
            });
            return false;
        }

        let rendered = format!("\n\n## {title}\n{body}");
        let tokens = estimate_tokens(&rendered);

        let drop_reason = if tokens > self.section_cap_tokens {
            Some("section_cap")
        } else if self.used_tokens + tokens > self.total_budget_tokens {
            Some("total_budget")
        } else {
            None
        };

        if let Some(reason) = drop_reason {
            tracing::debug!(
                section = title,
                tokens,
                reason,
                "prompt section dropped"
            );
            self.report.sections.push(SectionReport {
                title: title.to_string(),
                tokens,
                included: false,
                drop_reason: Some(reason.into()),
            });
            return false;
        }

        self.prompt.push_str(&rendered);
        self.used_tokens += tokens;
        self.report.sections.push(SectionReport {
            title: title.to_string(),
            tokens,
            included: true,
            drop_reason: None,
        });
        true
    }

    /// Tokens consumed so far (base + included sections).
    pub fn used_tokens(&self) -> u32 {
        self.used_tokens
    }

    pub fn finish(mut self) -> (String, PromptReport) {
        self.report.total_tokens = self.used_tokens;
        (self.prompt, self.report)
    }

    /// Record history trimming results on the report before finishing.
    pub fn note_history(&mut self, budget_tokens: u32, messages_kept: usize) {
        self.report.history_budget_tokens = budget_tokens;
        self.report.history_messages_kept = messages_kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_append_in_order() {
        let mut builder = PromptBuilder::new("base persona", 1_000, 500);
        assert!(builder.append_section("Tone", "be kind"));
        assert!(builder.append_section("Facts", "user likes tea"));
        let (prompt, report) = builder.finish();
        assert!(prompt.starts_with("base persona"));
        let tone_at = prompt.find("## Tone").unwrap();
        let facts_at = prompt.find("## Facts").unwrap();
        assert!(tone_at < facts_at);
        assert_eq!(report.sections.len(), 2);
        assert!(report.included("Tone"));
    }

    #[test]
    fn oversized_section_is_dropped_whole() {
        let mut builder = PromptBuilder::new("", 10_000, 50);
        let included = builder.append_section("Huge", &"x".repeat(1_000));
        assert!(!included);
        let (prompt, report) = builder.finish();
        assert!(!prompt.contains("Huge"));
        assert_eq!(
            report.sections[0].drop_reason.as_deref(),
            Some("section_cap")
        );
    }

    #[test]
    fn total_budget_stops_later_sections() {
        let mut builder = PromptBuilder::new("", 60, 50);
        assert!(builder.append_section("A", &"a".repeat(150))); // ~40 tokens
        assert!(!builder.append_section("B", &"b".repeat(150)));
        let (_, report) = builder.finish();
        assert_eq!(
            report.sections[1].drop_reason.as_deref(),
            Some("total_budget")
        );
    }

    #[test]
    fn empty_body_never_included() {
        let mut builder = PromptBuilder::new("base", 1_000, 500);
        assert!(!builder.append_section("Empty", "   "));
        let (prompt, report) = builder.finish();
        assert!(!prompt.contains("Empty"));
        assert_eq!(report.sections[0].drop_reason.as_deref(), Some("empty"));
    }

    #[test]
    fn base_counts_against_budget() {
        let mut builder = PromptBuilder::new(&"p".repeat(400), 110, 500); // base ~100 tokens
        assert!(!builder.append_section("A", &"a".repeat(100)));
    }
}
