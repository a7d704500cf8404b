use serde::{Deserialize, Serialize};

/// What happened to one candidate prompt section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionReport {
    pub title: String,
    pub tokens: u32,
    pub included: bool,
    /// Set when the section was dropped (`"section_cap"` / `"total_budget"`
    /// / `"empty"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drop_reason: Option<String>,
}

/// Machine-readable record of one prompt assembly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptReport {
    pub sections: Vec<SectionReport>,
    pub total_tokens: u32,
    pub history_budget_tokens: u32,
    pub history_messages_kept: usize,
}

impl PromptReport {
    pub fn included(&self, title: &str) -> bool {
        self.sections
            .iter()
            .any(|s| s.title == title && s.included)
    }
}
