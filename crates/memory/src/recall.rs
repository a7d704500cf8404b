//! The recall seam queried by live-memory enrichment.

use std::sync::Arc;

use nova_domain::error::Result;

use crate::store::MemoryFileStore;

/// One recalled memory entry.
#[derive(Debug, Clone)]
pub struct RecallHit {
    pub key: String,
    pub text: String,
    pub score: f32,
}

/// Why recall returned what it did.
#[derive(Debug, Clone, Default)]
pub struct RecallDiagnostics {
    pub candidates_scanned: usize,
    pub query_terms: usize,
}

/// Memory search used by the enrichment pass. The production deployment may
/// back this with a vector index; the default implementation scores keyword
/// overlap against the user's MEMORY.md.
#[async_trait::async_trait]
pub trait MemoryRecall: Send + Sync {
    async fn search(&self, user_context_id: &str, query: &str, k: usize) -> Result<Vec<RecallHit>>;

    async fn search_with_diagnostics(
        &self,
        user_context_id: &str,
        query: &str,
        k: usize,
    ) -> Result<(Vec<RecallHit>, RecallDiagnostics)>;
}

/// Keyword-overlap recall over [`MemoryFileStore`].
pub struct KeywordRecall {
    store: Arc<MemoryFileStore>,
}

impl KeywordRecall {
    pub fn new(store: Arc<MemoryFileStore>) -> Self {
        Self { store }
    }

    fn terms(query: &str) -> Vec<String> {
        query
            .split_whitespace()
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
                    .to_lowercase()
            })
            .filter(|w| w.len() >= 3)
            .collect()
    }
}

#[async_trait::async_trait]
impl MemoryRecall for KeywordRecall {
    async fn search(&self, user_context_id: &str, query: &str, k: usize) -> Result<Vec<RecallHit>> {
        let (hits, _) = self.search_with_diagnostics(user_context_id, query, k).await?;
        Ok(hits)
    }

    async fn search_with_diagnostics(
        &self,
        user_context_id: &str,
        query: &str,
        k: usize,
    ) -> Result<(Vec<RecallHit>, RecallDiagnostics)> {
        let terms = Self::terms(query);
        let entries = self.store.all_entries(user_context_id)?;
        let diagnostics = RecallDiagnostics {
            candidates_scanned: entries.len(),
            query_terms: terms.len(),
        };
        if terms.is_empty() {
            return Ok((Vec::new(), diagnostics));
        }

        let mut hits: Vec<RecallHit> = entries
            .into_iter()
            .filter_map(|(key, text)| {
                let haystack = format!("{key} {text}").to_lowercase();
                let matched = terms.iter().filter(|t| haystack.contains(*t)).count();
                if matched == 0 {
                    return None;
                }
                Some(RecallHit {
                    key,
                    text,
                    score: matched as f32 / terms.len() as f32,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok((hits, diagnostics))
    }
}
