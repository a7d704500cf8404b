//! Per-turn latency telemetry.

use std::collections::BTreeMap;
use std::time::Instant;

/// Records how long each stage of a turn took. Stages are marked in order;
/// the hot path is the single slowest stage.
pub struct LatencyTelemetry {
    last_mark: Instant,
    stages: BTreeMap<String, u64>,
}

impl Default for LatencyTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyTelemetry {
    pub fn new() -> Self {
        Self {
            last_mark: Instant::now(),
            stages: BTreeMap::new(),
        }
    }

    /// Close the current stage under `name`; the next stage starts now.
    /// Re-entering a stage name accumulates.
    pub fn mark(&mut self, name: &str) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_mark).as_millis() as u64;
        *self.stages.entry(name.to_string()).or_insert(0) += elapsed;
        self.last_mark = now;
    }

    /// Record an externally measured duration without moving the mark.
    pub fn record(&mut self, name: &str, ms: u64) {
        *self.stages.entry(name.to_string()).or_insert(0) += ms;
    }

    pub fn total_ms(&self) -> u64 {
        self.stages.values().sum()
    }

    /// The stage map plus the hot path (slowest stage), ties broken by name
    /// order for determinism.
    pub fn snapshot(&self) -> (BTreeMap<String, u64>, Option<String>) {
        let hot = self
            .stages
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(name, _)| name.clone());
        (self.stages.clone(), hot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_accumulate_and_pick_hot_path() {
        let mut t = LatencyTelemetry::new();
        t.record("policy", 5);
        t.record("generation", 120);
        t.record("persistence", 8);
        let (stages, hot) = t.snapshot();
        assert_eq!(stages.len(), 3);
        assert_eq!(hot.as_deref(), Some("generation"));
        assert_eq!(t.total_ms(), 133);
    }

    #[test]
    fn reentered_stage_accumulates() {
        let mut t = LatencyTelemetry::new();
        t.record("enrichment", 10);
        t.record("enrichment", 15);
        let (stages, _) = t.snapshot();
        assert_eq!(stages["enrichment"], 25);
    }

    #[test]
    fn empty_telemetry_has_no_hot_path() {
        let t = LatencyTelemetry::new();
        let (stages, hot) = t.snapshot();
        assert!(stages.is_empty());
        assert!(hot.is_none());
    }
}
