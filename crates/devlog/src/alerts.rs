//! Sliding-window guardrail alerting.
//!
//! Per user scope, the evaluator keeps the last N guardrail snapshots and
//! computes breach rates per counter. Once a scope has enough samples, any
//! rate crossing its threshold raises one alert, then that (scope, counter)
//! pair goes quiet for the cooldown period.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use nova_domain::config::DevLogConfig;
use nova_domain::turn::GuardrailSnapshot;

/// The guardrail counters tracked per scope.
const COUNTERS: [&str; 4] = [
    "budget_exhausted",
    "step_timeout",
    "tool_exec_timeout",
    "call_capped",
];

#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailAlert {
    pub scope: String,
    pub counter: String,
    /// Breach rate over the window, 0.0–1.0.
    pub rate: f64,
    pub samples: usize,
}

struct ScopeWindow {
    samples: VecDeque<[bool; 4]>,
    last_alert: HashMap<&'static str, Instant>,
}

pub struct GuardrailAlertEvaluator {
    window: usize,
    min_samples: usize,
    thresholds: [f64; 4],
    cooldown: Duration,
    scopes: Mutex<HashMap<String, ScopeWindow>>,
}

impl GuardrailAlertEvaluator {
    pub fn new(cfg: &DevLogConfig) -> Self {
        Self {
            window: cfg.alert_window,
            min_samples: cfg.alert_min_samples,
            thresholds: [
                cfg.alert_thresholds.budget_exhausted,
                cfg.alert_thresholds.step_timeout,
                cfg.alert_thresholds.tool_exec_timeout,
                cfg.alert_thresholds.call_capped,
            ],
            cooldown: Duration::from_secs(cfg.alert_cooldown_secs),
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Record one turn's guardrail snapshot for a user scope and return any
    /// alerts that fired.
    pub fn record(&self, scope: &str, snapshot: &GuardrailSnapshot) -> Vec<GuardrailAlert> {
        let breaches = [
            snapshot.budget_exhausted,
            snapshot.step_timeouts > 0,
            snapshot.tool_execution_timeouts > 0,
            snapshot.calls_capped > 0,
        ];

        let mut scopes = self.scopes.lock();
        let entry = scopes.entry(scope.to_string()).or_insert_with(|| ScopeWindow {
            samples: VecDeque::with_capacity(self.window),
            last_alert: HashMap::new(),
        });

        if entry.samples.len() == self.window {
            entry.samples.pop_front();
        }
        entry.samples.push_back(breaches);

        let samples = entry.samples.len();
        if samples < self.min_samples {
            return Vec::new();
        }

        let now = Instant::now();
        let mut alerts = Vec::new();
        for (idx, counter) in COUNTERS.iter().enumerate() {
            let hits = entry.samples.iter().filter(|s| s[idx]).count();
            let rate = hits as f64 / samples as f64;
            if rate < self.thresholds[idx] {
                continue;
            }
            if let Some(last) = entry.last_alert.get(counter) {
                if now.duration_since(*last) < self.cooldown {
                    continue;
                }
            }
            entry.last_alert.insert(counter, now);
            alerts.push(GuardrailAlert {
                scope: scope.to_string(),
                counter: counter.to_string(),
                rate,
                samples,
            });
        }
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(window: usize, min_samples: usize, cooldown_secs: u64) -> DevLogConfig {
        DevLogConfig {
            alert_window: window,
            alert_min_samples: min_samples,
            alert_cooldown_secs: cooldown_secs,
            ..Default::default()
        }
    }

    fn breach() -> GuardrailSnapshot {
        GuardrailSnapshot {
            tool_execution_timeouts: 1,
            ..Default::default()
        }
    }

    #[test]
    fn no_alert_below_min_samples() {
        let eval = GuardrailAlertEvaluator::new(&cfg(10, 5, 300));
        for _ in 0..4 {
            assert!(eval.record("alice", &breach()).is_empty());
        }
    }

    #[test]
    fn alert_fires_once_over_threshold() {
        let eval = GuardrailAlertEvaluator::new(&cfg(10, 3, 300));
        eval.record("alice", &breach());
        eval.record("alice", &breach());
        let alerts = eval.record("alice", &breach());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].counter, "tool_exec_timeout");
        assert!((alerts[0].rate - 1.0).abs() < 1e-9);

        // Cooldown suppresses the next firing.
        assert!(eval.record("alice", &breach()).is_empty());
    }

    #[test]
    fn cooldown_expiry_re_arms() {
        let eval = GuardrailAlertEvaluator::new(&cfg(10, 2, 0));
        eval.record("alice", &breach());
        assert_eq!(eval.record("alice", &breach()).len(), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(eval.record("alice", &breach()).len(), 1);
    }

    #[test]
    fn scopes_are_independent() {
        let eval = GuardrailAlertEvaluator::new(&cfg(10, 2, 300));
        eval.record("alice", &breach());
        eval.record("alice", &breach());
        // Bob has no samples yet.
        assert!(eval.record("bob", &GuardrailSnapshot::default()).is_empty());
    }

    #[test]
    fn clean_turns_dilute_the_rate() {
        let eval = GuardrailAlertEvaluator::new(&cfg(10, 10, 300));
        // 2 breaches in 10 samples = 0.2 < default 0.3 threshold.
        for i in 0..10 {
            let snapshot = if i < 2 {
                breach()
            } else {
                GuardrailSnapshot::default()
            };
            let alerts = eval.record("alice", &snapshot);
            assert!(alerts.is_empty(), "unexpected alert at sample {i}");
        }
    }

    #[test]
    fn window_slides_old_samples_out() {
        let eval = GuardrailAlertEvaluator::new(&cfg(4, 4, 0));
        // Fill the window with breaches, then flush with clean turns.
        for _ in 0..4 {
            eval.record("alice", &breach());
        }
        for _ in 0..4 {
            eval.record("alice", &GuardrailSnapshot::default());
        }
        // Window now holds only clean samples; another clean turn: no alert.
        assert!(eval.record("alice", &GuardrailSnapshot::default()).is_empty());
    }
}
