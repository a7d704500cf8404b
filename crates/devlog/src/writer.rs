//! The JSONL dev-log writer.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use nova_domain::config::{DevLogConfig, RedactMode};
use nova_domain::error::{Error, Result};
use nova_domain::turn::RunSummary;

use crate::alerts::GuardrailAlertEvaluator;
use crate::quality::{annotate, QualityAnnotation};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One dev-log line: the run summary plus quality annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub timestamp: String,
    pub user_context_id: String,
    pub session_key: String,
    pub source: String,
    pub user_text: String,
    pub summary: RunSummary,
    pub quality_score: f64,
    pub tags: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Writer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DevLog {
    config: DevLogConfig,
    aggregate_path: PathBuf,
    users_dir: PathBuf,
    archive_dir: PathBuf,
    /// Paths already announced in the process log, so startup noise happens
    /// once per file.
    announced: Mutex<HashSet<PathBuf>>,
    alerts: GuardrailAlertEvaluator,
    write_lock: Mutex<()>,
}

impl DevLog {
    pub fn new(config: DevLogConfig) -> Result<Self> {
        let aggregate_path = PathBuf::from(&config.log_path);
        let base = aggregate_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let users_dir = base.join("users");
        let archive_dir = base.join("archive");
        std::fs::create_dir_all(&users_dir).map_err(Error::Io)?;
        std::fs::create_dir_all(&archive_dir).map_err(Error::Io)?;
        let alerts = GuardrailAlertEvaluator::new(&config);
        Ok(Self {
            config,
            aggregate_path,
            users_dir,
            archive_dir,
            announced: Mutex::new(HashSet::new()),
            alerts,
            write_lock: Mutex::new(()),
        })
    }

    /// Close one turn: annotate, redact, append everywhere, evaluate alerts.
    ///
    /// Failures are logged, never propagated: the dev log must not be able
    /// to break a turn.
    pub fn record_turn(
        &self,
        user_context_id: &str,
        session_key: &str,
        source: &str,
        user_text: &str,
        summary: &RunSummary,
    ) -> QualityAnnotation {
        let annotation = annotate(summary);
        if !self.config.enabled {
            return annotation;
        }

        let mut sanitized = summary.clone();
        sanitized.reply = self.sanitize(&sanitized.reply);

        let record = ConversationRecord {
            timestamp: Utc::now().to_rfc3339(),
            user_context_id: user_context_id.to_string(),
            session_key: session_key.to_string(),
            source: source.to_string(),
            user_text: self.sanitize(user_text),
            summary: sanitized,
            quality_score: annotation.score,
            tags: annotation.tags.clone(),
        };

        if let Err(e) = self.append_record(user_context_id, &record) {
            tracing::warn!(error = %e, "dev log append failed");
        }

        if annotation.score <= self.config.warn_score_threshold {
            tracing::warn!(
                user = user_context_id,
                score = annotation.score,
                route = %summary.route,
                tags = ?annotation.tags,
                "low-quality turn"
            );
        }

        for alert in self.alerts.record(user_context_id, &summary.guardrails) {
            tracing::warn!(
                scope = %alert.scope,
                counter = %alert.counter,
                rate = alert.rate,
                samples = alert.samples,
                "tool-loop guardrail rate over threshold"
            );
        }

        annotation
    }

    fn append_record(&self, user_context_id: &str, record: &ConversationRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let day = Utc::now().format("%Y-%m-%d").to_string();

        let targets = [
            self.aggregate_path.clone(),
            self.users_dir.join(format!("{user_context_id}.jsonl")),
            self.archive_dir.join(format!("{day}.jsonl")),
        ];

        let _guard = self.write_lock.lock();
        for path in targets {
            self.announce(&path);
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(Error::Io)?;
            file.write_all(line.as_bytes()).map_err(Error::Io)?;
            file.write_all(b"\n").map_err(Error::Io)?;
        }
        Ok(())
    }

    fn announce(&self, path: &Path) {
        let mut announced = self.announced.lock();
        if announced.insert(path.to_path_buf()) {
            tracing::info!(path = %path.display(), "dev log sink opened");
        }
    }

    /// Apply the configured redaction mode and character cap to a text field.
    fn sanitize(&self, text: &str) -> String {
        match self.config.redact_mode {
            RedactMode::Plain => truncate_chars(text, self.config.max_chars),
            RedactMode::Redact => format!("[redacted {} chars]", text.chars().count()),
            RedactMode::Hash => {
                let mut hasher = Sha256::new();
                hasher.update(self.config.hash_salt.as_bytes());
                hasher.update(text.as_bytes());
                let digest = hex::encode(hasher.finalize());
                format!("sha256:{}", &digest[..16])
            }
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max).collect();
    format!("{truncated}…[truncated]")
}
