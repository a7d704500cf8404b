//! Dev conversation log.
//!
//! One JSONL record per turn: the run summary wrapped with quality
//! annotations, written to a per-user log, the aggregate log, and a per-day
//! archive mirror. A sliding-window evaluator watches tool-loop guardrail
//! rates per user scope and raises bounded warn-level alerts.

pub mod alerts;
pub mod quality;
pub mod writer;

pub use alerts::{GuardrailAlert, GuardrailAlertEvaluator};
pub use quality::{annotate, QualityAnnotation};
pub use writer::{ConversationRecord, DevLog};
