//! Shared helpers for the provider adapters: timeout wrapping, error
//! translation, and cost estimation.

use std::future::Future;
use std::time::Duration;

use nova_domain::error::{Error, Result};
use nova_domain::stream::Usage;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Run `fut` under a deadline. On expiry the returned error carries `label`
/// so the call site shows up in messages and the dev log.
pub async fn with_timeout<T, F>(label: &str, timeout_ms: u64, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("{label} after {timeout_ms}ms"))),
    }
}

/// Pull a human-readable detail out of a provider error body.
///
/// Both wire formats nest the message under `error.message`; fall back to a
/// truncated body snippet when the JSON shape is unfamiliar.
pub fn error_detail(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        });
    match detail {
        Some(message) => format!("HTTP {status}: {message}"),
        None => {
            let snippet: String = body.chars().take(200).collect();
            format!("HTTP {status}: {snippet}")
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cost estimation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dollars per million input/output tokens for one model family.
#[derive(Debug, Clone, Copy)]
struct ModelPricing {
    prefix: &'static str,
    input_per_1m: f64,
    output_per_1m: f64,
}

/// Longest-prefix-match pricing table. Order matters: more specific
/// prefixes first.
const PRICING: &[ModelPricing] = &[
    ModelPricing { prefix: "gpt-4o-mini", input_per_1m: 0.15, output_per_1m: 0.60 },
    ModelPricing { prefix: "gpt-4o", input_per_1m: 2.50, output_per_1m: 10.00 },
    ModelPricing { prefix: "gpt-5-mini", input_per_1m: 0.25, output_per_1m: 2.00 },
    ModelPricing { prefix: "gpt-5", input_per_1m: 1.25, output_per_1m: 10.00 },
    ModelPricing { prefix: "claude-haiku", input_per_1m: 0.80, output_per_1m: 4.00 },
    ModelPricing { prefix: "claude-sonnet", input_per_1m: 3.00, output_per_1m: 15.00 },
    ModelPricing { prefix: "claude-opus", input_per_1m: 15.00, output_per_1m: 75.00 },
    ModelPricing { prefix: "grok-3-mini", input_per_1m: 0.30, output_per_1m: 0.50 },
    ModelPricing { prefix: "grok", input_per_1m: 3.00, output_per_1m: 15.00 },
    ModelPricing { prefix: "gemini-2.0-flash", input_per_1m: 0.10, output_per_1m: 0.40 },
    ModelPricing { prefix: "gemini", input_per_1m: 1.25, output_per_1m: 5.00 },
];

/// Estimated USD cost of one completion, or `None` for unknown models.
pub fn estimate_cost(model: &str, usage: &Usage) -> Option<f64> {
    let pricing = PRICING.iter().find(|p| model.starts_with(p.prefix))?;
    Some(
        (usage.prompt_tokens as f64 * pricing.input_per_1m
            + usage.completion_tokens as f64 * pricing.output_per_1m)
            / 1_000_000.0,
    )
}
