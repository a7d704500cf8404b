/// Shared error type used across all Nova crates.
///
/// Inside a turn, provider and tool failures are handled as values; the only
/// variants that escape the engine are the config errors (`MissingApiKey`,
/// `ProviderDisabled`, `Config`), which the dispatcher surfaces intact.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("missing_api_key: {0}")]
    MissingApiKey(String),

    #[error("provider_disabled: {0}")]
    ProviderDisabled(String),

    #[error("config: {0}")]
    Config(String),

    #[error("memory: {0}")]
    Memory(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the error kinds the engine is allowed to propagate out of a
    /// turn (everything else must be converted into a fallback reply).
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::MissingApiKey(_) | Error::ProviderDisabled(_) | Error::Config(_)
        )
    }

    /// True when the error came from a timed-out outbound call.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_flagged() {
        assert!(Error::MissingApiKey("openai".into()).is_config());
        assert!(Error::ProviderDisabled("claude".into()).is_config());
        assert!(Error::Config("bad value".into()).is_config());
        assert!(!Error::Http("500".into()).is_config());
        assert!(!Error::Timeout("llm.create".into()).is_config());
    }

    #[test]
    fn timeout_is_flagged() {
        assert!(Error::Timeout("tool.exec".into()).is_timeout());
        assert!(!Error::Other("x".into()).is_timeout());
    }
}
