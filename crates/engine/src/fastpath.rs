//! Fast-path detectors: weather and crypto classifiers that can bypass the
//! LLM entirely.

pub mod weather {
    use regex::Regex;

    /// A detected weather question, with the location when one was named.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct WeatherQuery {
        pub location: Option<String>,
    }

    const CUES: &[&str] = &[
        "weather", "forecast", "temperature", "how hot", "how cold", "going to rain",
        "gonna rain", "will it rain", "going to snow", "will it snow", "chance of rain",
        "chance of snow", "humidity", "umbrella",
    ];

    /// Detect a weather question and pull out a trailing `in <location>` /
    /// `for <location>` clause when present.
    pub fn detect(text: &str) -> Option<WeatherQuery> {
        let lowered = text.to_lowercase();
        if !CUES.iter().any(|c| lowered.contains(c)) {
            return None;
        }
        Some(WeatherQuery {
            location: extract_location(text),
        })
    }

    /// Pull a location out of free text (`in Pittsburgh`, `for Austin TX`).
    /// The location must be capitalized; the preposition may not be.
    pub fn extract_location(text: &str) -> Option<String> {
        let re = Regex::new(
            r"\b(?i:in|for|at)\s+(?P<loc>[A-Z][A-Za-z.\-]*(?:[ ,]+[A-Z][A-Za-z.\-]*){0,3})",
        )
        .expect("static regex");
        let caps = re.captures(text)?;
        let loc = caps["loc"].trim().trim_end_matches(['?', '.', '!']).to_string();
        if loc.is_empty() {
            None
        } else {
            Some(loc)
        }
    }

}

pub mod crypto {
    const COINS: &[&str] = &[
        "bitcoin", "btc", "ethereum", "eth", "solana", "sol", "dogecoin", "doge",
        "cardano", "xrp", "litecoin",
    ];

    const PORTFOLIO_CUES: &[&str] = &["crypto", "portfolio", "holdings", "coinbase"];

    /// Loose classifier: the turn is about crypto prices or the portfolio.
    pub fn detect(lowered_text: &str) -> bool {
        let coin_hit = COINS.iter().any(|c| {
            lowered_text
                .split(|ch: char| !ch.is_ascii_alphanumeric())
                .any(|word| word == *c)
        });
        let cue_hit = PORTFOLIO_CUES.iter().any(|c| lowered_text.contains(c));
        (coin_hit && (lowered_text.contains("price") || lowered_text.contains("worth") || cue_hit))
            || (cue_hit && lowered_text.contains("report"))
            || lowered_text.contains("crypto report")
    }

    /// Strict form that bypasses the duplicate filter: the user explicitly
    /// asked for the report to run.
    pub fn is_explicit_report_request(text: &str) -> bool {
        let lowered = text.to_lowercase();
        ["crypto report", "portfolio report", "run my crypto", "coinbase report"]
            .iter()
            .any(|c| lowered.contains(c))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn coin_plus_price_detects() {
            assert!(detect("what's the btc price right now"));
            assert!(detect("how much is my ethereum worth"));
        }

        #[test]
        fn report_phrases_detect() {
            assert!(detect("give me the crypto report"));
            assert!(detect("portfolio report please"));
        }

        #[test]
        fn casual_mention_does_not_detect() {
            assert!(!detect("my friend works at a bitcoin startup"));
            assert!(!detect("what's for lunch"));
        }

        #[test]
        fn explicit_report_is_strict() {
            assert!(is_explicit_report_request("run my crypto report again"));
            assert!(!is_explicit_report_request("what's the btc price"));
        }

        #[test]
        fn coin_match_is_word_bounded() {
            // "seth" must not match "eth".
            assert!(!detect("ask seth about the price"));
        }
    }
}
