//! Human-friendly duration strings: `24h`, `7d`, `1w2d`, `1h 30m`, `500ms`.
//!
//! Every TTL, extension period and job interval in the configuration and on
//! the `/extend` endpoint goes through [`parse_duration`]. Extension link
//! labels are rendered with `humantime::format_duration`, whose output this
//! parser accepts back.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DurationError {
    #[error("duration is empty")]
    Empty,

    #[error("invalid duration '{input}': {source}")]
    Invalid {
        input: String,
        #[source]
        source: humantime::DurationError,
    },
}

/// Parse a duration such as `"36h"`, `"1w2d"` or `"3days 12h"`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }
    humantime::parse_duration(s).map_err(|source| DurationError::Invalid {
        input: s.to_string(),
        source,
    })
}
