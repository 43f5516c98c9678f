//! Environment-driven server configuration.
//!
//! The CLI carries the listener surface; the environment carries the rest:
//! `CMDCHAT_TOKENS` (comma-separated accepted tokens, empty disables auth),
//! `CMDCHAT_LOG_LEVEL` (fallback for `--log-level`), and `CMDCHAT_METRICS`
//! (`0` disables the metrics loop regardless of the CLI).

use std::collections::HashSet;

/// Parse a comma-separated token list; whitespace-only entries are dropped.
pub fn parse_tokens(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Accepted auth tokens from `CMDCHAT_TOKENS`.
pub fn auth_tokens_from_env() -> HashSet<String> {
    std::env::var("CMDCHAT_TOKENS")
        .map(|raw| parse_tokens(&raw))
        .unwrap_or_default()
}

/// Whether a `CMDCHAT_METRICS` value turns the metrics loop off.
pub fn metrics_disabled(value: Option<&str>) -> bool {
    value.map(str::trim) == Some("0")
}

/// Whether the environment permits the metrics loop.
pub fn metrics_enabled_in_env() -> bool {
    !metrics_disabled(std::env::var("CMDCHAT_METRICS").ok().as_deref())
}

/// Effective log filter: CLI flag, then `CMDCHAT_LOG_LEVEL`, then `info`.
pub fn log_level(cli: Option<&str>) -> String {
    cli.map(str::to_string)
        .or_else(|| std::env::var("CMDCHAT_LOG_LEVEL").ok())
        .map(|level| level.to_lowercase())
        .unwrap_or_else(|| "info".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tokens() {
        assert!(parse_tokens("").is_empty());
        assert!(parse_tokens(" , ,").is_empty());

        let tokens = parse_tokens("t1, t2 ,t3");
        assert_eq!(tokens.len(), 3);
        assert!(tokens.contains("t1"));
        assert!(tokens.contains("t2"));
        assert!(tokens.contains("t3"));
    }

    #[test]
    fn test_metrics_disabled() {
        assert!(metrics_disabled(Some("0")));
        assert!(metrics_disabled(Some(" 0 ")));
        assert!(!metrics_disabled(Some("1")));
        assert!(!metrics_disabled(None));
    }
}
