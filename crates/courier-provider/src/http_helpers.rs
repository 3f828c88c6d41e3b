//! Small helpers shared by provider HTTP error paths.

/// Truncates upstream error bodies so logs and outcome records stay bounded.
pub fn truncate_for_error(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let kept: String = trimmed.chars().take(max_chars).collect();
    format!("{kept}…")
}

/// True for transport-level failures worth treating as transient.
pub fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

#[cfg(test)]
mod tests {
    use super::truncate_for_error;

    #[test]
    fn truncation_keeps_short_bodies_whole() {
        assert_eq!(truncate_for_error("  short body  ", 32), "short body");
    }

    #[test]
    fn truncation_bounds_long_bodies() {
        let long = "x".repeat(100);
        let truncated = truncate_for_error(&long, 10);
        assert_eq!(truncated.chars().count(), 11);
        assert!(truncated.ends_with('…'));
    }
}
