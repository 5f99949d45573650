use thiserror::Error;

/// Classified failure categories driving the retry policy.
///
/// Classification is substring-based and case-tolerant so that error text
/// coming back from Chrome, the network stack, or the site itself all land
/// in the right bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    NotFound,
    RateLimited,
    AuthRequired,
    /// Error page on an item that exists but needs valid credentials.
    NotAccessible,
    Network,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Classify a raw error message. Patterns are checked in a fixed order;
    /// the first match wins.
    pub fn classify(message: &str) -> ErrorKind {
        let msg = message.to_lowercase();

        if msg.contains("timeout") {
            ErrorKind::Timeout
        } else if msg.contains("404") || msg.contains("not found") {
            ErrorKind::NotFound
        } else if msg.contains("429") || msg.contains("rate limit") || msg.contains("cloudflare") {
            ErrorKind::RateLimited
        } else if msg.contains("auth") || msg.contains("authentication") || msg.contains("nsfw") {
            ErrorKind::AuthRequired
        } else if msg.contains("network") || msg.contains("err_") || msg.contains("disconnected") {
            ErrorKind::Network
        } else {
            ErrorKind::Unknown
        }
    }

    /// Transient kinds are retried up to the item's retry cap. Policy
    /// failures (auth, not-found, cancelled) surface immediately.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::Network | ErrorKind::Unknown
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::AuthRequired => "auth_required",
            ErrorKind::NotAccessible => "item_not_accessible",
            ErrorKind::Network => "network",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    #[error("navigation timeout: {0}")]
    Timeout(String),

    #[error("item not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication required: {0}")]
    AuthRequired(String),

    #[error("item not accessible without a valid session: {0}")]
    NotAccessible(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("browser instance unavailable")]
    BrowserUnavailable,

    #[error("browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

impl ScrapeError {
    /// The classified kind. Typed variants map directly; everything else is
    /// classified from its message text.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScrapeError::Timeout(_) => ErrorKind::Timeout,
            ScrapeError::NotFound(_) => ErrorKind::NotFound,
            ScrapeError::RateLimited(_) => ErrorKind::RateLimited,
            ScrapeError::AuthRequired(_) => ErrorKind::AuthRequired,
            ScrapeError::NotAccessible(_) => ErrorKind::NotAccessible,
            ScrapeError::Network(_) => ErrorKind::Network,
            ScrapeError::Cancelled(_) => ErrorKind::Cancelled,
            ScrapeError::BrowserUnavailable => ErrorKind::Network,
            ScrapeError::BrowserLaunchFailed(m)
            | ScrapeError::Navigation(m)
            | ScrapeError::Extraction(m)
            | ScrapeError::Session(m)
            | ScrapeError::Configuration(m)
            | ScrapeError::Other(m) => ErrorKind::classify(m),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_known_patterns() {
        assert_eq!(ErrorKind::classify("Navigation Timeout after 30s"), ErrorKind::Timeout);
        assert_eq!(ErrorKind::classify("server returned 404"), ErrorKind::NotFound);
        assert_eq!(ErrorKind::classify("item Not Found"), ErrorKind::NotFound);
        assert_eq!(ErrorKind::classify("HTTP 429 too many requests"), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::classify("blocked by Cloudflare"), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::classify("AUTH required"), ErrorKind::AuthRequired);
        assert_eq!(ErrorKind::classify("nsfw item hidden"), ErrorKind::AuthRequired);
        assert_eq!(ErrorKind::classify("net::ERR_CONNECTION_RESET"), ErrorKind::Network);
        assert_eq!(ErrorKind::classify("browser disconnected"), ErrorKind::Network);
        assert_eq!(ErrorKind::classify("something odd"), ErrorKind::Unknown);
    }

    #[test]
    fn classify_order_puts_timeout_first() {
        // A network timeout is still a timeout.
        assert_eq!(ErrorKind::classify("network timeout"), ErrorKind::Timeout);
    }

    #[test]
    fn retry_policy_per_kind() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::Unknown.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::AuthRequired.is_retryable());
        assert!(!ErrorKind::NotAccessible.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn typed_variants_map_to_kinds() {
        assert_eq!(ScrapeError::Timeout("t".into()).kind(), ErrorKind::Timeout);
        assert_eq!(ScrapeError::NotAccessible("x".into()).kind(), ErrorKind::NotAccessible);
        assert_eq!(ScrapeError::Cancelled("c".into()).kind(), ErrorKind::Cancelled);
        assert_eq!(ScrapeError::Other("HTTP 429".into()).kind(), ErrorKind::RateLimited);
    }
}
