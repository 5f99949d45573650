use std::time::Duration;
use url::Url;

/// Hostname the service is willing to scrape.
pub const TARGET_DOMAIN: &str = "myfigurecollection.net";

/// Hard cap on inputs to the edit-distance routine. Bounds the work at
/// cap^2 regardless of what the page hands us.
pub const SIMILARITY_INPUT_CAP: usize = 1_000;

/// Maximum length of any user-supplied string that reaches a log line.
pub const LOG_VALUE_CAP: usize = 512;

/// Build the canonical item URL for a fingerprint.
pub fn item_url(item_id: &str) -> String {
    format!("https://{TARGET_DOMAIN}/item/{item_id}")
}

/// Pull the item id out of a scrape target, which may be a bare numeric id
/// or a full item URL on the target domain.
pub fn parse_item_target(target: &str) -> Option<String> {
    let trimmed = target.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Some(trimmed.to_string());
    }

    if !is_valid_target(trimmed) {
        return None;
    }

    let normalized = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let parsed = Url::parse(&normalized).ok()?;
    let mut segments = parsed.path_segments()?;
    match segments.next() {
        Some("item") => {}
        _ => return None,
    }
    let id = segments.next()?;
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        Some(id.to_string())
    } else {
        None
    }
}

/// Whether a URL points at the target site.
///
/// Accepts the hostname exactly or any subdomain of it. A path component
/// that merely contains the domain, or a spoofed registrable suffix such as
/// `myfigurecollection.net.attacker.tld`, is rejected.
pub fn is_valid_target(target: &str) -> bool {
    let trimmed = target.trim();
    if trimmed.is_empty() {
        return false;
    }

    let normalized = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = match Url::parse(&normalized) {
        Ok(u) => u,
        Err(_) => return false,
    };

    match parsed.host_str() {
        Some(host) => {
            let host = host.to_lowercase();
            host == TARGET_DOMAIN || host.ends_with(&format!(".{TARGET_DOMAIN}"))
        }
        None => false,
    }
}

/// Strip anything that could forge or mangle a log line: newlines, carriage
/// returns, ANSI escape sequences, and other control bytes. The result is
/// truncated to [`LOG_VALUE_CAP`].
pub fn sanitize_log(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(LOG_VALUE_CAP));
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if out.len() >= LOG_VALUE_CAP {
            break;
        }
        match c {
            // ESC starts an ANSI sequence; drop through its terminator.
            '\x1b' => {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    for t in chars.by_ref() {
                        if t.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
            }
            '\n' | '\r' | '\t' => out.push(' '),
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }

    out
}

/// Normalized similarity between two strings in `[0, 1]`, based on edit
/// distance over lowercased input truncated to [`SIMILARITY_INPUT_CAP`].
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().take(SIMILARITY_INPUT_CAP).collect();
    let b: Vec<char> = b.to_lowercase().chars().take(SIMILARITY_INPUT_CAP).collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let longest = a.len().max(b.len());
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let distance = levenshtein(&a, &b);
    1.0 - (distance as f64 / longest as f64)
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_target() {
        assert!(is_valid_target("https://myfigurecollection.net/item/12345"));
        assert!(is_valid_target("myfigurecollection.net/item/12345"));
        assert!(is_valid_target("https://static.myfigurecollection.net/x"));
        assert!(!is_valid_target("https://myfigurecollection.net.attacker.tld/item/1"));
        assert!(!is_valid_target("https://attacker.tld/myfigurecollection.net/item/1"));
        assert!(!is_valid_target("https://evil.com/"));
        assert!(!is_valid_target(""));
    }

    #[test]
    fn test_parse_item_target() {
        assert_eq!(parse_item_target("12345"), Some("12345".to_string()));
        assert_eq!(
            parse_item_target("https://myfigurecollection.net/item/987654"),
            Some("987654".to_string())
        );
        assert_eq!(
            parse_item_target("myfigurecollection.net/item/42"),
            Some("42".to_string())
        );
        assert_eq!(parse_item_target("https://evil.com/item/42"), None);
        assert_eq!(parse_item_target("https://myfigurecollection.net/user/alice"), None);
        assert_eq!(parse_item_target("not a target"), None);
    }

    #[test]
    fn test_sanitize_log_strips_control_and_ansi() {
        assert_eq!(sanitize_log("plain text"), "plain text");
        assert_eq!(sanitize_log("line1\nline2\r\n"), "line1 line2  ");
        assert_eq!(sanitize_log("red\x1b[31mtext\x1b[0m"), "redtext");
        assert_eq!(sanitize_log("nul\x00byte"), "nul byte");
    }

    #[test]
    fn test_sanitize_log_truncates() {
        let long = "a".repeat(LOG_VALUE_CAP * 2);
        assert_eq!(sanitize_log(&long).len(), LOG_VALUE_CAP);
    }

    #[test]
    fn test_similarity() {
        assert!((similarity("just a moment", "just a moment") - 1.0).abs() < f64::EPSILON);
        assert!(similarity("Just a Moment...", "just a moment") > 0.8);
        assert!(similarity("completely different", "just a moment") < 0.5);
        assert!((similarity("", "") - 1.0).abs() < f64::EPSILON);
        assert_eq!(similarity("abc", ""), 0.0);
    }

    #[test]
    fn test_similarity_input_cap() {
        // Inputs way past the cap must still return quickly and be equal
        // after truncation.
        let a = "x".repeat(50_000);
        let b = "x".repeat(60_000);
        assert!((similarity(&a, &b) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5.0s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m 5s");
    }
}
