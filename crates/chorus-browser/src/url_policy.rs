//! Target URL validation, applied before any session is created.

use chorus_core::InvalidUrlReason;
use url::Url;

const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Parse and check a session target URL.
///
/// `blocked` holds host patterns: `example.com` matches only that host,
/// `*.example.com` matches the domain and every subdomain of it.
pub fn validate_target_url(raw: &str, blocked: &[String]) -> Result<Url, InvalidUrlReason> {
    let url = Url::parse(raw.trim()).map_err(|e| InvalidUrlReason::Malformed(e.to_string()))?;

    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(InvalidUrlReason::DisallowedProtocol(url.scheme().to_string()));
    }

    let host = url
        .host_str()
        .ok_or_else(|| InvalidUrlReason::Malformed("missing host".into()))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_lowercase();

    if blocked.iter().any(|pattern| host_matches(&host, pattern)) {
        return Err(InvalidUrlReason::BlacklistedHost(host));
    }
    Ok(url)
}

fn host_matches(host: &str, pattern: &str) -> bool {
    let pattern = pattern.trim().to_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => host == suffix || host.ends_with(&format!(".{}", suffix)),
        None => host == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::DEFAULT_BLOCKED_HOSTS;

    fn blocked() -> Vec<String> {
        DEFAULT_BLOCKED_HOSTS.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn test_accepts_https() {
        let url = validate_target_url("https://chat.example.com/c/new", &blocked()).unwrap();
        assert_eq!(url.host_str(), Some("chat.example.com"));
    }

    #[test]
    fn test_rejects_protocols() {
        for raw in ["file:///etc/passwd", "javascript:alert(1)", "ftp://example.com"] {
            assert!(matches!(
                validate_target_url(raw, &blocked()),
                Err(InvalidUrlReason::DisallowedProtocol(_))
            ));
        }
    }

    #[test]
    fn test_rejects_blocked_hosts() {
        assert_eq!(
            validate_target_url("http://localhost:8080", &blocked()),
            Err(InvalidUrlReason::BlacklistedHost("localhost".into()))
        );
        assert!(matches!(
            validate_target_url("https://db.corp.internal", &blocked()),
            Err(InvalidUrlReason::BlacklistedHost(_))
        ));
        // Suffix patterns do not match lookalike hosts
        assert!(validate_target_url("https://notinternal.com", &blocked()).is_ok());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            validate_target_url("not a url", &blocked()),
            Err(InvalidUrlReason::Malformed(_))
        ));
        assert!(matches!(
            validate_target_url("", &blocked()),
            Err(InvalidUrlReason::Malformed(_))
        ));
    }
}
