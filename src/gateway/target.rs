//! Analysis target validation.

use url::Url;

/// Normalize a user-supplied target into an absolute http(s) URL.
///
/// A target without a scheme is taken as `https://`.
pub fn normalize_target(raw: &str, max_len: usize) -> Result<Url, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("url is required".to_string());
    }
    if trimmed.len() > max_len {
        return Err(format!("url exceeds {} characters", max_len));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = Url::parse(&candidate).map_err(|e| format!("invalid url '{}': {}", trimmed, e))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme '{}'", other)),
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(format!("url '{}' has no host", trimmed)),
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adds_https_scheme() {
        let url = normalize_target("Example.com/about", 2048).unwrap();
        assert_eq!(url.as_str(), "https://example.com/about");
    }

    #[test]
    fn test_keeps_http() {
        let url = normalize_target("  http://example.com ", 2048).unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.host_str(), Some("example.com"));
    }

    #[test]
    fn test_rejects_bad_targets() {
        assert!(normalize_target("", 2048).is_err());
        assert!(normalize_target("   ", 2048).is_err());
        assert!(normalize_target("ftp://example.com", 2048).is_err());
        assert!(normalize_target("https://", 2048).is_err());
        assert!(normalize_target("not a url", 2048).is_err());
        assert!(normalize_target(&format!("example.com/{}", "a".repeat(50)), 20).is_err());
    }
}
