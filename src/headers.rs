//! Browser-like request headers with a per-session client token.
//!
//! Several Madara hosts key their anti-bot checks to a client token
//! that must stay stable for a browsing session. The token is
//! generated once per profile and reused for every request built from
//! it, never re-randomized per call.

use crate::config::SiteConfig;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Alphabet the session token is drawn from.
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Inclusive token length bounds.
const TOKEN_MIN_LEN: usize = 13;
const TOKEN_MAX_LEN: usize = 20;

/// Desktop Chrome user agent, matching what the target sites expect.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A fixed header set plus one randomized session token.
#[derive(Debug, Clone)]
pub struct HeaderProfile {
    token: String,
}

impl HeaderProfile {
    /// Creates a profile with a fresh random token.
    pub fn new() -> Self {
        Self {
            token: random_token(),
        }
    }

    /// Creates a profile with a caller-chosen token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The session token bound to this profile.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Builds the full header set for requests against `config`'s site.
    pub fn header_map(&self, config: &SiteConfig) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", HeaderValue::from_static(USER_AGENT));
        headers.insert(
            "Accept",
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            "Accept-Language",
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        if !config.base_url.is_empty()
            && let Ok(referer) = HeaderValue::from_str(config.site_root())
        {
            headers.insert("Referer", referer);
        }

        match (
            HeaderName::from_bytes(config.token_header.as_bytes()),
            HeaderValue::from_str(&self.token),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => log::warn!(
                "token header '{}' is not a valid header name, skipping",
                config.token_header
            ),
        }

        headers
    }
}

impl Default for HeaderProfile {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token() -> String {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(TOKEN_MIN_LEN..=TOKEN_MAX_LEN);
    (0..len)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_length_and_alphabet() {
        for _ in 0..50 {
            let profile = HeaderProfile::new();
            let token = profile.token();
            assert!((TOKEN_MIN_LEN..=TOKEN_MAX_LEN).contains(&token.len()));
            assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_token_stable_for_profile_lifetime() {
        let config = SiteConfig::for_site("https://example-scans.com");
        let profile = HeaderProfile::new();
        let first = profile.header_map(&config);
        let second = profile.header_map(&config);
        assert_eq!(first.get("X-Client-ID"), second.get("X-Client-ID"));
        assert_eq!(
            first.get("X-Client-ID").unwrap().to_str().unwrap(),
            profile.token()
        );
    }

    #[test]
    fn test_baseline_headers_present() {
        let config = SiteConfig::for_site("https://example-scans.com");
        let headers = HeaderProfile::with_token("fixedtoken1234").header_map(&config);
        assert!(headers.get("User-Agent").is_some());
        assert!(headers.get("Accept").is_some());
        assert_eq!(
            headers.get("Referer").unwrap().to_str().unwrap(),
            "https://example-scans.com"
        );
        assert_eq!(
            headers.get("X-Client-ID").unwrap().to_str().unwrap(),
            "fixedtoken1234"
        );
    }

    #[test]
    fn test_custom_token_header_name() {
        let mut config = SiteConfig::for_site("https://example-scans.com");
        config.token_header = "X-Session-Key".to_string();
        let headers = HeaderProfile::with_token("abc123def456ghi").header_map(&config);
        assert!(headers.get("X-Session-Key").is_some());
        assert!(headers.get("X-Client-ID").is_none());
    }
}
