//! Resource Keys
//!
//! A [`ResourceKey`] is the canonical identity of a remote resource. Two
//! callers asking for the same resource through differently-spelled URLs
//! (case in the host, an explicit default port, a fragment) must coalesce
//! onto one key, or single-flight coordination falls apart.

use std::fmt;
use url::Url;

/// Canonical identity of a remote resource.
///
/// Canonicalization rules:
/// - scheme and host are lowercased
/// - default ports (80 for http, 443 for https) are dropped
/// - the fragment is dropped (it never reaches the server)
/// - path and query are preserved byte-for-byte
///
/// Non-URL strings (opaque cache keys) are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Build a key from a URL or opaque string.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref();
        match Url::parse(raw) {
            Ok(mut url) if url.has_host() => {
                url.set_fragment(None);
                // Url already lowercases scheme and host and hides default
                // ports on serialization.
                ResourceKey(url.to_string())
            }
            _ => ResourceKey(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(raw: &str) -> Self {
        ResourceKey::new(raw)
    }
}

impl From<String> for ResourceKey {
    fn from(raw: String) -> Self {
        ResourceKey::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_and_scheme_are_lowercased() {
        let a = ResourceKey::new("HTTPS://Example.COM/Logo.png");
        let b = ResourceKey::new("https://example.com/Logo.png");
        assert_eq!(a, b);
        // Path case is significant.
        assert_ne!(a, ResourceKey::new("https://example.com/logo.png"));
    }

    #[test]
    fn test_default_port_is_dropped() {
        assert_eq!(
            ResourceKey::new("https://example.com:443/a.png"),
            ResourceKey::new("https://example.com/a.png"),
        );
        assert_eq!(
            ResourceKey::new("http://example.com:80/a.png"),
            ResourceKey::new("http://example.com/a.png"),
        );
        assert_ne!(
            ResourceKey::new("https://example.com:8443/a.png"),
            ResourceKey::new("https://example.com/a.png"),
        );
    }

    #[test]
    fn test_fragment_is_dropped() {
        assert_eq!(
            ResourceKey::new("https://example.com/a.png#section"),
            ResourceKey::new("https://example.com/a.png"),
        );
    }

    #[test]
    fn test_query_is_preserved() {
        assert_ne!(
            ResourceKey::new("https://example.com/a.png?size=2x"),
            ResourceKey::new("https://example.com/a.png"),
        );
    }

    #[test]
    fn test_opaque_keys_pass_through() {
        let key = ResourceKey::new("thumbnail:album:42");
        assert_eq!(key.as_str(), "thumbnail:album:42");
    }
}
