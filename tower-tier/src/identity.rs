use std::net::SocketAddr;

use http::Extensions;
use http::HeaderMap;
use http::header::COOKIE;
use http::header::HeaderName;
use tier_limit::IdentityConfig;
use tier_limit::RequestHints;
use tracing::warn;

/// Extracts identity hints from an inbound request.
pub trait IdentitySource: Send + Sync + 'static {
    fn hints(&self, headers: &HeaderMap, extensions: &Extensions) -> RequestHints;
}

impl<F> IdentitySource for F
where
    F: Fn(&HeaderMap, &Extensions) -> RequestHints + Send + Sync + 'static,
{
    fn hints(&self, headers: &HeaderMap, extensions: &Extensions) -> RequestHints {
        self(headers, extensions)
    }
}

/// Reads the caller id from a cookie or header and the client address from
/// forwarding headers or the peer address.
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    caller_cookie: String,
    caller_header: Option<HeaderName>,
    forwarded_headers: Vec<HeaderName>,
}

impl Default for HeaderIdentity {
    fn default() -> Self {
        Self::from_config(&IdentityConfig::default())
    }
}

impl HeaderIdentity {
    /// Header names that are not valid HTTP header names are skipped.
    pub fn from_config(config: &IdentityConfig) -> Self {
        Self {
            caller_cookie: config.caller_cookie.clone(),
            caller_header: header_name(&config.caller_header),
            forwarded_headers: config
                .forwarded_headers
                .iter()
                .filter_map(|name| header_name(name))
                .collect(),
        }
    }

    fn caller_token(&self, headers: &HeaderMap) -> Option<String> {
        let from_cookie = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.caller_cookie)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty());

        from_cookie
            .or_else(|| {
                let name = self.caller_header.as_ref()?;
                non_empty(headers.get(name)?.to_str().ok()?)
            })
            .map(str::to_string)
    }

    fn client_ip(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
        self.forwarded_headers
            .iter()
            .filter_map(|name| headers.get(name)?.to_str().ok())
            .find_map(|value| non_empty(value.split(',').next()?))
            .map(str::to_string)
            .or_else(|| peer_addr(extensions).map(|addr| addr.ip().to_string()))
    }
}

impl IdentitySource for HeaderIdentity {
    fn hints(&self, headers: &HeaderMap, extensions: &Extensions) -> RequestHints {
        RequestHints {
            caller_token: self.caller_token(headers),
            client_ip: self.client_ip(headers, extensions),
        }
    }
}

fn header_name(name: &str) -> Option<HeaderName> {
    match HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes()) {
        Ok(name) => Some(name),
        Err(error) => {
            warn!(%error, header = name, "ignoring invalid identity header name");
            None
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|value| !value.is_empty())
}

fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    #[cfg(feature = "axum")]
    let connect_info = extensions
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    #[cfg(not(feature = "axum"))]
    let connect_info = None;

    connect_info.or_else(|| extensions.get::<SocketAddr>().copied())
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn test_cookie_wins_over_header() {
        let identity = HeaderIdentity::default();
        let hints = identity.hints(
            &headers(&[
                ("cookie", "theme=dark; caller_id=abc123"),
                ("x-caller-id", "from-header"),
            ]),
            &Extensions::new(),
        );
        assert_eq!(hints.caller_token.as_deref(), Some("abc123"));

        let hints = identity.hints(
            &headers(&[("cookie", "theme=dark"), ("x-caller-id", "from-header")]),
            &Extensions::new(),
        );
        assert_eq!(hints.caller_token.as_deref(), Some("from-header"));
    }

    #[test]
    fn test_forwarded_first_hop() {
        let identity = HeaderIdentity::default();
        let hints = identity.hints(
            &headers(&[
                ("x-forwarded-for", " 203.0.113.9, 10.0.0.1"),
                ("x-real-ip", "10.0.0.2"),
            ]),
            &Extensions::new(),
        );
        assert_eq!(hints.client_ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(hints.caller_token, None);

        let hints = identity.hints(&headers(&[("x-real-ip", "10.0.0.2")]), &Extensions::new());
        assert_eq!(hints.client_ip.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_peer_address_fallback() {
        let identity = HeaderIdentity::default();
        let mut extensions = Extensions::new();
        extensions.insert(SocketAddr::from(([192, 0, 2, 7], 4711)));

        let hints = identity.hints(&HeaderMap::new(), &extensions);
        assert_eq!(hints.client_ip.as_deref(), Some("192.0.2.7"));

        let hints = identity.hints(&HeaderMap::new(), &Extensions::new());
        assert_eq!(hints, RequestHints::default());
    }

    #[test]
    fn test_configured_names() {
        let config = IdentityConfig {
            caller_cookie: "session".to_string(),
            caller_header: "X-Api-Key".to_string(),
            forwarded_headers: vec!["cf-connecting-ip".to_string(), "bad header".to_string()],
            ..IdentityConfig::default()
        };
        let identity = HeaderIdentity::from_config(&config);

        let hints = identity.hints(
            &headers(&[("x-api-key", "key-1"), ("cf-connecting-ip", "198.51.100.4")]),
            &Extensions::new(),
        );
        assert_eq!(hints.caller_token.as_deref(), Some("key-1"));
        assert_eq!(hints.client_ip.as_deref(), Some("198.51.100.4"));
    }
}
