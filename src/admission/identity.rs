//! Request identity extraction.

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Header carrying the proxy chain, client first.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
/// Identity shared by requests without an API key.
pub const ANONYMOUS_API_KEY: &str = "anon";
/// Client address used when neither the header nor the transport provides one.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Who a request is accounted against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub api_key: String,
    pub client_ip: String,
}

impl RequestIdentity {
    pub fn new(api_key: impl Into<String>, client_ip: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client_ip: client_ip.into(),
        }
    }

    /// Derive the identity from request headers and the transport peer.
    ///
    /// The client address is the first `x-forwarded-for` entry when present,
    /// otherwise the peer address. Blank values count as absent.
    pub fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let api_key = header_str(headers, API_KEY_HEADER)
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .unwrap_or(ANONYMOUS_API_KEY);

        let forwarded = header_str(headers, FORWARDED_FOR_HEADER)
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|addr| !addr.is_empty());

        let client_ip = match (forwarded, peer) {
            (Some(addr), _) => addr.to_string(),
            (None, Some(peer)) => peer.ip().to_string(),
            (None, None) => UNKNOWN_CLIENT.to_string(),
        };

        Self::new(api_key, client_ip)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("203.0.113.9:51234".parse().unwrap())
    }

    #[test]
    fn test_defaults_without_headers() {
        let identity = RequestIdentity::from_headers(&HeaderMap::new(), peer());
        assert_eq!(identity, RequestIdentity::new("anon", "203.0.113.9"));
    }

    #[test]
    fn test_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("team-a"));

        let identity = RequestIdentity::from_headers(&headers, peer());
        assert_eq!(identity.api_key, "team-a");
    }

    #[test]
    fn test_blank_api_key_is_anonymous() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("   "));

        let identity = RequestIdentity::from_headers(&headers, peer());
        assert_eq!(identity.api_key, ANONYMOUS_API_KEY);
    }

    #[test]
    fn test_first_forwarded_entry_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static(" 198.51.100.7 , 10.0.0.1, 10.0.0.2"),
        );

        let identity = RequestIdentity::from_headers(&headers, peer());
        assert_eq!(identity.client_ip, "198.51.100.7");
    }

    #[test]
    fn test_empty_forwarded_header_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static(" ,10.0.0.1"));

        let identity = RequestIdentity::from_headers(&headers, peer());
        assert_eq!(identity.client_ip, "203.0.113.9");
    }

    #[test]
    fn test_no_peer_and_no_header() {
        let identity = RequestIdentity::from_headers(&HeaderMap::new(), None);
        assert_eq!(identity.client_ip, UNKNOWN_CLIENT);
    }
}
