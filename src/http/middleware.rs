//! Rate limiting middleware.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::ratelimit::{Identity, RateLimiter};
use crate::store::CountingStore;

/// Body of the response to a request that carries neither a token nor an IP.
pub const MISSING_IDENTITY_MESSAGE: &str = "invalid request: missing token and ip";

/// Body of the response to a rate limited request.
pub const RATE_LIMITED_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Proxy headers consulted for the client IP, highest precedence first.
const FORWARDING_HEADERS: [&str; 3] = ["true-client-ip", "x-real-ip", "x-forwarded-for"];

/// State shared by the middleware across requests.
pub struct RateLimitState<S> {
    limiter: Arc<RateLimiter<S>>,
    token_header: HeaderName,
    trust_forwarded_for: bool,
}

impl<S> Clone for RateLimitState<S> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            token_header: self.token_header.clone(),
            trust_forwarded_for: self.trust_forwarded_for,
        }
    }
}

impl<S: CountingStore> RateLimitState<S> {
    /// Create middleware state reading the token from `token_header`.
    ///
    /// Proxy forwarding headers are ignored unless enabled with
    /// [`RateLimitState::trust_forwarded_for`].
    pub fn new(limiter: Arc<RateLimiter<S>>, token_header: HeaderName) -> Self {
        Self {
            limiter,
            token_header,
            trust_forwarded_for: false,
        }
    }

    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter<S>> {
        &self.limiter
    }
}

/// Extract the caller's token from `header`, ignoring blank values.
///
/// Bytes outside visible ASCII are kept (invalid UTF-8 is replaced lossily), so a
/// token header is never mistaken for an absent one.
pub fn extract_token(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    let value = headers.get(header)?;
    let token = String::from_utf8_lossy(value.as_bytes());
    let token = token.trim();

    (!token.is_empty()).then(|| token.to_string())
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
}

/// Resolve the client IP address.
///
/// When forwarding headers are trusted, the first valid address among
/// `True-Client-IP`, `X-Real-IP` and the leftmost `X-Forwarded-For` entry wins, in
/// that order. Otherwise, or when none parses, the peer address is used.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer_ip: Option<IpAddr>,
    trust_forwarded_for: bool,
) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = FORWARDING_HEADERS
            .iter()
            .find_map(|name| header_ip(headers, name));
        if forwarded.is_some() {
            return forwarded;
        }
    }
    peer_ip
}

/// Middleware that applies the rate limiter to every request it wraps.
///
/// Responds `400` when neither a token nor an IP can be determined, `429` when the
/// limiter denies the request, and otherwise runs the inner service.
pub async fn enforce_rate_limit<S>(
    State(state): State<RateLimitState<S>>,
    request: Request,
    next: Next,
) -> Response
where
    S: CountingStore + 'static,
{
    let token = extract_token(request.headers(), &state.token_header);
    let peer_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let ip = resolve_client_ip(request.headers(), peer_ip, state.trust_forwarded_for)
        .map(|ip| ip.to_string());

    let Some(identity) = Identity::select(token.as_deref(), ip.as_deref()) else {
        warn!("Rejecting request without token or ip");
        return (StatusCode::BAD_REQUEST, MISSING_IDENTITY_MESSAGE).into_response();
    };

    let decision = state.limiter.check(identity).await;
    if !decision.is_allowed() {
        debug!(identity = %identity, decision = ?decision, "Request rate limited");
        return (StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE).into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_token() {
        let header = HeaderName::from_static("api_key");
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers, &header), None);

        headers.insert(&header, HeaderValue::from_static("   "));
        assert_eq!(extract_token(&headers, &header), None);

        headers.insert(&header, HeaderValue::from_static(" abc123 "));
        assert_eq!(extract_token(&headers, &header), Some("abc123".to_string()));
    }

    #[test]
    fn test_extract_token_non_ascii() {
        let header = HeaderName::from_static("api_key");
        let mut headers = HeaderMap::new();

        headers.insert(&header, HeaderValue::from_bytes(b"tok\xc3\xa9").unwrap());
        assert_eq!(extract_token(&headers, &header), Some("tok\u{e9}".to_string()));

        headers.insert(&header, HeaderValue::from_bytes(b"tok\xff").unwrap());
        assert_eq!(extract_token(&headers, &header), Some("tok\u{fffd}".to_string()));
    }

    #[test]
    fn test_resolve_client_ip_xff() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1, 10.0.0.1"),
        );
        let peer: IpAddr = "127.0.0.1".parse().unwrap();

        assert_eq!(
            resolve_client_ip(&headers, Some(peer), true),
            Some("192.168.1.1".parse().unwrap())
        );
        assert_eq!(resolve_client_ip(&headers, Some(peer), false), Some(peer));
    }

    #[test]
    fn test_resolve_client_ip_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.168.1.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("192.168.1.2"));

        assert_eq!(
            resolve_client_ip(&headers, None, true),
            Some("192.168.1.2".parse().unwrap())
        );

        headers.insert("true-client-ip", HeaderValue::from_static("192.168.1.3"));
        assert_eq!(
            resolve_client_ip(&headers, None, true),
            Some("192.168.1.3".parse().unwrap())
        );
    }

    #[test]
    fn test_resolve_client_ip_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        headers.insert("x-real-ip", HeaderValue::from_static("2001:db8::1"));

        assert_eq!(
            resolve_client_ip(&headers, None, true),
            Some("2001:db8::1".parse().unwrap())
        );
    }

    #[test]
    fn test_resolve_client_ip_direct() {
        let headers = HeaderMap::new();
        let direct: IpAddr = "127.0.0.1".parse().unwrap();

        assert_eq!(resolve_client_ip(&headers, Some(direct), true), Some(direct));
        assert_eq!(resolve_client_ip(&headers, None, true), None);
    }
}
