//! HTTP boundary: rate limiting middleware, routes and server.

mod handlers;
mod middleware;
mod server;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::store::CountingStore;

pub use handlers::{health_handler, welcome_handler};
pub use middleware::{
    enforce_rate_limit, extract_token, resolve_client_ip, RateLimitState,
    MISSING_IDENTITY_MESSAGE, RATE_LIMITED_MESSAGE,
};
pub use server::HttpServer;

/// Build the service router.
///
/// `/` sits behind the rate limiter; `/health` does not.
pub fn router<S>(state: RateLimitState<S>) -> Router
where
    S: CountingStore + 'static,
{
    Router::new()
        .route("/", get(welcome_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            enforce_rate_limit::<S>,
        ))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaGateConfig;
    use crate::ratelimit::{LimiterConfig, RateLimiter};
    use crate::store::InMemoryStore;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{HeaderName, HeaderValue, Request, StatusCode};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(token_limit: u64, ip_limit: u64) -> RateLimitState<InMemoryStore> {
        let config = LimiterConfig::new(token_limit, ip_limit, Duration::from_secs(60));
        let limiter = Arc::new(RateLimiter::new(config, Arc::new(InMemoryStore::new())));
        RateLimitState::new(limiter, HeaderName::from_static("api_key"))
    }

    fn request(path: &str) -> axum::http::request::Builder {
        Request::builder().uri(path)
    }

    fn with_peer(mut req: Request<Body>, peer: &str) -> Request<Body> {
        let addr: SocketAddr = peer.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_token_requests_limited() {
        let app = router(test_state(2, 100));

        for _ in 0..2 {
            let req = request("/").header("API_KEY", "tok").body(Body::empty()).unwrap();
            let response = app.clone().oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_text(response).await, "welcome");
        }

        let req = request("/").header("API_KEY", "tok").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_text(response).await, RATE_LIMITED_MESSAGE);
    }

    #[tokio::test]
    async fn test_missing_identity_rejected() {
        let state = test_state(10, 10);
        let app = router(state.clone());

        let req = request("/").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, MISSING_IDENTITY_MESSAGE);
    }

    #[tokio::test]
    async fn test_peer_address_limited_by_ip() {
        let state = test_state(100, 1);
        let app = router(state.clone());

        let req = with_peer(request("/").body(Body::empty()).unwrap(), "198.51.100.4:5555");
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

        let req = with_peer(request("/").body(Body::empty()).unwrap(), "198.51.100.4:6666");
        assert_eq!(
            app.clone().oneshot(req).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );

        assert_eq!(state.limiter().store().current_count("198.51.100.4"), Some(2));
    }

    #[tokio::test]
    async fn test_token_takes_precedence_over_peer() {
        let state = test_state(100, 0);
        let app = router(state.clone());

        let req = with_peer(
            request("/").header("API_KEY", "tok").body(Body::empty()).unwrap(),
            "198.51.100.4:5555",
        );
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::OK);
        assert_eq!(state.limiter().store().current_count("198.51.100.4"), None);
    }

    #[tokio::test]
    async fn test_forwarded_for_respected_when_trusted() {
        let state = test_state(100, 100).trust_forwarded_for(true);
        let app = router(state.clone());

        let req = with_peer(
            request("/")
                .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
                .body(Body::empty())
                .unwrap(),
            "10.0.0.1:4000",
        );
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::OK);

        let store = state.limiter().store();
        assert_eq!(store.current_count("203.0.113.9"), Some(1));
        assert_eq!(store.current_count("10.0.0.1"), None);
    }

    #[tokio::test]
    async fn test_spoofed_forwarded_for_ignored_by_default() {
        let mut config = QuotaGateConfig::default();
        config.rate_limiting.rate_limit_ip = 1;
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limiting.limiter_config(),
            Arc::new(InMemoryStore::new()),
        ));
        let state = RateLimitState::new(limiter, config.token_header_name().unwrap())
            .trust_forwarded_for(config.server.trust_forwarded_for);
        let app = router(state.clone());

        let mut allowed = 0;
        for i in 0..20 {
            let req = with_peer(
                request("/")
                    .header("x-forwarded-for", format!("10.9.9.{}", i))
                    .body(Body::empty())
                    .unwrap(),
                "198.51.100.4:5555",
            );
            if app.clone().oneshot(req).await.unwrap().status() == StatusCode::OK {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 1, "one peer must share a single ip bucket");
        assert_eq!(state.limiter().store().current_count("10.9.9.0"), None);
    }

    #[tokio::test]
    async fn test_non_ascii_token_limited_as_token() {
        let state = test_state(10, 0);
        let app = router(state.clone());

        let req = with_peer(
            request("/")
                .header("API_KEY", HeaderValue::from_bytes(b"tok\xc3\xa9").unwrap())
                .body(Body::empty())
                .unwrap(),
            "198.51.100.4:5555",
        );
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::OK);

        let store = state.limiter().store();
        assert_eq!(store.current_count("tok\u{e9}"), Some(1));
        assert_eq!(store.current_count("198.51.100.4"), None);
    }

    #[tokio::test]
    async fn test_health_not_limited() {
        let app = router(test_state(0, 0));

        for _ in 0..3 {
            let req = with_peer(request("/health").body(Body::empty()).unwrap(), "192.0.2.1:1");
            let response = app.clone().oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(body_text(response).await.contains("healthy"));
        }

        let req = with_peer(request("/").body(Body::empty()).unwrap(), "192.0.2.1:1");
        assert_eq!(
            app.oneshot(req).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
