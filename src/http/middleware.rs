//! axum middleware enforcing a single limiter policy on a route group.
//!
//! ```ignore
//! let guard = PolicyGuard::new(registry.get(PolicyKind::Authentication).clone());
//! let auth = Router::new()
//!     .route("/login", post(login))
//!     .route_layer(axum::middleware::from_fn_with_state(guard, enforce));
//! ```

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{Extensions, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use super::response::decorate;
use crate::ratelimit::{Admission, ClientKey, LimiterPolicy, RequestInfo};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Middleware state: the policy to enforce and how to derive client keys.
#[derive(Debug, Clone)]
pub struct PolicyGuard {
    policy: Arc<LimiterPolicy>,
    trust_forwarded_for: bool,
}

impl PolicyGuard {
    pub fn new(policy: Arc<LimiterPolicy>) -> Self {
        Self {
            policy,
            trust_forwarded_for: false,
        }
    }

    /// Key clients by the first `X-Forwarded-For` hop when present.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Get the policy this guard enforces.
    pub fn policy(&self) -> &Arc<LimiterPolicy> {
        &self.policy
    }
}

/// Derive the counting key for a request.
///
/// Falls back from the forwarded header (when trusted) to the peer address,
/// and to [`ClientKey::unknown`] when neither is available.
pub fn client_key(
    headers: &HeaderMap,
    extensions: &Extensions,
    trust_forwarded_for: bool,
) -> ClientKey {
    if trust_forwarded_for {
        if let Some(value) = headers.get(X_FORWARDED_FOR) {
            match value.to_str().ok().and_then(ClientKey::from_forwarded_for) {
                Some(key) => return key,
                None => warn!(header = ?value, "Ignoring malformed X-Forwarded-For header"),
            }
        }
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| ClientKey::from(*addr))
        .unwrap_or_else(ClientKey::unknown)
}

/// Admit or reject the request before it reaches the handler.
pub async fn enforce(State(guard): State<PolicyGuard>, request: Request, next: Next) -> Response {
    let client = client_key(request.headers(), request.extensions(), guard.trust_forwarded_for);
    let info = RequestInfo::new(request.method().as_str(), request.uri().path(), client);

    match guard.policy().evaluate(&info) {
        Admission::Rejected(rejection) => rejection.into_response(),
        admission => decorate(next.run(request).await, &admission),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitingConfig;
    use crate::ratelimit::{LimiterRegistry, ManualClock, PolicyKind};
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::routing::{get, post};
    use axum::Router;
    use tower::ServiceExt;

    fn request(method: &str, uri: &str, peer: &str) -> HttpRequest<Body> {
        let mut request = HttpRequest::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    fn app(registry: &LimiterRegistry) -> Router {
        let auth_guard = PolicyGuard::new(registry.get(PolicyKind::Authentication).clone());
        let general_guard = PolicyGuard::new(registry.get(PolicyKind::General).clone());

        let auth = Router::new()
            .route("/login", post(|| async { "welcome" }))
            .route_layer(axum::middleware::from_fn_with_state(auth_guard, enforce));

        Router::new()
            .route("/api/health", get(|| async { "ok" }))
            .route("/api/pools", get(|| async { "pools" }))
            .nest("/api/auth", auth)
            .layer(axum::middleware::from_fn_with_state(general_guard, enforce))
    }

    #[test]
    fn test_client_key_fallbacks() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, "203.0.113.5, 10.0.0.1".parse().unwrap());
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo::<SocketAddr>("10.0.0.1:4000".parse().unwrap()));

        assert_eq!(client_key(&headers, &extensions, true).as_str(), "203.0.113.5");
        assert_eq!(client_key(&headers, &extensions, false).as_str(), "10.0.0.1");

        headers.insert(X_FORWARDED_FOR, "garbage".parse().unwrap());
        assert_eq!(client_key(&headers, &extensions, true).as_str(), "10.0.0.1");

        assert_eq!(
            client_key(&HeaderMap::new(), &Extensions::new(), true).as_str(),
            ClientKey::UNKNOWN
        );
    }

    #[tokio::test]
    async fn test_admitted_requests_carry_headers() {
        let registry = LimiterRegistry::new(
            &RateLimitingConfig::default(),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        let guard = PolicyGuard::new(registry.get(PolicyKind::General).clone());
        assert_eq!(guard.policy().name(), "general");
        let app = app(&registry);

        let response = app
            .oneshot(request("GET", "/api/pools", "1.2.3.4:1000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["ratelimit-limit"], "100");
        assert_eq!(response.headers()["ratelimit-remaining"], "99");
        assert_eq!(response.headers()["ratelimit-reset"], "60");
    }

    #[tokio::test]
    async fn test_login_rejected_after_ten_attempts() {
        let registry = LimiterRegistry::new(
            &RateLimitingConfig::default(),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        let app = app(&registry);

        for _ in 0..10 {
            let response = app
                .clone()
                .oneshot(request("POST", "/api/auth/login", "1.2.3.4:1000"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(request("POST", "/api/auth/login", "1.2.3.4:2000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "900");
        assert_eq!(response.headers()["ratelimit-limit"], "10");
        assert_eq!(response.headers()["ratelimit-remaining"], "0");

        // A different origin is unaffected.
        let response = app
            .oneshot(request("POST", "/api/auth/login", "5.6.7.8:1000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_check_bypasses_general_limiter() {
        let registry = LimiterRegistry::new(
            &RateLimitingConfig::default(),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        let app = app(&registry);

        for _ in 0..150 {
            let response = app
                .clone()
                .oneshot(request("GET", "/api/health", "1.2.3.4:1000"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get("ratelimit-limit").is_none());
        }
        assert_eq!(registry.tracked_keys(), 0);
    }
}
