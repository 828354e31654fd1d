//! Standalone admission service.
//!
//! A reverse proxy forwards each API request's method, URI and origin here
//! (forward-auth style) and lets it through on `200`, or relays the `429`
//! response to the client.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::middleware::client_key;
use super::response::decorate;
use super::routes::RouteTable;
use crate::ratelimit::{Admission, LimiterRegistry, RequestInfo};

pub const X_FORWARDED_URI: &str = "x-forwarded-uri";
pub const X_FORWARDED_METHOD: &str = "x-forwarded-method";

/// Shared state of the admission service.
#[derive(Debug, Clone)]
pub struct AdmissionService {
    registry: Arc<LimiterRegistry>,
    routes: Arc<RouteTable>,
    trust_forwarded_for: bool,
}

impl AdmissionService {
    pub fn new(registry: Arc<LimiterRegistry>, routes: RouteTable, trust_forwarded_for: bool) -> Self {
        Self {
            registry,
            routes: Arc::new(routes),
            trust_forwarded_for,
        }
    }

    /// HTTP routes of the service.
    pub fn router(self) -> Router {
        Router::new()
            .route("/v1/admission", any(admission))
            .route("/health", get(health))
            .route("/stats", get(stats))
            .with_state(self)
    }

    /// Reconstruct the proxied request from forwarding headers.
    fn forwarded_request(&self, request: &Request) -> RequestInfo {
        let headers = request.headers();
        let path = header_str(headers, X_FORWARDED_URI).unwrap_or("/");
        let method = header_str(headers, X_FORWARDED_METHOD).unwrap_or(request.method().as_str());
        let client = client_key(headers, request.extensions(), self.trust_forwarded_for);
        RequestInfo::new(method, path, client)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[instrument(skip_all)]
async fn admission(State(service): State<AdmissionService>, request: Request) -> Response {
    let info = service.forwarded_request(&request);
    let admission = service.routes.evaluate(&service.registry, &info);

    debug!(
        method = %info.method,
        path = %info.path,
        client = %info.client,
        admitted = admission.is_admitted(),
        "Admission decision made"
    );

    match admission {
        Admission::Rejected(rejection) => rejection.into_response(),
        admission => decorate(StatusCode::OK.into_response(), &admission),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Snapshot of one policy for the stats endpoint.
#[derive(Debug, Serialize)]
pub struct PolicyStats {
    pub policy: String,
    pub window_ms: u64,
    pub max_requests: u64,
    pub tracked_keys: usize,
}

async fn stats(State(service): State<AdmissionService>) -> Json<Vec<PolicyStats>> {
    let stats = service
        .registry
        .iter()
        .map(|(_, policy)| PolicyStats {
            policy: policy.name().to_string(),
            window_ms: policy.counter().window().as_millis() as u64,
            max_requests: policy.counter().max_requests(),
            tracked_keys: policy.counter().store().len(),
        })
        .collect();
    Json(stats)
}
