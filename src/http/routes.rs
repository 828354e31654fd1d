//! Route table mapping API route prefixes to the policies that guard them.

use serde::{Deserialize, Serialize};

use crate::ratelimit::{Admission, LimiterRegistry, PolicyKind, RequestInfo};

/// One route group and the policies attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Path prefix, matched on segment boundaries
    pub prefix: String,
    /// Restrict the route to one HTTP method
    #[serde(default)]
    pub method: Option<String>,
    /// Policies applied, in order
    pub policies: Vec<PolicyKind>,
    /// When matched, only exclusive routes contribute policies
    #[serde(default)]
    pub exclusive: bool,
}

impl RouteConfig {
    pub fn new(prefix: &str, method: Option<&str>, policies: &[PolicyKind]) -> Self {
        Self {
            prefix: prefix.to_string(),
            method: method.map(|m| m.to_ascii_uppercase()),
            policies: policies.to_vec(),
            exclusive: false,
        }
    }

    /// Mark this route as the only scope for requests it matches.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    fn matches(&self, method: &str, path: &str) -> bool {
        if let Some(ref expected) = self.method {
            if !expected.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        matches_prefix(&self.prefix, path)
    }
}

fn matches_prefix(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// Ordered list of route groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<RouteConfig>,
}

impl RouteTable {
    pub fn new(routes: Vec<RouteConfig>) -> Self {
        Self { routes }
    }

    /// Use the configured table, or the built-in one when none is configured.
    pub fn from_config(routes: Option<&[RouteConfig]>) -> Self {
        match routes {
            Some(routes) => Self::new(routes.to_vec()),
            None => Self::default(),
        }
    }

    pub fn routes(&self) -> &[RouteConfig] {
        &self.routes
    }

    /// Policies guarding `method path`, in table order, without duplicates.
    ///
    /// If any matching route is exclusive, broader non-exclusive routes are
    /// ignored for that request.
    pub fn policies_for(&self, method: &str, path: &str) -> Vec<PolicyKind> {
        let matched: Vec<&RouteConfig> =
            self.routes.iter().filter(|r| r.matches(method, path)).collect();
        let exclusive = matched.iter().any(|r| r.exclusive);

        let mut kinds = Vec::new();
        for route in matched.into_iter().filter(|r| r.exclusive || !exclusive) {
            for kind in &route.policies {
                if !kinds.contains(kind) {
                    kinds.push(*kind);
                }
            }
        }
        kinds
    }

    /// Evaluate every policy guarding `request`, stopping at the first rejection.
    ///
    /// An admission carries the headers of the last evaluated policy that
    /// exposes them. A request no policy guards is reported as bypassed.
    pub fn evaluate(&self, registry: &LimiterRegistry, request: &RequestInfo) -> Admission {
        let mut outcome = Admission::Bypassed;

        for kind in self.policies_for(&request.method, &request.path) {
            let admission = registry.get(kind).evaluate(request);
            match admission {
                Admission::Rejected(_) => return admission,
                Admission::Bypassed => {}
                Admission::Admitted { .. } => {
                    if admission.quota().is_some() || outcome.quota().is_none() {
                        outcome = admission;
                    }
                }
            }
        }

        outcome
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        use PolicyKind::*;

        Self::new(vec![
            RouteConfig::new("/api/", None, &[General]),
            RouteConfig::new("/api/auth/login", Some("POST"), &[Authentication]).exclusive(),
            RouteConfig::new("/api/auth/register", Some("POST"), &[Authentication]).exclusive(),
            RouteConfig::new("/api/auth/google", Some("POST"), &[Authentication]).exclusive(),
            RouteConfig::new("/api/auth/forgot-password", Some("POST"), &[PasswordReset])
                .exclusive(),
            RouteConfig::new("/api/auth/reset-password", Some("POST"), &[PasswordReset])
                .exclusive(),
            RouteConfig::new("/api/pools", Some("POST"), &[ResourceCreation]).exclusive(),
        ])
    }
}
