//! Built-in admission policies and their configuration overrides.
//!
//! Each [`PolicyKind`] names a class of endpoints with its own window, quota and
//! rejection payload. Defaults can be overridden field by field from
//! configuration; the merged rule is validated before any limiter is built.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::policy::LimiterConfig;
use crate::error::Result;

/// The four limiter policies guarding the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Every API route
    General,
    /// Login and sign-up endpoints
    Authentication,
    /// Password reset requests
    PasswordReset,
    /// Pool creation and joining
    ResourceCreation,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 4] = [
        PolicyKind::General,
        PolicyKind::Authentication,
        PolicyKind::PasswordReset,
        PolicyKind::ResourceCreation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::General => "general",
            PolicyKind::Authentication => "authentication",
            PolicyKind::PasswordReset => "password_reset",
            PolicyKind::ResourceCreation => "resource_creation",
        }
    }

    /// Built-in rule for this policy.
    pub fn default_rule(&self) -> PolicyRule {
        match self {
            PolicyKind::General => PolicyRule {
                window_ms: 60_000,
                max_requests: 100,
                error_code: "RATE_LIMIT_EXCEEDED".to_string(),
                message: "Demasiadas solicitudes desde esta IP, intenta de nuevo más tarde."
                    .to_string(),
                expose_headers: true,
            },
            PolicyKind::Authentication => PolicyRule {
                window_ms: 15 * 60_000,
                max_requests: 10,
                error_code: "TOO_MANY_LOGIN_ATTEMPTS".to_string(),
                message:
                    "Demasiados intentos de inicio de sesión, intenta de nuevo en 15 minutos."
                        .to_string(),
                expose_headers: true,
            },
            PolicyKind::PasswordReset => PolicyRule {
                window_ms: 60 * 60_000,
                max_requests: 5,
                error_code: "TOO_MANY_RESET_REQUESTS".to_string(),
                message: "Demasiadas solicitudes de restablecimiento de contraseña, intenta de nuevo en una hora."
                    .to_string(),
                expose_headers: true,
            },
            PolicyKind::ResourceCreation => PolicyRule {
                window_ms: 60 * 60_000,
                max_requests: 20,
                error_code: "TOO_MANY_CREATIONS".to_string(),
                message: "Has alcanzado el límite de creación, intenta de nuevo en una hora."
                    .to_string(),
                expose_headers: true,
            },
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully specified rule for one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests admitted per window and client
    pub max_requests: u64,
    /// Machine-readable code in the rejection body
    pub error_code: String,
    /// Human-readable text in the rejection body
    pub message: String,
    /// Whether to emit `RateLimit-*` headers
    pub expose_headers: bool,
}

impl PolicyRule {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Apply a partial override on top of this rule.
    pub fn merge(mut self, patch: &PolicyOverride) -> Self {
        if let Some(window_ms) = patch.window_ms {
            self.window_ms = window_ms;
        }
        if let Some(max_requests) = patch.max_requests {
            self.max_requests = max_requests;
        }
        if let Some(ref code) = patch.error_code {
            self.error_code = code.clone();
        }
        if let Some(ref message) = patch.message {
            self.message = message.clone();
        }
        if let Some(expose) = patch.expose_headers {
            self.expose_headers = expose;
        }
        self
    }

    /// Reject rules that can never admit or never expire.
    pub fn validate(&self, kind: PolicyKind) -> Result<()> {
        LimiterConfig::from_rule(self).validate(kind.as_str())
    }
}

/// Partial rule read from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverride {
    #[serde(default)]
    pub window_ms: Option<u64>,
    #[serde(default)]
    pub max_requests: Option<u64>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub expose_headers: Option<bool>,
}

/// Resolve and validate the rule for `kind` against configured overrides.
pub fn resolve_rule(
    kind: PolicyKind,
    overrides: &HashMap<PolicyKind, PolicyOverride>,
) -> Result<PolicyRule> {
    let rule = match overrides.get(&kind) {
        Some(patch) => kind.default_rule().merge(patch),
        None => kind.default_rule(),
    };
    rule.validate(kind)?;
    Ok(rule)
}
