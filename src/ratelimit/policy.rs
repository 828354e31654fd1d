//! Limiter policies: a fixed-window counter bound to a named endpoint class.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use super::clock::Clock;
use super::counter::{CheckOutcome, FixedWindowCounter};
use super::key::RequestInfo;
use super::rules::PolicyRule;
use super::store::CounterStore;
use crate::error::{GateError, Result};

/// Predicate exempting a request from a policy.
pub type BypassPredicate = Arc<dyn Fn(&RequestInfo) -> bool + Send + Sync>;

/// Body returned to a rejected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionPayload {
    /// Machine-readable code
    pub error: String,
    /// Localized explanation
    pub message: String,
}

/// Immutable configuration of one limiter.
#[derive(Clone)]
pub struct LimiterConfig {
    pub window: Duration,
    pub max_requests: u64,
    pub rejection: RejectionPayload,
    pub expose_headers: bool,
    pub bypass: Option<BypassPredicate>,
}

impl LimiterConfig {
    pub fn from_rule(rule: &PolicyRule) -> Self {
        Self {
            window: rule.window(),
            max_requests: rule.max_requests,
            rejection: RejectionPayload {
                error: rule.error_code.clone(),
                message: rule.message.clone(),
            },
            expose_headers: rule.expose_headers,
            bypass: None,
        }
    }

    /// Exempt requests matching `predicate`.
    pub fn with_bypass<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RequestInfo) -> bool + Send + Sync + 'static,
    {
        self.bypass = Some(Arc::new(predicate));
        self
    }

    /// Reject configurations that can never admit or never expire.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.window.is_zero() {
            return Err(GateError::Config(format!(
                "limiter '{}' has a zero-length window",
                name
            )));
        }
        if self.max_requests == 0 {
            return Err(GateError::Config(format!(
                "limiter '{}' must admit at least one request per window",
                name
            )));
        }
        if self.rejection.error.trim().is_empty() {
            return Err(GateError::Config(format!(
                "limiter '{}' has an empty error code",
                name
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for LimiterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterConfig")
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .field("rejection", &self.rejection)
            .field("expose_headers", &self.expose_headers)
            .field("bypass", &self.bypass.is_some())
            .finish()
    }
}

/// Quota metadata reported in `RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
}

/// A request rejected by a limiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("rate limit exceeded for policy '{policy}', retry after {}ms", .retry_after.as_millis())]
pub struct RateLimitExceeded {
    /// Name of the rejecting policy
    pub policy: String,
    pub payload: RejectionPayload,
    pub limit: u64,
    pub retry_after: Duration,
    pub expose_headers: bool,
}

impl RateLimitExceeded {
    /// Header metadata, if the rejecting policy exposes it.
    pub fn quota(&self) -> Option<Quota> {
        self.expose_headers.then_some(Quota {
            limit: self.limit,
            remaining: 0,
            reset_after: self.retry_after,
        })
    }
}

/// Outcome of evaluating a policy against a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The bypass predicate matched; no counter was touched.
    Bypassed,
    Admitted { quota: Quota, expose_headers: bool },
    Rejected(RateLimitExceeded),
}

impl Admission {
    /// True unless a limiter rejected the request.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected(_))
    }

    /// Metadata to expose as headers, if any.
    pub fn quota(&self) -> Option<Quota> {
        match self {
            Admission::Bypassed => None,
            Admission::Admitted {
                quota,
                expose_headers,
            } => expose_headers.then_some(*quota),
            Admission::Rejected(rejection) => rejection.quota(),
        }
    }

    /// Convert into a `Result`, dropping admission metadata.
    pub fn into_result(self) -> std::result::Result<(), RateLimitExceeded> {
        match self {
            Admission::Rejected(rejection) => Err(rejection),
            _ => Ok(()),
        }
    }
}

/// A named limiter guarding one class of endpoints.
pub struct LimiterPolicy {
    name: String,
    config: LimiterConfig,
    counter: FixedWindowCounter,
    clock: Arc<dyn Clock>,
}

impl LimiterPolicy {
    /// Build a policy over its own counter store.
    ///
    /// Fails if the configuration cannot ever admit or expire.
    pub fn new(
        name: impl Into<String>,
        config: LimiterConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let name = name.into();
        config.validate(&name)?;
        let counter = FixedWindowCounter::new(config.window, config.max_requests, store);
        Ok(Self {
            name,
            config,
            counter,
            clock,
        })
    }

    /// Evaluate a request at the clock's current time.
    pub fn evaluate(&self, request: &RequestInfo) -> Admission {
        self.evaluate_at(request, self.clock.now_ms())
    }

    /// Evaluate a request at an explicit time.
    pub fn evaluate_at(&self, request: &RequestInfo, now_ms: u64) -> Admission {
        if let Some(ref bypass) = self.config.bypass {
            if bypass(request) {
                trace!(policy = %self.name, path = %request.path, "Bypassing limiter");
                return Admission::Bypassed;
            }
        }

        match self.counter.check(&request.client, now_ms) {
            CheckOutcome::Admitted {
                remaining,
                reset_after,
            } => Admission::Admitted {
                quota: Quota {
                    limit: self.config.max_requests,
                    remaining,
                    reset_after,
                },
                expose_headers: self.config.expose_headers,
            },
            CheckOutcome::Rejected { retry_after } => {
                debug!(
                    policy = %self.name,
                    client = %request.client,
                    path = %request.path,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limit exceeded"
                );
                Admission::Rejected(RateLimitExceeded {
                    policy: self.name.clone(),
                    payload: self.config.rejection.clone(),
                    limit: self.config.max_requests,
                    retry_after,
                    expose_headers: self.config.expose_headers,
                })
            }
        }
    }

    /// Name used in logs and rejections.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration this policy enforces.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Get the counter backing this policy.
    pub fn counter(&self) -> &FixedWindowCounter {
        &self.counter
    }

    /// Get the clock used for window arithmetic.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl fmt::Debug for LimiterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterPolicy")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("counter", &self.counter)
            .finish()
    }
}
