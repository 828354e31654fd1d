//! Rate limiting logic and state management.

mod clock;
mod counter;
mod key;
mod policy;
mod registry;
mod rules;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{CheckOutcome, FixedWindowCounter, WindowState};
pub use key::{ClientKey, RequestInfo};
pub use policy::{
    Admission, BypassPredicate, LimiterConfig, LimiterPolicy, Quota, RateLimitExceeded,
    RejectionPayload,
};
pub use registry::LimiterRegistry;
pub use rules::{resolve_rule, PolicyKind, PolicyOverride, PolicyRule};
pub use store::{CounterStore, MemoryStore};
