//! Rate limiting decision logic.

mod identity;
mod limiter;

pub use identity::{Identity, LimitClass};
pub use limiter::{Decision, LimiterConfig, RateLimiter};
