//! Request admission control per client key.

mod limiter;

pub use limiter::{
    Admission, KeyStats, Permit, RateLimit, RateLimitError, RateLimiter, RateLimiterConfig,
    RateLimiterStats, Ticket, LATENCY_SENSITIVE_QUEUE_TIMEOUT, MAX_LIMIT_DURATION_MS,
};
