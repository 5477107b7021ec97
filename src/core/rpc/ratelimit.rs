// src/core/rpc/ratelimit.rs

//! Pluggable request rate limiting for the dispatcher.

use crate::core::rpc::message::MessageType;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

/// Decides whether a request may proceed. The dispatcher rejects refused
/// requests with `COMMUNICATIONS_BACKOFF` before any lock is taken.
pub trait RateLimiter: Send + Sync {
    fn allow(&self, uid: u32, msg_type: MessageType) -> bool;
}

/// The default limiter: everything is allowed.
#[derive(Debug, Default)]
pub struct NoopLimiter;

impl RateLimiter for NoopLimiter {
    fn allow(&self, _uid: u32, _msg_type: MessageType) -> bool {
        true
    }
}

/// Token-bucket limiter keyed by uid. One bucket per caller, refilled at
/// `rate` tokens per second up to `burst`.
pub struct TokenBucketLimiter {
    rate: f64,
    burst: f64,
    buckets: Mutex<HashMap<u32, (f64, Instant)>>,
}

impl TokenBucketLimiter {
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            rate,
            burst,
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn allow(&self, uid: u32, _msg_type: MessageType) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let (tokens, last) = buckets.entry(uid).or_insert((self.burst, now));
        let refill = now.duration_since(*last).as_secs_f64() * self.rate;
        *tokens = (*tokens + refill).min(self.burst);
        *last = now;
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
