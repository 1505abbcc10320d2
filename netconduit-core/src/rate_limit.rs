//! Inbound message rate limiting per connection

use governor::{
    clock::DefaultClock,
    middleware::StateInformationMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use netconduit_protocol::MessageType;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};

/// Token bucket over inbound MESSAGE and RPC_REQUEST frames.
///
/// Capacity and refill rate both equal `messages_per_second`. Frames that
/// find the bucket empty are dropped by the caller; nothing is queued.
pub struct MessageRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock, StateInformationMiddleware>,
    capacity: u32,
    /// Tokens left after the most recent check
    remaining: AtomicU32,
}

impl MessageRateLimiter {
    /// Returns `None` when `messages_per_second` is zero
    #[must_use]
    pub fn new(messages_per_second: u32) -> Option<Self> {
        let rate = NonZeroU32::new(messages_per_second)?;
        let quota = Quota::per_second(rate).allow_burst(rate);
        Some(Self {
            limiter: RateLimiter::direct(quota).with_middleware::<StateInformationMiddleware>(),
            capacity: rate.get(),
            remaining: AtomicU32::new(rate.get()),
        })
    }

    /// Consume one token if available
    pub fn try_acquire(&self) -> bool {
        match self.limiter.check() {
            Ok(snapshot) => {
                self.remaining
                    .store(snapshot.remaining_burst_capacity(), Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.remaining.store(0, Ordering::Relaxed);
                false
            }
        }
    }

    /// Admit a frame; auth and heartbeat traffic never consumes tokens
    pub fn admit(&self, message_type: MessageType) -> bool {
        !message_type.is_rate_limited() || self.try_acquire()
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Tokens observed at the last check, always within `0..=capacity`
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MessageRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRateLimiter")
            .field("capacity", &self.capacity)
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}
