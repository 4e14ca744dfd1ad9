//! Client-side countdown reconstruction.
//!
//! Two deliberately distinct disciplines (do not unify them):
//!
//! * Lock-step clients re-seed a local countdown whenever they observe a
//!   phase change and decrement it themselves. This trusts negligible,
//!   uniform notification delay and accepts bounded cross-client skew.
//! * Timed-pool clients recompute the remaining time every tick from the
//!   server-anchored end instant and the measured clock offset, which makes
//!   them immune to local clock error and late notifications.
//!
//! Both clamp at zero, and zero means local submission lockout regardless of
//! anything the server has or hasn't confirmed yet.

/// Locally decremented countdown for lock-step phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockstepCountdown {
    remaining: u32,
}

impl LockstepCountdown {
    pub fn idle() -> Self {
        Self { remaining: 0 }
    }

    /// Re-seed to the nominal duration of a freshly observed phase.
    pub fn reseed(&mut self, seconds: u32) {
        self.remaining = seconds;
    }

    /// One local second. Clamps at zero.
    pub fn tick(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn expired(&self) -> bool {
        self.remaining == 0
    }
}

/// Remaining milliseconds in a timed-pool session:
/// `(start_time + duration) − (local_now + offset)`, clamped at zero.
/// `offset_ms` is the store's clock feed value (server − local).
pub fn pool_remaining_ms(start_time: i64, duration: u64, local_now_ms: i64, offset_ms: i64) -> u64 {
    let end = start_time + duration as i64;
    let server_now = local_now_ms + offset_ms;
    (end - server_now).max(0) as u64
}
