//! Fixed-duration time windows.
//!
//! A window is the unit of time bookkeeping shared by rate limit counters and
//! cached response freshness. Windows are pure values: every query takes the
//! current time as an argument, which keeps this module free of any clock.

use std::time::{Duration, SystemTime};

/// Longest lifetime a window or stored entry can have, about 100 years.
pub const MAX_WINDOW: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A started, immutable time window.
///
/// `expires_at` is `started_at + window`, with the window capped at [`MAX_WINDOW`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    window: Duration,
    started_at: SystemTime,
    expires_at: SystemTime,
}

impl WindowState {
    /// Start a window of length `window` at `now`.
    pub fn start(window: Duration, now: SystemTime) -> Self {
        Self {
            window,
            started_at: now,
            expires_at: expiry_after(now, window),
        }
    }

    /// Length of the window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// When the window was started.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// When the window ends.
    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    /// Time left until expiry, floored at zero.
    pub fn remaining(&self, now: SystemTime) -> Duration {
        remaining_until(self.expires_at, now)
    }

    /// A window is expired once `now >= expires_at`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        is_expired_at(self.expires_at, now)
    }
}

/// Instant `lifetime` after `now`, capped at [`MAX_WINDOW`] and never past
/// what `SystemTime` can represent.
pub fn expiry_after(now: SystemTime, lifetime: Duration) -> SystemTime {
    now.checked_add(lifetime.min(MAX_WINDOW)).unwrap_or(now)
}

/// Time left until `expires_at`, floored at zero.
pub fn remaining_until(expires_at: SystemTime, now: SystemTime) -> Duration {
    expires_at.duration_since(now).unwrap_or(Duration::ZERO)
}

/// Whether a value expiring at `expires_at` is gone at `now`.
pub fn is_expired_at(expires_at: SystemTime, now: SystemTime) -> bool {
    now >= expires_at
}
