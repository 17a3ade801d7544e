//! Per-marker rate limiting for diagnostics.
//!
//! A detector running at camera rate sees the same unregistered marker in
//! every frame.  [`DiagnosticThrottle`] lets one diagnostic per marker id
//! through per window, using a keyed `governor` limiter with quota
//! "1 per window".

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::HashMapStateStore;
use governor::{Quota, RateLimiter};
use tagpose_types::TagId;

/// Window used when none is configured.
pub const DEFAULT_WARN_PERIOD: Duration = Duration::from_secs(10);

type KeyedLimiter<C> =
    RateLimiter<TagId, HashMapStateStore<TagId>, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Allows at most one event per marker id per window.
///
/// A zero window disables throttling.
pub struct DiagnosticThrottle<C: Clock = DefaultClock> {
    limiter: Option<KeyedLimiter<C>>,
    window: Duration,
    emitted: AtomicUsize,
}

impl DiagnosticThrottle<DefaultClock> {
    /// Throttle on the wall clock.
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, DefaultClock::default())
    }
}

impl Default for DiagnosticThrottle<DefaultClock> {
    fn default() -> Self {
        Self::new(DEFAULT_WARN_PERIOD)
    }
}

impl<C: Clock> DiagnosticThrottle<C> {
    /// Throttle on an injected clock.
    pub fn with_clock(window: Duration, clock: C) -> Self {
        let limiter = Quota::with_period(window)
            .map(|q| q.allow_burst(NonZeroU32::MIN))
            .map(|quota| RateLimiter::hashmap_with_clock(quota, clock));
        Self {
            limiter,
            window,
            emitted: AtomicUsize::new(0),
        }
    }

    /// `true` if a diagnostic for `id` may be emitted now.  Each `true`
    /// consumes the id's allowance for the current window.
    pub fn allow(&self, id: TagId) -> bool {
        let allowed = match &self.limiter {
            Some(limiter) => limiter.check_key(&id).is_ok(),
            None => true,
        };
        if allowed {
            self.emitted.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    /// Total number of diagnostics allowed so far.
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl<C: Clock> std::fmt::Debug for DiagnosticThrottle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticThrottle")
            .field("window", &self.window)
            .field("emitted", &self.emitted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;

    fn throttle(window_secs: u64) -> (DiagnosticThrottle<FakeRelativeClock>, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        let throttle =
            DiagnosticThrottle::with_clock(Duration::from_secs(window_secs), clock.clone());
        (throttle, clock)
    }

    #[test]
    fn first_event_per_id_is_allowed() {
        let (throttle, _clock) = throttle(10);
        assert!(throttle.allow(5));
        assert!(throttle.allow(6));
        assert_eq!(throttle.emitted(), 2);
    }

    #[test]
    fn repeat_within_window_is_suppressed() {
        let (throttle, clock) = throttle(10);
        assert!(throttle.allow(5));
        for _ in 0..30 {
            clock.advance(Duration::from_millis(300));
            assert!(!throttle.allow(5));
        }
        assert_eq!(throttle.emitted(), 1);
    }

    #[test]
    fn allowed_again_after_window() {
        let (throttle, clock) = throttle(10);
        assert!(throttle.allow(5));
        clock.advance(Duration::from_secs(9));
        assert!(!throttle.allow(5));
        clock.advance(Duration::from_secs(2));
        assert!(throttle.allow(5));
        assert!(!throttle.allow(5));
        assert_eq!(throttle.emitted(), 2);
    }

    #[test]
    fn ids_are_throttled_independently() {
        let (throttle, _clock) = throttle(10);
        assert!(throttle.allow(1));
        assert!(!throttle.allow(1));
        assert!(throttle.allow(2));
        assert!(!throttle.allow(2));
    }

    #[test]
    fn zero_window_never_throttles() {
        let (throttle, _clock) = throttle(0);
        assert!((0..5).all(|_| throttle.allow(9)));
        assert_eq!(throttle.emitted(), 5);
    }
}
