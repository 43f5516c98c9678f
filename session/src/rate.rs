//! Sliding-window rate limiter.
//!
//! Chat and file-chunk sends count against a per-session window of 12 events
//! over 5 seconds. A rejection drops the offending envelope and informs the
//! sender; it never terminates the session.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Per-session sliding-window counter
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_events: usize,
    hits: VecDeque<Instant>,
}

impl RateLimiter {
    /// Create a limiter admitting `max_events` per `window`.
    pub fn new(window: Duration, max_events: usize) -> Self {
        Self {
            window,
            max_events,
            hits: VecDeque::with_capacity(max_events + 1),
        }
    }

    /// Record a send attempt at `now`. Returns whether it is admitted.
    ///
    /// Timestamps older than the window are evicted first; if the window is
    /// already at capacity the attempt is rejected and not recorded.
    pub fn accept(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.hits.front() {
            if now.duration_since(*oldest) > self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }

        if self.hits.len() >= self.max_events {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    /// Events currently inside the window.
    pub fn in_window(&self) -> usize {
        self.hits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Duration::from_secs(5), 12)
    }

    #[test]
    fn test_admits_up_to_capacity() {
        let mut rl = limiter();
        let t0 = Instant::now();
        for i in 0..12 {
            assert!(rl.accept(t0 + Duration::from_millis(i)), "event {i}");
        }
        assert!(!rl.accept(t0 + Duration::from_millis(20)));
    }

    #[test]
    fn test_burst_of_fifteen_accepts_exactly_twelve() {
        let mut rl = limiter();
        let t0 = Instant::now();
        let accepted = (0..15).filter(|i| rl.accept(t0 + Duration::from_millis(*i))).count();
        assert_eq!(accepted, 12);
    }

    #[test]
    fn test_dense_sequence_never_exceeds_capacity() {
        // Any arrival pattern fitting inside one window admits at most 12.
        let mut rl = limiter();
        let t0 = Instant::now();
        let mut accepted = 0;
        for i in 0..100u64 {
            if rl.accept(t0 + Duration::from_millis(i * 40)) {
                accepted += 1;
            }
        }
        // 100 * 40ms < 5s, all inside one window
        assert_eq!(accepted, 12);
    }

    #[test]
    fn test_window_slides() {
        let mut rl = limiter();
        let t0 = Instant::now();
        for i in 0..12 {
            assert!(rl.accept(t0 + Duration::from_millis(i)));
        }
        assert!(!rl.accept(t0 + Duration::from_secs(1)));
        // Past the window the old hits fall out
        assert!(rl.accept(t0 + Duration::from_secs(6)));
        assert_eq!(rl.in_window(), 1);
    }

    #[test]
    fn test_rejections_are_not_recorded() {
        let mut rl = RateLimiter::new(Duration::from_secs(5), 2);
        let t0 = Instant::now();
        assert!(rl.accept(t0));
        assert!(rl.accept(t0));
        assert!(!rl.accept(t0 + Duration::from_secs(1)));
        assert_eq!(rl.in_window(), 2);
        // The rejected attempt must not extend the occupancy
        assert!(rl.accept(t0 + Duration::from_millis(5_500)));
    }
}
