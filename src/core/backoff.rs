// src/core/backoff.rs

//! Bounded exponential backoff shared by the monitor worker's reconnect loop
//! (§4.F) and the log worker's initial connect (§4.G). Starts at a caller-
//! supplied base (`poll_interval`), doubles per consecutive failed attempt,
//! and caps at `4 * tcp_timeout`. Does not apply to the liveness probe
//! (§4.D), which uses its own fixed `wait_time`.

use std::time::Duration;

/// `attempt` is the number of consecutive failures observed so far (0 on the
/// very first try). Always returns at least one second.
pub fn bounded_exponential(base_s: u64, tcp_timeout_s: u64, attempt: u32) -> Duration {
    let cap = 4 * tcp_timeout_s;
    let scaled = base_s.saturating_mul(1u64 << attempt.min(16));
    Duration::from_secs(scaled.min(cap).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base() {
        assert_eq!(bounded_exponential(5, 10, 0), Duration::from_secs(5));
        assert_eq!(bounded_exponential(5, 10, 1), Duration::from_secs(10));
        assert_eq!(bounded_exponential(5, 10, 2), Duration::from_secs(20));
    }

    #[test]
    fn caps_at_four_times_tcp_timeout() {
        assert_eq!(bounded_exponential(5, 10, 10), Duration::from_secs(40));
    }

    #[test]
    fn never_returns_zero() {
        assert_eq!(bounded_exponential(0, 10, 0), Duration::from_secs(1));
    }
}
