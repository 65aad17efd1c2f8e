//! Pure session state and retry decision logic
//!
//! No I/O here: the listener consults these functions while holding its state lock.

use std::fmt;
use std::time::Duration;

/// Maximum failed reconnect attempts before the session gives up
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Fixed delay before each reconnect attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2500);

/// Lifecycle state of the broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection and none being attempted
    Disconnected,
    /// A (re)connect attempt is scheduled or in flight
    Connecting,
    /// Connected and subscriptions issued
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Bounded retry policy with a fixed backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub reconnect_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Decide what follows a failed connect attempt, given the retry count
    /// *after* it was incremented for that failure.
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count > self.max_retries {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry {
                attempt: retry_count,
                delay: self.reconnect_delay,
            }
        }
    }

    /// Upper bound on wall-clock time spent sleeping between attempts
    pub fn max_total_backoff(&self) -> Duration {
        // One delay after the loss, then one per retried failure
        self.reconnect_delay * (self.max_retries + 1)
    }
}

/// Outcome of [`RetryPolicy::decide`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted,
}

/// Whether a transition is legal from `from` on the given trigger
pub fn can_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    matches!(
        (from, to),
        (Disconnected, Connecting)
            | (Disconnected, Connected)
            | (Connecting, Connecting)
            | (Connecting, Connected)
            | (Connecting, Disconnected)
            | (Connected, Connecting)
            | (Connected, Disconnected)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.reconnect_delay, Duration::from_millis(2500));
    }

    #[test]
    fn test_decide_retries_up_to_max() {
        let policy = RetryPolicy::default();
        for count in 1..=5 {
            assert_eq!(
                policy.decide(count),
                RetryDecision::Retry {
                    attempt: count,
                    delay: Duration::from_millis(2500)
                }
            );
        }
    }

    #[test]
    fn test_decide_exhausted_only_above_max() {
        let policy = RetryPolicy::default();
        assert!(matches!(policy.decide(5), RetryDecision::Retry { .. }));
        assert_eq!(policy.decide(6), RetryDecision::Exhausted);
        assert_eq!(policy.decide(100), RetryDecision::Exhausted);
    }

    #[test]
    fn test_zero_retries_policy() {
        let policy = RetryPolicy {
            max_retries: 0,
            reconnect_delay: Duration::from_millis(10),
        };
        assert_eq!(policy.decide(1), RetryDecision::Exhausted);
    }

    #[test]
    fn test_max_total_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_total_backoff(), Duration::from_millis(15_000));
    }

    #[test]
    fn test_transitions() {
        use SessionState::*;
        assert!(can_transition(Disconnected, Connecting));
        assert!(can_transition(Connected, Connecting));
        assert!(can_transition(Connecting, Connected));
        assert!(!can_transition(Connected, Connected));
        assert!(!can_transition(Disconnected, Disconnected));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Connecting.to_string(), "connecting");
        assert_eq!(SessionState::Connected.to_string(), "connected");
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
    }
}
