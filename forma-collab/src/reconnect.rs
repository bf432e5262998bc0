//! Fixed-delay reconnect budget.
//!
//! Every connection loss (or failed connect) consumes one attempt; a
//! successful open refills the budget. Once the budget is spent the session
//! stops retrying for good.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Retries allowed after consecutive failures.
    pub max_attempts: u32,
    /// Fixed delay before each retry.
    pub delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 3000,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct RetryState {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl RetryState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Record a failure and decide whether to schedule another attempt.
    pub fn on_failure(&mut self) -> RetryDecision {
        if self.attempts < self.policy.max_attempts {
            self.attempts += 1;
            RetryDecision::Retry {
                attempt: self.attempts,
                delay: self.policy.delay(),
            }
        } else {
            RetryDecision::GiveUp {
                attempts: self.attempts,
            }
        }
    }

    /// A connection opened; the budget is refilled.
    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_retries_then_give_up() {
        let mut state = RetryState::new(ReconnectPolicy::default());
        for expected in 1..=5 {
            assert_eq!(
                state.on_failure(),
                RetryDecision::Retry {
                    attempt: expected,
                    delay: Duration::from_millis(3000)
                }
            );
        }
        assert!(state.exhausted());
        // Sixth failure: nothing scheduled, and it stays that way.
        assert_eq!(state.on_failure(), RetryDecision::GiveUp { attempts: 5 });
        assert_eq!(state.on_failure(), RetryDecision::GiveUp { attempts: 5 });
    }

    #[test]
    fn test_fixed_spacing() {
        let mut state = RetryState::new(ReconnectPolicy::default());
        let delays: Vec<Duration> = (0..5)
            .map(|_| match state.on_failure() {
                RetryDecision::Retry { delay, .. } => delay,
                RetryDecision::GiveUp { .. } => panic!("gave up early"),
            })
            .collect();
        assert!(delays.iter().all(|d| *d == Duration::from_secs(3)));
    }

    #[test]
    fn test_success_refills_budget() {
        let mut state = RetryState::new(ReconnectPolicy {
            max_attempts: 2,
            delay_ms: 10,
        });
        state.on_failure();
        state.on_failure();
        assert!(state.exhausted());
        state.on_connected();
        assert_eq!(state.attempts(), 0);
        assert!(matches!(state.on_failure(), RetryDecision::Retry { attempt: 1, .. }));
    }

    #[test]
    fn test_zero_budget() {
        let mut state = RetryState::new(ReconnectPolicy {
            max_attempts: 0,
            delay_ms: 10,
        });
        assert_eq!(state.on_failure(), RetryDecision::GiveUp { attempts: 0 });
    }
}
