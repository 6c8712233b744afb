//! Reconciliation retry state machine
//!
//! `Pending → Retrying(n) → {Synced, Error}`. Transitions are a pure function
//! of the current state and the outcome of the last label-modify call; the
//! listener owns the timer and just sleeps for [`ReconcileState::delay`]
//! between attempts.

use std::time::Duration;

use crate::classify;
use crate::config::ReconcileConfig;
use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_retries: config.max_retries,
        }
    }

    /// Delay before retry number `attempt` (0-based): `base × 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ReconcileConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileState {
    /// First attempt not made yet
    Pending,
    /// Waiting to make retry number `attempt` (0-based)
    Retrying { attempt: u32 },
    Synced,
    Error {
        retry_count: u32,
        message: String,
        /// The destination label is gone; the column needs remapping
        label_missing: bool,
    },
}

impl ReconcileState {
    /// Retries already made in this chain
    pub fn retries_made(&self) -> u32 {
        match self {
            Self::Pending | Self::Synced => 0,
            Self::Retrying { attempt } => *attempt,
            Self::Error { retry_count, .. } => *retry_count,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Synced | Self::Error { .. })
    }

    /// How long to wait before the next attempt, if one is due after a delay.
    pub fn delay(&self, policy: &RetryPolicy) -> Option<Duration> {
        match self {
            Self::Retrying { attempt } => Some(policy.delay_for(*attempt)),
            _ => None,
        }
    }

    /// State after an attempt made in `self` returned `outcome`.
    pub fn next(self, policy: &RetryPolicy, outcome: Result<(), &ProviderError>) -> Self {
        if self.is_terminal() {
            return self;
        }

        let err = match outcome {
            Ok(()) => return Self::Synced,
            Err(err) => err,
        };

        // The attempt just made was retry number `retries_made()` (or the
        // initial one from Pending)
        let retries_done = match self {
            Self::Retrying { attempt } => attempt + 1,
            _ => 0,
        };

        if classify::is_label_missing(err) {
            Self::Error {
                retry_count: retries_done,
                message: err.message.clone(),
                label_missing: true,
            }
        } else if retries_done < policy.max_retries {
            Self::Retrying {
                attempt: retries_done,
            }
        } else {
            Self::Error {
                retry_count: retries_done,
                message: err.message.clone(),
                label_missing: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> ProviderError {
        ProviderError::new(503, "Service Unavailable")
    }

    #[test]
    fn test_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(8000));
    }

    #[test]
    fn test_transient_failures_walk_the_retry_chain() {
        let policy = RetryPolicy::default();
        let err = transient();

        let mut state = ReconcileState::Pending;
        let mut delays = Vec::new();
        while !state.is_terminal() {
            state = state.next(&policy, Err(&err));
            if let Some(delay) = state.delay(&policy) {
                delays.push(delay.as_millis());
            }
        }

        assert_eq!(delays, vec![2000, 4000, 8000]);
        assert_eq!(
            state,
            ReconcileState::Error {
                retry_count: 3,
                message: "Service Unavailable".to_string(),
                label_missing: false,
            }
        );
    }

    #[test]
    fn test_label_error_short_circuits() {
        let policy = RetryPolicy::default();
        let err = ProviderError::new(400, "Invalid label: Label_9");

        let state = ReconcileState::Pending.next(&policy, Err(&err));
        assert_eq!(
            state,
            ReconcileState::Error {
                retry_count: 0,
                message: "Invalid label: Label_9".to_string(),
                label_missing: true,
            }
        );
        assert_eq!(state.delay(&policy), None);
    }

    #[test]
    fn test_success_after_retry() {
        let policy = RetryPolicy::default();
        let state = ReconcileState::Pending
            .next(&policy, Err(&transient()))
            .next(&policy, Ok(()));
        assert_eq!(state, ReconcileState::Synced);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let policy = RetryPolicy::default();
        assert_eq!(
            ReconcileState::Synced.next(&policy, Err(&transient())),
            ReconcileState::Synced
        );
    }

    #[test]
    fn test_zero_retries_fails_immediately() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_retries: 0,
        };
        let state = ReconcileState::Pending.next(&policy, Err(&transient()));
        assert!(matches!(state, ReconcileState::Error { retry_count: 0, .. }));
    }
}
