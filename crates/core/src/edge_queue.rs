//! Retry policy for the edge resolution queue.
//!
//! A failed item waits `multiplier^attempts` seconds (after incrementing
//! `attempts`), capped at `max_backoff`. Items are never dropped on failure.
//!
//! Parameter-matched edges are re-queued after a successful insert so that
//! nodes arriving in later imports still get connected. Each successful pass
//! increments `match_passes`; once it reaches `parameter_max_passes` the item
//! is retired.

use std::time::Duration;

/// Backoff and re-queue limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeQueuePolicy {
    pub backoff_multiplier: u32,
    pub max_backoff: Duration,
    pub parameter_max_passes: i32,
}

impl Default for EdgeQueuePolicy {
    fn default() -> Self {
        Self {
            backoff_multiplier: 5,
            max_backoff: Duration::from_secs(86_400),
            parameter_max_passes: 10,
        }
    }
}

/// What to do with a queue item once its edges were written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterSuccess {
    Delete,
    Requeue { match_passes: i32, delay: Duration },
}

/// New `attempts` and wait time for an item that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureBackoff {
    pub attempts: i32,
    pub delay: Duration,
}

impl EdgeQueuePolicy {
    /// `multiplier^exponent` seconds, saturating at `max_backoff`.
    pub fn backoff_delay(&self, exponent: i32) -> Duration {
        let exponent = u32::try_from(exponent).unwrap_or(0);
        let secs = u64::from(self.backoff_multiplier)
            .checked_pow(exponent)
            .unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.max_backoff)
    }

    pub fn after_failure(&self, attempts: i32) -> FailureBackoff {
        let attempts = attempts.saturating_add(1);
        FailureBackoff {
            attempts,
            delay: self.backoff_delay(attempts),
        }
    }

    pub fn after_success(&self, has_parameters: bool, match_passes: i32) -> AfterSuccess {
        if !has_parameters {
            return AfterSuccess::Delete;
        }
        let match_passes = match_passes.saturating_add(1);
        if match_passes >= self.parameter_max_passes {
            AfterSuccess::Delete
        } else {
            AfterSuccess::Requeue {
                match_passes,
                delay: self.backoff_delay(match_passes),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_geometrically() {
        let policy = EdgeQueuePolicy::default();
        let mut attempts = 0;
        for k in 1..=4 {
            let b = policy.after_failure(attempts);
            assert_eq!(b.attempts, k);
            assert_eq!(b.delay, Duration::from_secs(5u64.pow(k as u32)));
            attempts = b.attempts;
        }
    }

    #[test]
    fn backoff_is_capped() {
        let policy = EdgeQueuePolicy {
            backoff_multiplier: 10,
            max_backoff: Duration::from_secs(3600),
            parameter_max_passes: 3,
        };
        assert_eq!(policy.after_failure(40).delay, Duration::from_secs(3600));
    }

    #[test]
    fn concrete_edges_are_deleted_on_success() {
        assert_eq!(EdgeQueuePolicy::default().after_success(false, 0), AfterSuccess::Delete);
    }

    #[test]
    fn parameter_edges_requeue_until_ceiling() {
        let policy = EdgeQueuePolicy {
            parameter_max_passes: 3,
            ..EdgeQueuePolicy::default()
        };
        assert_eq!(
            policy.after_success(true, 0),
            AfterSuccess::Requeue { match_passes: 1, delay: Duration::from_secs(5) }
        );
        assert_eq!(
            policy.after_success(true, 1),
            AfterSuccess::Requeue { match_passes: 2, delay: Duration::from_secs(25) }
        );
        assert_eq!(policy.after_success(true, 2), AfterSuccess::Delete);
    }
}
