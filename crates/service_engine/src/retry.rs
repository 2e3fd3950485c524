//! Failure disposition.
//!
//! A failed task is dead-lettered once its attempts are exhausted. Otherwise
//! it is requeued; with a zero backoff base it is claimable immediately,
//! else after `min(max, base * 2^(attempt-1))` seconds scaled by a random
//! factor in `[1 - jitter, 1 + jitter]`.

use std::time::Duration;

use infra_config::{RetryConfig, WorkerConfig};
use infra_store::{FailAction, TaskRecord};
use rand::Rng;

use crate::error::TaskError;

/// How failed tasks leave RUNNING.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub jitter_pct: f64,
    /// Dead-letter non-retryable failures without waiting for the budget
    pub dead_letter_non_retryable: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: Duration::ZERO,
            backoff_max: Duration::from_secs(60),
            jitter_pct: 0.0,
            dead_letter_non_retryable: false,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl RetryPolicy {
    pub fn from_config(retry: &RetryConfig, worker: &WorkerConfig) -> Self {
        Self {
            backoff_base: secs(retry.backoff_base_seconds),
            backoff_max: secs(retry.backoff_max_seconds),
            jitter_pct: retry.jitter_pct.clamp(0.0, 1.0),
            dead_letter_non_retryable: worker.dead_letter_non_retryable,
        }
    }

    /// Disposition of `task` after `error`, using the thread RNG for jitter.
    pub fn decide(&self, task: &TaskRecord, error: &TaskError) -> FailAction {
        self.decide_with_rng(task, error, &mut rand::thread_rng())
    }

    pub fn decide_with_rng<R: Rng + ?Sized>(
        &self,
        task: &TaskRecord,
        error: &TaskError,
        rng: &mut R,
    ) -> FailAction {
        if task.attempts_exhausted() {
            return FailAction::DeadLetter;
        }
        if self.dead_letter_non_retryable && !error.is_retryable() {
            return FailAction::DeadLetter;
        }
        FailAction::Requeue {
            delay: self.delay(task.attempt, rng),
        }
    }

    /// Requeue delay after the `attempt`-th claim failed.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        if self.backoff_base.is_zero() {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(30) as i32;
        let raw = (self.backoff_base.as_secs_f64() * 2f64.powi(exp))
            .min(self.backoff_max.as_secs_f64());
        let factor = if self.jitter_pct > 0.0 {
            rng.gen_range(1.0 - self.jitter_pct..=1.0 + self.jitter_pct)
        } else {
            1.0
        };
        secs(raw * factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pricer_core::types::ComputationError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn task(attempt: u32, max_attempts: u32) -> TaskRecord {
        let mut t = TaskRecord::queued(
            Uuid::nil(),
            "R",
            None,
            "FX_FWD",
            "S",
            1,
            0,
            max_attempts,
            Utc::now(),
        );
        t.attempt = attempt;
        t
    }

    fn computation() -> TaskError {
        TaskError::Computation {
            position_id: "P1".to_string(),
            scenario_id: "BASE".to_string(),
            source: ComputationError::MissingCurve("USD".to_string()),
        }
    }

    #[test]
    fn test_default_requeues_immediately_until_exhausted() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&task(1, 3), &computation()),
            FailAction::Requeue {
                delay: Duration::ZERO
            }
        );
        assert_eq!(
            policy.decide(&task(3, 3), &computation()),
            FailAction::DeadLetter
        );
    }

    #[test]
    fn test_not_found_is_retried_unless_opted_out() {
        let nf = TaskError::not_found("run", "R");
        assert!(matches!(
            RetryPolicy::default().decide(&task(1, 3), &nf),
            FailAction::Requeue { .. }
        ));

        let strict = RetryPolicy {
            dead_letter_non_retryable: true,
            ..Default::default()
        };
        assert_eq!(strict.decide(&task(1, 3), &nf), FailAction::DeadLetter);
        assert!(matches!(
            strict.decide(&task(1, 3), &computation()),
            FailAction::Requeue { .. }
        ));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(10),
            jitter_pct: 0.0,
            dead_letter_non_retryable: false,
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(policy.delay(1, &mut rng), Duration::from_secs(2));
        assert_eq!(policy.delay(2, &mut rng), Duration::from_secs(4));
        assert_eq!(policy.delay(3, &mut rng), Duration::from_secs(8));
        assert_eq!(policy.delay(4, &mut rng), Duration::from_secs(10));
        assert_eq!(policy.delay(60, &mut rng), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_secs(10),
            backoff_max: Duration::from_secs(60),
            jitter_pct: 0.2,
            dead_letter_non_retryable: false,
        };
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let d = policy.delay(1, &mut rng).as_secs_f64();
            assert!((8.0..=12.0).contains(&d), "delay {} outside band", d);
        }
    }
}
