//! Retry decisions for connection attempts.
//!
//! [`RetryPolicy::decide`] is a pure function of the attempt number and the
//! failure; sleeping and counting are the coordinator's job.

use std::time::Duration;

use crate::{ConnectFailure, ConnectOptions, TimeoutBudget};

/// Delay strategy between attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// The same delay before every retry.
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => delay,
            Self::Exponential { base, max } => {
                let exp = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << exp).min(max)
            }
        }
    }
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Clone, Debug)]
pub enum Decision {
    Retry {
        delay: Duration,
        /// Budget for the next attempt.
        next_timeout: TimeoutBudget,
    },
    GiveUp(GiveUp),
}

/// Why the policy stopped retrying.
#[derive(Clone, Debug)]
pub struct GiveUp {
    /// Attempts made, including the failed one that triggered this decision.
    pub attempts: u32,
    pub last_error: ConnectFailure,
    /// `false` when the failure was not retryable regardless of budget.
    pub exhausted: bool,
}

/// Pluggable retry configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    budget: TimeoutBudget,
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn fail_fast(budget: TimeoutBudget) -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
            budget,
        }
    }

    /// Up to `max_attempts` attempts separated by `delay`.
    pub fn fixed(max_attempts: u32, delay: Duration, budget: TimeoutBudget) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
            budget,
        }
    }

    pub fn from_options(options: &ConnectOptions) -> Self {
        let delay = options.retry_delay();
        let backoff = if delay.is_zero() {
            Backoff::None
        } else {
            Backoff::Fixed(delay)
        };
        Self {
            max_attempts: options.max_attempts.max(1),
            backoff,
            budget: options.budget(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Budget for the first attempt of an acquisition.
    pub fn initial_budget(&self) -> TimeoutBudget {
        self.budget
    }

    /// Decides what follows failed attempt number `attempt` (1-based).
    pub fn decide(&self, attempt: u32, last_error: &ConnectFailure) -> Decision {
        if !last_error.is_retryable() {
            return Decision::GiveUp(GiveUp {
                attempts: attempt,
                last_error: last_error.clone(),
                exhausted: false,
            });
        }
        if attempt >= self.max_attempts {
            return Decision::GiveUp(GiveUp {
                attempts: attempt,
                last_error: last_error.clone(),
                exhausted: true,
            });
        }
        Decision::Retry {
            delay: self.backoff.delay(attempt),
            next_timeout: self.budget,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_options(&ConnectOptions::default())
    }
}

/// Attempt counter for the current acquisition cycle.
///
/// Reset to zero on success and on give-up; never decremented.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RetryBudget {
    attempt: u32,
    max_attempts: u32,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Counts a new attempt and returns its 1-based number.
    pub fn begin(&mut self) -> u32 {
        self.attempt = (self.attempt + 1).min(self.max_attempts);
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
