use std::time::Duration;

/// Fixed-delay retry policy.
///
/// The default production policies are unbounded: no attempt cap and no
/// deadline. Tests and operators can bound them with [`with_max_attempts`]
/// or [`with_deadline`].
///
/// [`with_max_attempts`]: RetryPolicy::with_max_attempts
/// [`with_deadline`]: RetryPolicy::with_deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    pub const fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
            deadline: None,
        }
    }

    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none() && self.deadline.is_none()
    }

    /// Whether another attempt may start after `attempts` have already run
    /// and `elapsed` time has passed since the first one.
    pub fn allows_another(&self, attempts: u32, elapsed: Duration) -> bool {
        if let Some(max) = self.max_attempts {
            if attempts >= max {
                return false;
            }
        }
        if let Some(deadline) = self.deadline {
            if elapsed + self.delay > deadline {
                return false;
            }
        }
        true
    }
}
