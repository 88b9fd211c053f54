use std::time::Duration;

use messenger_core::RetryPolicy;

/// Attempt counter for restarting a lost snapshot stream.
#[derive(Debug, Clone)]
pub(crate) struct SubscriptionBackoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl SubscriptionBackoff {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once the limit is reached.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.policy.next_delay(self.attempt)?;
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}
