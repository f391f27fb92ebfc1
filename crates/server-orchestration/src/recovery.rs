//! Bounded per-service recovery accounting

use std::collections::HashMap;

/// What to do about a failed service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Attempt a restart; carries the attempt number (1-based)
    Retry(u32),
    /// The attempt budget is spent; leave the service down
    Exhausted,
}

/// Consecutive-failure counter per service
///
/// A success resets the service's counter; a full orchestrator restart
/// resets all of them.
#[derive(Debug)]
pub struct RecoveryTracker {
    attempts: HashMap<String, u32>,
    max_attempts: u32,
}

impl RecoveryTracker {
    /// Create a tracker allowing `max_attempts` consecutive retries
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: HashMap::new(),
            max_attempts,
        }
    }

    /// Record a failed probe and decide whether to retry
    pub fn record_failure(&mut self, service: &str) -> RecoveryDecision {
        let attempts = self.attempts.entry(service.to_string()).or_insert(0);
        if *attempts >= self.max_attempts {
            return RecoveryDecision::Exhausted;
        }
        *attempts += 1;
        RecoveryDecision::Retry(*attempts)
    }

    /// Record a healthy probe, clearing the service's counter
    pub fn record_success(&mut self, service: &str) {
        self.attempts.remove(service);
    }

    /// Clear every counter
    pub fn reset(&mut self) {
        self.attempts.clear();
    }

    /// Attempts consumed so far for `service`
    pub fn attempts(&self, service: &str) -> u32 {
        self.attempts.get(service).copied().unwrap_or(0)
    }

    /// Total attempts consumed across all services
    pub fn total_attempts(&self) -> u32 {
        self.attempts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_stop_after_the_budget() {
        let mut tracker = RecoveryTracker::new(3);
        assert_eq!(tracker.record_failure("ws"), RecoveryDecision::Retry(1));
        assert_eq!(tracker.record_failure("ws"), RecoveryDecision::Retry(2));
        assert_eq!(tracker.record_failure("ws"), RecoveryDecision::Retry(3));
        assert_eq!(tracker.record_failure("ws"), RecoveryDecision::Exhausted);
        assert_eq!(tracker.record_failure("ws"), RecoveryDecision::Exhausted);
        assert_eq!(tracker.attempts("ws"), 3);
    }

    #[test]
    fn test_success_resets_the_counter() {
        let mut tracker = RecoveryTracker::new(2);
        tracker.record_failure("ws");
        tracker.record_failure("ws");
        assert_eq!(tracker.record_failure("ws"), RecoveryDecision::Exhausted);

        tracker.record_success("ws");
        assert_eq!(tracker.record_failure("ws"), RecoveryDecision::Retry(1));
    }

    #[test]
    fn test_services_are_tracked_independently() {
        let mut tracker = RecoveryTracker::new(1);
        assert_eq!(tracker.record_failure("ws"), RecoveryDecision::Retry(1));
        assert_eq!(tracker.record_failure("discovery"), RecoveryDecision::Retry(1));
        assert_eq!(tracker.record_failure("ws"), RecoveryDecision::Exhausted);
        assert_eq!(tracker.total_attempts(), 2);

        tracker.reset();
        assert_eq!(tracker.record_failure("ws"), RecoveryDecision::Retry(1));
    }
}
