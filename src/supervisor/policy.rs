// src/supervisor/policy.rs

use std::time::Duration;

/// Bounded retry for the initial configuration fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    pub sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            sleep: Duration::from_secs(3),
        }
    }
}

/// How loudly to report the n-th consecutive failed poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Escalation {
    Info,
    Warn,
    Error,
    /// Give up and retire the node.
    Shutdown,
}

/// Thresholds (in consecutive failures) at which poll failures escalate.
///
/// The default reports the 1st failure at info, the 2nd at warn, the 3rd
/// at error and shuts down on the 4th.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    warn_at: u32,
    error_at: u32,
    shutdown_at: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            warn_at: 2,
            error_at: 3,
            shutdown_at: 4,
        }
    }
}

impl EscalationPolicy {
    /// Thresholds are clamped so that info <= warn <= error <= shutdown
    /// always holds and shutdown happens on the first failure at the
    /// earliest.
    pub fn new(warn_at: u32, error_at: u32, shutdown_at: u32) -> Self {
        let shutdown_at = shutdown_at.max(1);
        let error_at = error_at.clamp(1, shutdown_at);
        let warn_at = warn_at.clamp(1, error_at);
        Self {
            warn_at,
            error_at,
            shutdown_at,
        }
    }

    /// Default warn/error thresholds with a different shutdown point.
    pub fn shutdown_after(failures: u32) -> Self {
        let defaults = Self::default();
        Self::new(defaults.warn_at, defaults.error_at, failures)
    }

    pub fn shutdown_at(&self) -> u32 {
        self.shutdown_at
    }

    /// Classify the given number of consecutive failures (>= 1).
    pub fn classify(&self, consecutive_failures: u32) -> Escalation {
        if consecutive_failures >= self.shutdown_at {
            Escalation::Shutdown
        } else if consecutive_failures >= self.error_at {
            Escalation::Error
        } else if consecutive_failures >= self.warn_at {
            Escalation::Warn
        } else {
            Escalation::Info
        }
    }
}
