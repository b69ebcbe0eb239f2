// ABOUTME: Command-dialect hypothesis and bounded retry state for agent dialing.
// ABOUTME: Turns classified launch failures into retry, install, or give-up decisions.

use std::time::Duration;

use crate::transport::Classification;

/// Maximum number of agent launch attempts for one logical connect.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Base delay between attempts. Attempt `n` waits `n` times this.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

/// The command dialect the remote side is believed to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    PosixShell,
    WindowsCmd,
}

impl Dialect {
    pub fn flipped(self) -> Self {
        match self {
            Dialect::PosixShell => Dialect::WindowsCmd,
            Dialect::WindowsCmd => Dialect::PosixShell,
        }
    }
}

/// Bounds on the dial loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum launch attempts, including the first.
    pub max_attempts: usize,
    /// Base backoff between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Set maximum attempts. Values below one are raised to one.
    pub fn with_max_attempts(mut self, max: usize) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    /// Set the base backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        self.backoff
            .saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX))
    }
}

/// What the dial loop does after a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Retry, possibly under a flipped dialect.
    Retry,
    /// Install the agent, then retry.
    InstallThenRetry,
    /// The failure is not retryable, or nothing is left to try.
    GiveUp,
    /// The failure was retryable but the attempt budget is spent.
    Exhausted,
}

/// Retry state held across the attempts of one logical connect.
#[derive(Debug)]
pub struct HypothesisState {
    policy: RetryPolicy,
    dialect: Dialect,
    attempts: usize,
    flipped: bool,
    installed: bool,
}

impl HypothesisState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            dialect: Dialect::default(),
            attempts: 0,
            flipped: false,
            installed: false,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Record the start of an attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> usize {
        self.attempts += 1;
        self.attempts
    }

    /// Decide how to proceed after a failed attempt.
    ///
    /// The dialect flips at most once and installation is tried at most once
    /// per connect. A classification asking only for something already tried
    /// gives up rather than repeating the same attempt.
    pub fn decide(&mut self, classification: Classification) -> Decision {
        if !classification.try_install && !classification.switch_dialect {
            return Decision::GiveUp;
        }
        if self.attempts >= self.policy.max_attempts {
            return Decision::Exhausted;
        }

        let mut progressed = false;
        if classification.switch_dialect && !self.flipped {
            self.flipped = true;
            self.dialect = self.dialect.flipped();
            progressed = true;
            tracing::info!(dialect = ?self.dialect, "Switching command dialect hypothesis");
        }
        if classification.try_install && !self.installed {
            self.installed = true;
            return Decision::InstallThenRetry;
        }

        if progressed {
            Decision::Retry
        } else {
            Decision::GiveUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(policy.backoff, DEFAULT_BACKOFF);
    }

    #[test]
    fn test_policy_builder() {
        let policy = RetryPolicy::default()
            .with_max_attempts(0)
            .with_backoff(Duration::from_millis(5));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(5));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(15));
    }

    #[test]
    fn test_dialect_flip() {
        assert_eq!(Dialect::default(), Dialect::PosixShell);
        assert_eq!(Dialect::PosixShell.flipped(), Dialect::WindowsCmd);
        assert_eq!(Dialect::WindowsCmd.flipped(), Dialect::PosixShell);
    }

    #[test]
    fn test_terminal_classification_gives_up() {
        let mut state = HypothesisState::new(RetryPolicy::default());
        state.begin_attempt();
        assert_eq!(state.decide(Classification::TERMINAL), Decision::GiveUp);
        assert_eq!(state.dialect(), Dialect::PosixShell);
    }

    #[test]
    fn test_switch_flips_once() {
        let mut state = HypothesisState::new(RetryPolicy::default());
        let switch = Classification::new(false, true);

        state.begin_attempt();
        assert_eq!(state.decide(switch), Decision::Retry);
        assert_eq!(state.dialect(), Dialect::WindowsCmd);

        state.begin_attempt();
        assert_eq!(state.decide(switch), Decision::GiveUp);
        assert_eq!(state.dialect(), Dialect::WindowsCmd);
    }

    #[test]
    fn test_install_once() {
        let mut state = HypothesisState::new(RetryPolicy::default());
        let install = Classification::new(true, false);

        state.begin_attempt();
        assert_eq!(state.decide(install), Decision::InstallThenRetry);
        state.begin_attempt();
        assert_eq!(state.decide(install), Decision::GiveUp);
    }

    #[test]
    fn test_install_and_switch_together() {
        let mut state = HypothesisState::new(RetryPolicy::default());
        state.begin_attempt();
        assert_eq!(
            state.decide(Classification::new(true, true)),
            Decision::InstallThenRetry
        );
        assert_eq!(state.dialect(), Dialect::WindowsCmd);
    }

    #[test]
    fn test_budget_exhausted() {
        let mut state = HypothesisState::new(RetryPolicy::default().with_max_attempts(1));
        assert_eq!(state.begin_attempt(), 1);
        assert_eq!(
            state.decide(Classification::new(false, true)),
            Decision::Exhausted
        );
        assert_eq!(state.attempts(), 1);
    }
}
