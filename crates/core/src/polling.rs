use std::collections::HashMap;
use std::time::Duration;

use tokio::task::AbortHandle;

use crate::config::WorkbenchConfig;
use crate::execution::ExecutionId;
use crate::tab_store::TabId;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 600;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub max_consecutive_failures: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

impl From<&WorkbenchConfig> for PollPolicy {
    fn from(config: &WorkbenchConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            max_attempts: config.max_poll_attempts,
            max_consecutive_failures: config.max_consecutive_poll_failures,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    Continue,
    /// Too many consecutive status-fetch failures.
    Unavailable,
    /// Attempt cap exhausted without a terminal status.
    TimedOut,
}

/// Attempt and circuit-breaker accounting for one polling loop.
#[derive(Debug, Clone)]
pub struct PollBudget {
    policy: PollPolicy,
    attempts: u32,
    consecutive_failures: u32,
}

impl PollBudget {
    #[must_use]
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            consecutive_failures: 0,
        }
    }

    /// Budget for a loop that picks up an execution already polled
    /// `attempts` times.
    #[must_use]
    pub fn resume(policy: PollPolicy, attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::new(policy)
        }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.policy.interval
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn begin_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn record_success(&mut self) -> PollVerdict {
        self.consecutive_failures = 0;
        self.exhausted_verdict()
    }

    pub fn record_failure(&mut self) -> PollVerdict {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.policy.max_consecutive_failures {
            return PollVerdict::Unavailable;
        }
        self.exhausted_verdict()
    }

    #[must_use]
    pub fn unavailable_message(&self, last_error: &str) -> String {
        format!(
            "Execution status unavailable after {} consecutive failures: {last_error}",
            self.consecutive_failures
        )
    }

    #[must_use]
    pub fn timeout_message(&self) -> String {
        let waited = self.policy.interval.saturating_mul(self.attempts);
        format!(
            "Polling timed out after {} attempts ({}s) without a final status",
            self.attempts,
            waited.as_secs()
        )
    }

    fn exhausted_verdict(&self) -> PollVerdict {
        if self.is_exhausted() {
            PollVerdict::TimedOut
        } else {
            PollVerdict::Continue
        }
    }
}

#[derive(Debug)]
struct PollTimer {
    execution_id: ExecutionId,
    handle: AbortHandle,
}

/// At most one live polling task per tab. Only the polling side of the
/// workbench touches this table.
#[derive(Debug, Default)]
pub struct PollingTimers {
    timers: HashMap<TabId, PollTimer>,
}

impl PollingTimers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    #[must_use]
    pub fn tracked_execution(&self, tab_id: &TabId) -> Option<&ExecutionId> {
        self.timers.get(tab_id).map(|timer| &timer.execution_id)
    }

    /// Registers a timer, aborting and returning whatever the tab had before.
    pub fn start(
        &mut self,
        tab_id: TabId,
        execution_id: ExecutionId,
        handle: AbortHandle,
    ) -> Option<ExecutionId> {
        let previous = self.timers.insert(
            tab_id,
            PollTimer {
                execution_id,
                handle,
            },
        );
        previous.map(|timer| {
            timer.handle.abort();
            timer.execution_id
        })
    }

    pub fn stop(&mut self, tab_id: &TabId) -> Option<ExecutionId> {
        let timer = self.timers.remove(tab_id)?;
        timer.handle.abort();
        Some(timer.execution_id)
    }

    /// Stops the tab's timer only while it still belongs to `execution_id`.
    pub fn stop_matching(&mut self, tab_id: &TabId, execution_id: &ExecutionId) -> bool {
        if self.tracked_execution(tab_id) != Some(execution_id) {
            return false;
        }
        self.stop(tab_id).is_some()
    }

    pub fn stop_all(&mut self) -> Vec<(TabId, ExecutionId)> {
        self.timers
            .drain()
            .map(|(tab_id, timer)| {
                timer.handle.abort();
                (tab_id, timer.execution_id)
            })
            .collect()
    }
}
