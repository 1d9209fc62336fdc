use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a run stopped, in the priority order spec §4.12 gives them — hard
/// limits (`ExternalAbort`, `TimeoutReached`, `ErrorThresholdExceeded`,
/// `MaxStepsReached`) always outrank the success conditions that follow
/// them, so `evaluate` checks them in exactly this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    ExternalAbort,
    TimeoutReached,
    ErrorThresholdExceeded,
    GoalSatisfied,
    ArtifactProduced,
    MaxStepsReached,
}

impl StopReason {
    /// A hard limit means the run failed to reach its goal; the others mean
    /// the agent got there (or decided it was done).
    pub fn is_hard_limit(self) -> bool {
        matches!(self, Self::ExternalAbort | Self::TimeoutReached | Self::ErrorThresholdExceeded | Self::MaxStepsReached)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn add(&mut self, input: u64, output: u64) {
        self.input += input;
        self.output += output;
        self.total += input + output;
    }
}

/// The RunEngine's transient, per-run progress snapshot (spec §3). Persisted
/// alongside the run to enable replay, but this crate only holds it
/// in-memory for the duration of `RunEngine::run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub current_step_index: u32,
    pub iteration_count: u32,
    pub token_usage: TokenUsage,
    pub error_count: u32,
    pub goal_satisfied: bool,
    pub artifact_produced: bool,
    pub was_aborted: bool,
    pub stop_reason: Option<StopReason>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            current_step_index: 0,
            iteration_count: 0,
            token_usage: TokenUsage::default(),
            error_count: 0,
            goal_satisfied: false,
            artifact_produced: false,
            was_aborted: false,
            stop_reason: None,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.start_time).num_milliseconds().max(0) as u64
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StopPolicyConfig {
    pub max_steps: u32,
    pub max_duration_ms: u64,
    pub max_errors: u32,
}

impl Default for StopPolicyConfig {
    fn default() -> Self {
        Self { max_steps: 50, max_duration_ms: 10 * 60 * 1000, max_errors: 5 }
    }
}

/// Pure stop-condition evaluation per spec §4.12 point 6: same state always
/// yields the same result, and priority order is fixed regardless of which
/// conditions happen to be true simultaneously.
pub fn evaluate(state: &ExecutionState, config: &StopPolicyConfig) -> Option<StopReason> {
    if state.was_aborted {
        return Some(StopReason::ExternalAbort);
    }
    if state.elapsed_ms() >= config.max_duration_ms {
        return Some(StopReason::TimeoutReached);
    }
    if state.error_count >= config.max_errors {
        return Some(StopReason::ErrorThresholdExceeded);
    }
    if state.goal_satisfied {
        return Some(StopReason::GoalSatisfied);
    }
    if state.artifact_produced {
        return Some(StopReason::ArtifactProduced);
    }
    if state.iteration_count >= config.max_steps {
        return Some(StopReason::MaxStepsReached);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ExecutionState {
        ExecutionState::new()
    }

    #[test]
    fn fresh_state_does_not_stop() {
        assert_eq!(evaluate(&state(), &StopPolicyConfig::default()), None);
    }

    #[test]
    fn external_abort_outranks_everything_else() {
        let mut s = state();
        s.was_aborted = true;
        s.goal_satisfied = true;
        s.error_count = 999;
        assert_eq!(evaluate(&s, &StopPolicyConfig::default()), Some(StopReason::ExternalAbort));
    }

    #[test]
    fn error_threshold_outranks_goal_satisfied() {
        let mut s = state();
        s.error_count = 5;
        s.goal_satisfied = true;
        let config = StopPolicyConfig { max_errors: 5, ..Default::default() };
        assert_eq!(evaluate(&s, &config), Some(StopReason::ErrorThresholdExceeded));
    }

    #[test]
    fn goal_satisfied_outranks_artifact_produced() {
        let mut s = state();
        s.goal_satisfied = true;
        s.artifact_produced = true;
        assert_eq!(evaluate(&s, &StopPolicyConfig::default()), Some(StopReason::GoalSatisfied));
    }

    #[test]
    fn max_steps_is_lowest_priority() {
        let mut s = state();
        s.iteration_count = 50;
        assert_eq!(evaluate(&s, &StopPolicyConfig::default()), Some(StopReason::MaxStepsReached));
    }

    #[test]
    fn hard_limit_classification() {
        assert!(StopReason::TimeoutReached.is_hard_limit());
        assert!(!StopReason::GoalSatisfied.is_hard_limit());
    }
}
