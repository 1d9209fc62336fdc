//! Composes planning, scheduling, and synthesis into a complete run under a
//! stop policy (spec §4.12). `RunEngine` depends only on the `Agent` port —
//! never a concrete agent implementation.

pub mod agent;
pub mod agent_task_executor;
pub mod run_engine;
pub mod stop_policy;

pub use agent::{Agent, AgentError, PlanContext, PlannedTask, SynthesisContext, TaskExecutionContext};
pub use agent_task_executor::AgentTaskExecutor;
pub use run_engine::{OrchestratorError, RunEngine, RunEngineInput, RunResult};
pub use stop_policy::{evaluate, ExecutionState, StopPolicyConfig, StopReason, TokenUsage};
