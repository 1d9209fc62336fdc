//! Sandbox/cloud execution lifecycle and routing (spec §4.11). The
//! `Executor` trait is a Template Method: timeout and duration tracking
//! live in the default `execute_task`, concrete kinds only implement
//! `execute_impl`. `ExecutorRouter` selects among registered executors by
//! hint, GPU requirement, and estimated duration. `RoutedTaskExecutor`
//! adapts the router into `waypoint-scheduler`'s narrower `TaskExecutor`
//! port.

pub mod adapter;
pub mod cloud;
pub mod docker;
pub mod error;
pub mod executor_trait;
pub mod local;
pub mod router;
mod shell;
pub mod types;

pub use adapter::RoutedTaskExecutor;
pub use cloud::CloudExecutor;
pub use docker::DockerExecutor;
pub use error::ExecutorError;
pub use executor_trait::Executor;
pub use local::LocalExecutor;
pub use router::{ExecutorRouter, ExecutorSelection};
pub use types::{EnvironmentConfig, ExecutionEnvironment, ExecutionOutcome, ExecutorKind};
