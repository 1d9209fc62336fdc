//! Run/Task entities, their durable repositories, and the `StateManager`
//! transactional façade (spec §3, §4.6, §4.7), following a pure
//! event-in/state-out reducer style adapted to the run/task vocabulary.

pub mod entities;
pub mod error;
pub mod repository;
pub mod state_manager;

pub use entities::{NewTaskParams, Run, RunInput, RunOutput, Task, TaskInput, DEFAULT_MAX_RETRIES};
pub use error::RuntimeError;
pub use repository::{RunRepository, TaskRepository};
pub use state_manager::StateManager;
