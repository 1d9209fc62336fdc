use std::collections::BTreeMap;
use std::sync::Arc;

use waypoint_runtime::Task;

use crate::error::ExecutorError;
use crate::executor_trait::Executor;
use crate::types::ExecutorKind;

#[derive(Debug, Clone)]
pub struct ExecutorSelection {
    pub kind: ExecutorKind,
    pub confidence: f64,
}

const GPU_OR_LONG_RUNNING_PREFERENCE: [ExecutorKind; 3] = [ExecutorKind::Cloud, ExecutorKind::Docker, ExecutorKind::Local];
const DEFAULT_PREFERENCE: [ExecutorKind; 3] = [ExecutorKind::Docker, ExecutorKind::Cloud, ExecutorKind::Local];

const LONG_RUNNING_THRESHOLD_MS: u64 = 300_000;

/// Selects among registered `Executor`s per spec §4.11's routing rules. An
/// empty registry is rejected at construction, since a router with nothing
/// to route to can never satisfy a caller.
pub struct ExecutorRouter {
    registry: BTreeMap<ExecutorKind, Arc<dyn Executor>>,
}

impl ExecutorRouter {
    pub fn new(executors: Vec<Arc<dyn Executor>>) -> Result<Self, ExecutorError> {
        if executors.is_empty() {
            return Err(ExecutorError::EmptyRegistry);
        }
        let registry = executors.into_iter().map(|e| (e.kind(), e)).collect();
        Ok(Self { registry })
    }

    fn first_available(&self, preference: &[ExecutorKind]) -> (ExecutorKind, Arc<dyn Executor>) {
        for kind in preference {
            if let Some(executor) = self.registry.get(kind) {
                return (*kind, executor.clone());
            }
        }
        self.registry
            .iter()
            .next()
            .map(|(kind, executor)| (*kind, executor.clone()))
            .expect("registry is non-empty by construction")
    }

    pub fn select(&self, task: &Task) -> (Arc<dyn Executor>, ExecutorSelection) {
        if let Some(hint) = &task.input.executor_hint {
            if let Some(kind) = ExecutorKind::from_str_loose(hint) {
                if let Some(executor) = self.registry.get(&kind) {
                    return (executor.clone(), ExecutorSelection { kind, confidence: 1.0 });
                }
            }
        }

        if task.input.requires_gpu {
            let (kind, executor) = self.first_available(&GPU_OR_LONG_RUNNING_PREFERENCE);
            return (executor, ExecutorSelection { kind, confidence: 0.8 });
        }

        if task.input.estimated_duration_ms.unwrap_or(0) > LONG_RUNNING_THRESHOLD_MS {
            let (kind, executor) = self.first_available(&GPU_OR_LONG_RUNNING_PREFERENCE);
            return (executor, ExecutorSelection { kind, confidence: 0.7 });
        }

        let (kind, executor) = self.first_available(&DEFAULT_PREFERENCE);
        (executor, ExecutorSelection { kind, confidence: 0.5 })
    }
}
