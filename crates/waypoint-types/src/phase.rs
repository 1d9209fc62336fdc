use serde::{Deserialize, Serialize};

/// Where a cost event or memory event originated in a run's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planning,
    Task,
    Synthesis,
    Memory,
}
