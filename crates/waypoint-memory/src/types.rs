use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waypoint_types::{Phase, RunId, SessionId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    Run,
    Session,
}

/// A passthrough annotation: it tags content for downstream consumers but
/// gates nothing in this spec (memory has no access-control axis beyond
/// run/session scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryClassification {
    Internal,
    Restricted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub event_id: String,
    pub scope: MemoryScope,
    pub run_id: RunId,
    pub session_id: SessionId,
    pub task_id: Option<TaskId>,
    pub kind: String,
    pub source: Phase,
    pub content: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub idempotency_key: String,
    pub classification: MemoryClassification,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemoryEvent {
    pub event: MemoryEvent,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryContext {
    pub items: Vec<MemoryEvent>,
    pub total_tokens: usize,
}

impl MemoryContext {
    /// Renders the retrieved events as an XML-ish tagged block suitable
    /// for splicing into a prompt.
    pub fn format_for_injection(&self) -> String {
        let mut out = String::from("<memory>\n");
        for item in &self.items {
            out.push_str(&format!(
                "  <event kind=\"{}\" confidence=\"{:.2}\">{}</event>\n",
                item.kind, item.confidence, item.content
            ));
        }
        out.push_str("</memory>");
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryRetrievalMeta {
    pub run_event_count: usize,
    pub session_event_count: usize,
    pub score_min: f64,
    pub score_max: f64,
}
