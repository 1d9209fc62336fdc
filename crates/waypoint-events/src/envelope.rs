use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use waypoint_types::{EventId, RunId, SessionId};

pub const ENVELOPE_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Brain,
    Muscle,
    Web,
    Cli,
    Desktop,
}

/// The canonical wire shape every published event takes, per spec §4.10.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub version: u16,
    pub event_id: EventId,
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(
        run_id: RunId,
        session_id: Option<SessionId>,
        source: EventSource,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            event_id: EventId::new(),
            run_id,
            session_id,
            timestamp: Utc::now(),
            source,
            event_type: event_type.into(),
            payload,
        }
    }
}
