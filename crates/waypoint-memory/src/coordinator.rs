use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use waypoint_budget::TokenEstimator;
use waypoint_providers::{ChatMessage, GatewayCallContext, LLMGateway};
use waypoint_types::{ModelSpec, Phase, RunId, SessionId, TaskId};

use crate::extractor::MemoryExtractor;
use crate::policy::{MemoryError, MemoryPolicy};
use crate::repository::{MemoryRepository, SessionMemoryStore};
use crate::types::{MemoryClassification, MemoryContext, MemoryEvent, MemoryRetrievalMeta, MemoryScope};

pub struct ExtractAndPersistRequest {
    pub run_id: RunId,
    pub session_id: SessionId,
    pub task_id: Option<TaskId>,
    pub source: Phase,
    pub content: String,
}

pub struct RetrieveContextRequest {
    pub run_id: RunId,
    pub session_id: SessionId,
    pub prompt: String,
    pub token_budget: usize,
}

/// Façade over `MemoryExtractor`, `MemoryPolicy`, `MemoryRepository`, and
/// `SessionMemoryStore`: callers never touch the collaborators directly.
/// Compaction is the one operation
/// that reaches outside this module's own storage, since it needs an LLM
/// call to produce a summary.
pub struct MemoryCoordinator {
    run_repo: Arc<MemoryRepository>,
    session_store: Arc<SessionMemoryStore>,
    token_estimator: TokenEstimator,
    max_events_per_scope: usize,
    compaction_threshold: usize,
    pinned_fraction: f64,
    llm_gateway: Arc<LLMGateway>,
    compaction_model: ModelSpec,
}

impl MemoryCoordinator {
    pub fn new(
        run_repo: Arc<MemoryRepository>,
        session_store: Arc<SessionMemoryStore>,
        token_estimator: TokenEstimator,
        max_events_per_scope: usize,
        compaction_threshold: usize,
        pinned_fraction: f64,
        llm_gateway: Arc<LLMGateway>,
        compaction_model: ModelSpec,
    ) -> Self {
        Self {
            run_repo,
            session_store,
            token_estimator,
            max_events_per_scope,
            compaction_threshold,
            pinned_fraction,
            llm_gateway,
            compaction_model,
        }
    }

    pub async fn extract_and_persist(
        &self,
        request: ExtractAndPersistRequest,
    ) -> Result<Vec<MemoryEvent>, MemoryError> {
        let mut persisted = Vec::new();
        for item in MemoryExtractor::extract(&request.content) {
            if MemoryPolicy::validate(&item.content).is_err() {
                tracing::warn!(run_id = %request.run_id, "dropped an extracted memory item that failed validation");
                continue;
            }
            let redacted = MemoryPolicy::redact(&item.content);
            let classification = MemoryPolicy::classify(&item.content, &redacted);

            let event = MemoryEvent {
                event_id: waypoint_types::EventId::new().to_string(),
                scope: item.scope,
                run_id: request.run_id.clone(),
                session_id: request.session_id.clone(),
                task_id: request.task_id.clone(),
                kind: item.kind,
                source: request.source,
                content: redacted,
                confidence: item.confidence,
                created_at: Utc::now(),
                idempotency_key: content_fingerprint(&request.run_id, &item.content),
                classification,
            };

            let stored = match event.scope {
                MemoryScope::Run => self.run_repo.append(event.clone()).await?,
                MemoryScope::Session => self.session_store.append(event.clone()).await?,
            };
            if stored {
                persisted.push(event);
            }
        }
        Ok(persisted)
    }

    pub async fn retrieve_context(
        &self,
        request: RetrieveContextRequest,
    ) -> Result<(MemoryContext, MemoryRetrievalMeta), MemoryError> {
        let run_events = self.run_repo.get_events(&request.run_id).await?;
        let session_events = self.session_store.get_events(&request.session_id).await?;
        let run_event_count = run_events.len();
        let session_event_count = session_events.len();

        let prompt_words = word_set(&request.prompt);
        let mut scored: Vec<(f64, MemoryEvent)> = run_events
            .into_iter()
            .chain(session_events)
            .map(|event| {
                let score = lexical_overlap(&prompt_words, &event.content) * 5.0
                    + event.confidence * 2.0
                    + recency_bucket(event.created_at);
                (score, event)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let score_min = scored.last().map(|(s, _)| *s).unwrap_or(0.0);
        let score_max = scored.first().map(|(s, _)| *s).unwrap_or(0.0);

        let pinned_budget = ((request.token_budget as f64) * self.pinned_fraction).floor() as usize;
        let mut pinned_tokens = 0usize;
        let mut items = Vec::new();
        let mut total_tokens = 0usize;

        for (_, event) in scored {
            let tokens = self.token_estimator.estimate(&event.content);
            let is_high_confidence = event.confidence >= 0.85;
            if is_high_confidence && pinned_tokens + tokens > pinned_budget && pinned_budget > 0 {
                continue;
            }
            if total_tokens + tokens > request.token_budget {
                continue;
            }
            total_tokens += tokens;
            if is_high_confidence {
                pinned_tokens += tokens;
            }
            items.push(event);
        }

        let context = MemoryContext { items, total_tokens };
        let meta = MemoryRetrievalMeta {
            run_event_count,
            session_event_count,
            score_min,
            score_max,
        };
        Ok((context, meta))
    }

    pub fn should_compact(&self, event_count: usize) -> bool {
        event_count >= self.max_events_per_scope || event_count >= self.compaction_threshold
    }

    pub async fn compact_run(&self, run_id: &RunId, session_id: &SessionId) -> Result<Option<MemoryEvent>, MemoryError> {
        let events = self.run_repo.get_events(run_id).await?;
        if !self.should_compact(events.len()) {
            return Ok(None);
        }
        let summary_content = self.summarize(session_id, run_id, None, &events).await?;
        for event in &events {
            self.run_repo.delete_event(run_id, &event.event_id).await?;
        }
        let summary = MemoryEvent {
            event_id: waypoint_types::EventId::new().to_string(),
            scope: MemoryScope::Run,
            run_id: run_id.clone(),
            session_id: session_id.clone(),
            task_id: None,
            kind: "summary".to_string(),
            source: Phase::Memory,
            content: summary_content,
            confidence: 0.9,
            created_at: Utc::now(),
            idempotency_key: format!("compaction:run:{run_id}"),
            classification: MemoryClassification::Internal,
        };
        self.run_repo.append(summary.clone()).await?;
        Ok(Some(summary))
    }

    pub async fn compact_session(&self, session_id: &SessionId, run_id: &RunId) -> Result<Option<MemoryEvent>, MemoryError> {
        let events = self.session_store.get_events(session_id).await?;
        if !self.should_compact(events.len()) {
            return Ok(None);
        }
        let summary_content = self.summarize(session_id, run_id, None, &events).await?;
        for event in &events {
            self.session_store.delete_event(session_id, &event.event_id).await?;
        }
        let summary = MemoryEvent {
            event_id: waypoint_types::EventId::new().to_string(),
            scope: MemoryScope::Session,
            run_id: run_id.clone(),
            session_id: session_id.clone(),
            task_id: None,
            kind: "summary".to_string(),
            source: Phase::Memory,
            content: summary_content,
            confidence: 0.9,
            created_at: Utc::now(),
            idempotency_key: format!("compaction:session:{session_id}"),
            classification: MemoryClassification::Internal,
        };
        self.session_store.append(summary.clone()).await?;
        Ok(Some(summary))
    }

    async fn summarize(
        &self,
        session_id: &SessionId,
        run_id: &RunId,
        task_id: Option<TaskId>,
        events: &[MemoryEvent],
    ) -> Result<String, MemoryError> {
        let bullet_list: String = events
            .iter()
            .map(|e| format!("- ({}) {}", e.kind, e.content))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: format!(
                "Summarize the following memory entries into a single compact paragraph, \
                 preserving every decision and constraint:\n{bullet_list}"
            ),
        }];
        let ctx = GatewayCallContext {
            run_id: run_id.clone(),
            session_id: session_id.clone(),
            task_id,
            agent_type: "memory-compactor".to_string(),
            phase: Phase::Memory,
            idempotency_key: format!("compaction:{run_id}:{}", events.len()),
        };
        let response = self
            .llm_gateway
            .generate_text(
                ctx,
                Some(self.compaction_model.clone()),
                None,
                messages,
                None,
                tokio_util::sync::CancellationToken::new(),
            )
            .await?;
        Ok(response.text)
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

fn lexical_overlap(prompt_words: &HashSet<String>, content: &str) -> f64 {
    if prompt_words.is_empty() {
        return 0.0;
    }
    let content_words = word_set(content);
    if content_words.is_empty() {
        return 0.0;
    }
    let shared = prompt_words.intersection(&content_words).count();
    let union = prompt_words.union(&content_words).count();
    if union == 0 {
        0.0
    } else {
        shared as f64 / union as f64
    }
}

fn recency_bucket(created_at: DateTime<Utc>) -> f64 {
    let age = Utc::now().signed_duration_since(created_at);
    if age <= chrono::Duration::hours(1) {
        1.0
    } else if age <= chrono::Duration::days(1) {
        0.8
    } else if age <= chrono::Duration::weeks(1) {
        0.6
    } else if age <= chrono::Duration::days(30) {
        0.4
    } else {
        0.2
    }
}

fn content_fingerprint(run_id: &RunId, content: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{run_id}:{:x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recency_bucket_descends_with_age() {
        let now = Utc::now();
        assert_eq!(recency_bucket(now), 1.0);
        assert_eq!(recency_bucket(now - chrono::Duration::days(2)), 0.6);
        assert_eq!(recency_bucket(now - chrono::Duration::days(60)), 0.2);
    }

    #[test]
    fn lexical_overlap_is_zero_for_disjoint_vocabularies() {
        let prompt = word_set("deploy the service");
        assert_eq!(lexical_overlap(&prompt, "bananas are yellow"), 0.0);
    }

    #[test]
    fn lexical_overlap_rewards_shared_words() {
        let prompt = word_set("deploy the payment service");
        let overlap_a = lexical_overlap(&prompt, "we deployed the payment service last week");
        let overlap_b = lexical_overlap(&prompt, "unrelated content entirely");
        assert!(overlap_a > overlap_b);
    }

    #[test]
    fn content_fingerprint_is_stable_for_same_input() {
        let run_id = RunId::from("run-a");
        assert_eq!(
            content_fingerprint(&run_id, "same content"),
            content_fingerprint(&run_id, "same content")
        );
    }
}
