// src/summarizer/mod.rs
// Folds a closed session's ephemeral history into a compact, durable-worthy
// summary. Classification is pluggable (an external model can sit behind the
// Classifier trait); the deterministic keyword pass is the fallback, so
// summarization can never hard-fail a session close.

pub mod persist;

pub use persist::{LongTermStore, PersistReport, PersistenceBridge, SqliteLongTermStore, StoreMetadata};

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::session::{AgentMessage, ChangeEvent, MessageKind, SessionSnapshot};

/// Durable-worthy facts extracted from a session's history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FactBuckets {
    pub decisions: Vec<String>,
    pub learnings: Vec<String>,
    pub collaboration_patterns: Vec<String>,
    pub next_steps: Vec<String>,
}

/// The transient artifact produced at session close. Only its persisted
/// output survives into long-term storage.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub user_id: String,
    pub session_name: String,
    pub decisions: Vec<String>,
    pub learnings: Vec<String>,
    pub collaboration_patterns: Vec<String>,
    pub next_steps: Vec<String>,
    pub modified_files: Vec<String>,
    pub event_count: usize,
}

impl SessionSummary {
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
            && self.learnings.is_empty()
            && self.collaboration_patterns.is_empty()
            && self.next_steps.is_empty()
            && self.modified_files.is_empty()
    }
}

/// Pluggable classification step. Implementations may call out to an
/// external model; failures fall back to the keyword heuristic.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        changes: &[ChangeEvent],
        messages: &[AgentMessage],
    ) -> anyhow::Result<FactBuckets>;
}

/// Deterministic keyword/category classifier. Always available, never fails.
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn classify_sync(changes: &[ChangeEvent], messages: &[AgentMessage]) -> FactBuckets {
        let mut buckets = FactBuckets::default();

        for change in changes {
            if is_operational(&change.summary) {
                continue;
            }
            let text = &change.summary;
            let lower = text.to_lowercase();
            if contains_any(&lower, &["decided", "chose", "settled on", "going with", "switched to"]) {
                buckets.decisions.push(attributed(&change.agent_id, text));
            } else if contains_any(&lower, &["learned", "discovered", "turns out", "found that", "realized"]) {
                buckets.learnings.push(attributed(&change.agent_id, text));
            } else if change.structural {
                // Structural changes are decisions about the codebase shape.
                buckets.decisions.push(attributed(&change.agent_id, text));
            }
        }

        for message in messages {
            if is_operational(&message.body) {
                continue;
            }
            let text = &message.body;
            let lower = text.to_lowercase();
            match message.kind {
                MessageKind::Question | MessageKind::Coordination => {
                    buckets
                        .collaboration_patterns
                        .push(attributed(&message.from, text));
                }
                _ => {
                    if contains_any(&lower, &["decided", "chose", "settled on", "going with"]) {
                        buckets.decisions.push(attributed(&message.from, text));
                    } else if contains_any(&lower, &["learned", "discovered", "turns out", "found that"]) {
                        buckets.learnings.push(attributed(&message.from, text));
                    } else if contains_any(&lower, &["todo", "next step", "remaining", "follow up", "blocked on"]) {
                        buckets.next_steps.push(attributed(&message.from, text));
                    }
                }
            }
        }

        buckets
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(
        &self,
        changes: &[ChangeEvent],
        messages: &[AgentMessage],
    ) -> anyhow::Result<FactBuckets> {
        Ok(Self::classify_sync(changes, messages))
    }
}

/// Operational noise (lock chatter, heartbeats, status pings) carries no
/// durable value and is discarded before bucketing.
fn is_operational(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    lower.is_empty()
        || contains_any(
            &lower,
            &["lock acquired", "lock released", "heartbeat", "ping", "still working", "status check"],
        )
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn attributed(agent_id: &str, text: &str) -> String {
    format!("{}: {}", agent_id, text.trim())
}

pub struct Summarizer {
    classifier: Arc<dyn Classifier>,
    classify_timeout: Duration,
}

impl Summarizer {
    pub fn new(classifier: Arc<dyn Classifier>, classify_timeout: Duration) -> Self {
        Self {
            classifier,
            classify_timeout,
        }
    }

    /// Summarize a session snapshot. The classifier call is time-bounded and
    /// runs on an immutable snapshot, never under the session mutex. Any
    /// classifier failure degrades to the keyword pass.
    pub async fn summarize(&self, snapshot: &SessionSnapshot) -> SessionSummary {
        let buckets = match tokio::time::timeout(
            self.classify_timeout,
            self.classifier.classify(&snapshot.changes, &snapshot.messages),
        )
        .await
        {
            Ok(Ok(buckets)) => buckets,
            Ok(Err(e)) => {
                warn!("classifier failed, using keyword fallback: {}", e);
                KeywordClassifier::classify_sync(&snapshot.changes, &snapshot.messages)
            }
            Err(_) => {
                warn!("classifier timed out, using keyword fallback");
                KeywordClassifier::classify_sync(&snapshot.changes, &snapshot.messages)
            }
        };

        // Sorted dedup so retried closes produce identical records.
        let modified_files: BTreeSet<String> = snapshot
            .changes
            .iter()
            .flat_map(|c| c.paths.iter().cloned())
            .collect();

        let summary = SessionSummary {
            user_id: snapshot.user_id.clone(),
            session_name: snapshot.session_name.clone(),
            decisions: buckets.decisions,
            learnings: buckets.learnings,
            collaboration_patterns: buckets.collaboration_patterns,
            next_steps: buckets.next_steps,
            modified_files: modified_files.into_iter().collect(),
            event_count: snapshot.changes.len() + snapshot.messages.len(),
        };
        debug!(
            session = summary.session_name.as_str(),
            decisions = summary.decisions.len(),
            files = summary.modified_files.len(),
            "session summarized"
        );
        summary
    }
}
