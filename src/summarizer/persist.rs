// src/summarizer/persist.rs
// Bridge between session summaries and the external long-term memory store.
// Only `write` exists on the store seam: retrieval belongs to the
// surrounding system, not this crate.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::SessionSummary;
use crate::error::CoordError;

/// Metadata attached to every record so downstream consumers can tell
/// coordination summaries apart from user-authored memories.
#[derive(Debug, Clone)]
pub struct StoreMetadata {
    pub session_name: String,
    pub category: String,
    pub provenance: String,
}

/// The external long-term memory interface. Implementations own the records
/// once written; the session has no further relationship to them.
#[async_trait]
pub trait LongTermStore: Send + Sync {
    async fn write(
        &self,
        records: &[String],
        user_id: &str,
        metadata: &StoreMetadata,
    ) -> anyhow::Result<usize>;
}

/// Default store backed by the local sqlite database.
pub struct SqliteLongTermStore {
    pool: SqlitePool,
}

impl SqliteLongTermStore {
    pub async fn new(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                category TEXT NOT NULL,
                session_name TEXT NOT NULL,
                provenance TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn count_for_session(&self, user_id: &str, session_name: &str) -> anyhow::Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM memories WHERE user_id = ? AND session_name = ?",
        )
        .bind(user_id)
        .bind(session_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}

#[async_trait]
impl LongTermStore for SqliteLongTermStore {
    async fn write(
        &self,
        records: &[String],
        user_id: &str,
        metadata: &StoreMetadata,
    ) -> anyhow::Result<usize> {
        let mut written = 0;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO memories (id, user_id, content, category, session_name, provenance)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(record)
            .bind(&metadata.category)
            .bind(&metadata.session_name)
            .bind(&metadata.provenance)
            .execute(&self.pool)
            .await?;
            written += 1;
        }
        Ok(written)
    }
}

#[derive(Debug, Clone)]
pub struct PersistReport {
    pub records_written: usize,
}

pub struct PersistenceBridge {
    store: Arc<dyn LongTermStore>,
    persist_timeout: Duration,
}

impl PersistenceBridge {
    pub fn new(store: Arc<dyn LongTermStore>, persist_timeout: Duration) -> Self {
        Self {
            store,
            persist_timeout,
        }
    }

    /// Write one short natural-language record per non-empty bucket, plus the
    /// modified-files record. Time-bounded; a failure leaves the session in
    /// the degraded-closed state and surfaces only a generic notice.
    pub async fn persist(&self, summary: &SessionSummary) -> Result<PersistReport, CoordError> {
        let batches = build_records(summary);
        if batches.iter().all(|(_, records)| records.is_empty()) {
            info!(session = summary.session_name.as_str(), "nothing durable to persist");
            return Ok(PersistReport { records_written: 0 });
        }

        let mut written = 0;
        for (category, records) in batches {
            if records.is_empty() {
                continue;
            }
            let metadata = StoreMetadata {
                session_name: summary.session_name.clone(),
                category: category.to_string(),
                provenance: "auto-generated".to_string(),
            };
            let result = tokio::time::timeout(
                self.persist_timeout,
                self.store.write(&records, &summary.user_id, &metadata),
            )
            .await;
            match result {
                Ok(Ok(n)) => written += n,
                Ok(Err(e)) => {
                    warn!("long-term store write failed: {}", e);
                    return Err(CoordError::Persistence(format!(
                        "store write failed for '{}' records",
                        category
                    )));
                }
                Err(_) => {
                    warn!("long-term store write timed out");
                    return Err(CoordError::Persistence("store write timed out".to_string()));
                }
            }
        }

        info!(
            session = summary.session_name.as_str(),
            records = written,
            "session summary persisted"
        );
        Ok(PersistReport {
            records_written: written,
        })
    }
}

/// Convert summary buckets into (category, records) batches. Deterministic:
/// a retried close writes the exact same records.
fn build_records(summary: &SessionSummary) -> Vec<(&'static str, Vec<String>)> {
    let session = &summary.session_name;
    let mut batches = Vec::new();

    batches.push((
        "decision",
        summary
            .decisions
            .iter()
            .map(|d| format!("Decision in session '{}': {}", session, d))
            .collect(),
    ));
    batches.push((
        "learning",
        summary
            .learnings
            .iter()
            .map(|l| format!("Learning from session '{}': {}", session, l))
            .collect(),
    ));
    batches.push((
        "collaboration",
        summary
            .collaboration_patterns
            .iter()
            .map(|c| format!("Collaboration in session '{}': {}", session, c))
            .collect(),
    ));
    batches.push((
        "next_step",
        summary
            .next_steps
            .iter()
            .map(|n| format!("Open next step from session '{}': {}", session, n))
            .collect(),
    ));

    let files = if summary.modified_files.is_empty() {
        Vec::new()
    } else {
        vec![format!(
            "Session '{}' modified {} file(s): {}",
            session,
            summary.modified_files.len(),
            summary.modified_files.join(", ")
        )]
    };
    batches.push(("modified_files", files));

    batches
}
