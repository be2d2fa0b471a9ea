// src/state.rs
// Wires the coordination services together and owns the session-close
// transition: snapshot under the session mutex, summarize and persist
// outside it, discard ephemeral state only once the write succeeded.

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::CONFIG;
use crate::error::CoordError;
use crate::router::{CapabilityPolicy, CoordinationRouter};
use crate::session::SessionRegistry;
use crate::summarizer::{
    Classifier, KeywordClassifier, LongTermStore, PersistenceBridge, SessionSummary,
    SqliteLongTermStore, Summarizer,
};

#[derive(Clone)]
pub struct CoordState {
    pub registry: Arc<SessionRegistry>,
    pub router: Arc<CoordinationRouter>,
    pub summarizer: Arc<Summarizer>,
    pub bridge: Arc<PersistenceBridge>,
}

impl CoordState {
    /// Close a session end to end. The status flip and snapshot happen under
    /// the session mutex inside `begin_close`, which also marks the close as
    /// in flight: a concurrent close gets `SessionClosed` instead of a second
    /// snapshot. Everything slow runs on the snapshot afterwards. On
    /// persistence failure the in-flight marker is cleared and the session
    /// stays degraded-closed with its history retained, so calling this again
    /// retries the summary without double-writing earlier successes.
    pub async fn close_session(
        &self,
        user_id: &str,
        session_name: &str,
    ) -> Result<SessionSummary, CoordError> {
        let snapshot = self.registry.begin_close(user_id, session_name).await?;
        let summary = self.summarizer.summarize(&snapshot).await;

        match self.bridge.persist(&summary).await {
            Ok(report) => {
                self.registry.finish_close(user_id, session_name).await;
                info!(
                    session = session_name,
                    records = report.records_written,
                    "session closed"
                );
                Ok(summary)
            }
            Err(e) => {
                self.registry.abort_close(user_id, session_name).await;
                warn!(
                    session = session_name,
                    "session close degraded, ephemeral state retained for retry"
                );
                Err(e)
            }
        }
    }
}

/// Assemble the default production state: sqlite-backed registry and
/// long-term store, keyword classifier.
pub async fn create_coord_state(pool: SqlitePool) -> anyhow::Result<CoordState> {
    let store = Arc::new(SqliteLongTermStore::new(pool.clone()).await?);
    create_coord_state_with(pool, Arc::new(KeywordClassifier), store).await
}

/// Assembly with explicit classifier and long-term store, for embedding
/// hosts and tests that plug their own collaborators in.
pub async fn create_coord_state_with(
    pool: SqlitePool,
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn LongTermStore>,
) -> anyhow::Result<CoordState> {
    let registry = Arc::new(SessionRegistry::new(pool).await?);
    let router = Arc::new(CoordinationRouter::new(
        registry.clone(),
        CapabilityPolicy::from_config(),
    ));
    let summarizer = Arc::new(Summarizer::new(
        classifier,
        Duration::from_secs(CONFIG.classify_timeout_seconds),
    ));
    let bridge = Arc::new(PersistenceBridge::new(
        store,
        Duration::from_secs(CONFIG.persist_timeout_seconds),
    ));

    Ok(CoordState {
        registry,
        router,
        summarizer,
        bridge,
    })
}
