// tests/coordination_test.rs
// End-to-end coverage of the coordination engine through the router:
// mutual exclusion, expiry liveness, bounded logs, self-exclusion, close
// finality, and the degraded-close retry path.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use relay::error::CoordError;
use relay::router::{CoordinationOp, OpResult};
use relay::session::{AgentMessage, ChangeEvent, LockMode, MessageKind};
use relay::state::{create_coord_state, create_coord_state_with, CoordState};
use relay::summarizer::{
    Classifier, FactBuckets, KeywordClassifier, LongTermStore, SqliteLongTermStore, StoreMetadata,
};

const CLIENT: &str = "claude-code";

/// Set up a clean, isolated coordination state on in-memory sqlite.
async fn setup() -> Arc<CoordState> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite pool");
    Arc::new(create_coord_state(pool).await.expect("coord state"))
}

fn agent(session: &str, agent: &str) -> String {
    format!("peter__session__{}__{}", session, agent)
}

async fn claim(
    state: &CoordState,
    agent_id: &str,
    paths: &[&str],
    mode: LockMode,
) -> Result<OpResult, CoordError> {
    state
        .router
        .handle(
            agent_id,
            CLIENT,
            None,
            CoordinationOp::ClaimFiles {
                paths: paths.iter().map(|s| s.to_string()).collect(),
                mode,
                ttl_seconds: None,
            },
        )
        .await
}

async fn release(
    state: &CoordState,
    agent_id: &str,
    paths: &[&str],
    summary: &str,
) -> Result<OpResult, CoordError> {
    state
        .router
        .handle(
            agent_id,
            CLIENT,
            None,
            CoordinationOp::ReleaseFiles {
                paths: paths.iter().map(|s| s.to_string()).collect(),
                summary: summary.to_string(),
                structural: false,
            },
        )
        .await
}

#[tokio::test]
async fn test_write_claim_conflicts_with_other_agent() {
    let state = setup().await;
    let planner = agent("auth", "planner");
    let impl_a = agent("auth", "impl_a");

    let granted = claim(&state, &planner, &["a.py"], LockMode::Write).await.unwrap();
    assert!(matches!(granted, OpResult::Claimed(_)));

    match claim(&state, &impl_a, &["a.py"], LockMode::Write).await {
        Err(CoordError::Conflict(conflicts)) => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].holder, "planner");
            assert_eq!(conflicts[0].mode, LockMode::Write);
            // Default TTL is 30 minutes; the hint should be close to it.
            assert!(conflicts[0].expires_in_seconds > 1700);
            assert!(conflicts[0].expires_in_seconds <= 1800);
        }
        other => panic!("expected conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_read_claims_coexist() {
    let state = setup().await;

    assert!(matches!(
        claim(&state, &agent("auth", "planner"), &["a.py"], LockMode::Read).await,
        Ok(OpResult::Claimed(_))
    ));
    assert!(matches!(
        claim(&state, &agent("auth", "impl_a"), &["a.py"], LockMode::Read).await,
        Ok(OpResult::Claimed(_))
    ));
}

#[tokio::test]
async fn test_release_then_reclaim_by_other_agent() {
    let state = setup().await;
    let planner = agent("auth", "planner");
    let impl_a = agent("auth", "impl_a");

    claim(&state, &planner, &["a.py"], LockMode::Write).await.unwrap();
    release(&state, &planner, &["a.py"], "refactored auth entry points").await.unwrap();

    assert!(matches!(
        claim(&state, &impl_a, &["a.py"], LockMode::Write).await,
        Ok(OpResult::Claimed(_))
    ));
}

#[tokio::test]
async fn test_all_or_nothing_claim_over_multiple_paths() {
    let state = setup().await;
    let planner = agent("auth", "planner");
    let impl_a = agent("auth", "impl_a");

    claim(&state, &planner, &["b.py"], LockMode::Write).await.unwrap();

    // b.py conflicts, so a.py must not be granted either.
    assert!(matches!(
        claim(&state, &impl_a, &["a.py", "b.py"], LockMode::Write).await,
        Err(CoordError::Conflict(_))
    ));

    // planner can still take a.py, proving the failed claim left nothing.
    assert!(matches!(
        claim(&state, &planner, &["a.py"], LockMode::Write).await,
        Ok(OpResult::Claimed(_))
    ));
}

#[tokio::test]
async fn test_expired_lock_is_claimable() {
    let state = setup().await;
    let planner = agent("auth", "planner");
    let impl_a = agent("auth", "impl_a");

    // Claim with a zero TTL so the lock is already past expiry.
    state
        .router
        .handle(
            &planner,
            CLIENT,
            None,
            CoordinationOp::ClaimFiles {
                paths: vec!["a.py".to_string()],
                mode: LockMode::Write,
                ttl_seconds: Some(0),
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    match claim(&state, &impl_a, &["a.py"], LockMode::Write).await {
        Ok(OpResult::Claimed(locks)) => assert_eq!(locks[0].holder, "impl_a"),
        other => panic!("expected grant after expiry, got {:?}", other),
    }
}

#[tokio::test]
async fn test_release_unheld_path_is_noop_success() {
    let state = setup().await;
    let impl_a = agent("auth", "impl_a");

    match release(&state, &impl_a, &["never-claimed.py"], "").await.unwrap() {
        OpResult::Released { released } => assert_eq!(released, 0),
        other => panic!("expected release result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_broadcast_message_excludes_sender() {
    let state = setup().await;
    let planner = agent("auth", "planner");
    let impl_a = agent("auth", "impl_a");

    state
        .router
        .handle(
            &impl_a,
            CLIENT,
            None,
            CoordinationOp::BroadcastMessage {
                body: "done with auth".to_string(),
                kind: MessageKind::Info,
                to: None,
            },
        )
        .await
        .unwrap();

    let for_planner = state
        .router
        .handle(&planner, CLIENT, None, CoordinationOp::GetAgentMessages { limit: 10 })
        .await
        .unwrap();
    match for_planner {
        OpResult::Messages(messages) => {
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].body, "done with auth");
            assert_eq!(messages[0].from, "impl_a");
        }
        other => panic!("expected messages, got {:?}", other),
    }

    // The sender never sees its own echo.
    let for_sender = state
        .router
        .handle(&impl_a, CLIENT, None, CoordinationOp::GetAgentMessages { limit: 10 })
        .await
        .unwrap();
    match for_sender {
        OpResult::Messages(messages) => assert!(messages.is_empty()),
        other => panic!("expected messages, got {:?}", other),
    }
}

#[tokio::test]
async fn test_change_log_bounded_at_capacity() {
    let state = setup().await;
    let impl_a = agent("auth", "impl_a");
    let planner = agent("auth", "planner");

    // 150 announcements against a default capacity of 100.
    for i in 0..150 {
        let path = format!("f{}.rs", i);
        release(&state, &impl_a, &[path.as_str()], &format!("edit {}", i))
            .await
            .unwrap();
    }

    let synced = state
        .router
        .handle(
            &planner,
            CLIENT,
            None,
            CoordinationOp::SyncCodebase { since_minutes: 100_000 },
        )
        .await
        .unwrap();
    match synced {
        OpResult::Changes(changes) => {
            assert_eq!(changes.len(), 100);
            // Newest first, and the oldest fifty were the ones evicted.
            assert_eq!(changes[0].summary, "edit 149");
            assert_eq!(changes[99].summary, "edit 50");
        }
        other => panic!("expected changes, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sessions_do_not_share_state() {
    let state = setup().await;

    claim(&state, &agent("auth", "planner"), &["a.py"], LockMode::Write)
        .await
        .unwrap();

    // The same path in a different session is free.
    assert!(matches!(
        claim(&state, &agent("billing", "impl_a"), &["a.py"], LockMode::Write).await,
        Ok(OpResult::Claimed(_))
    ));
}

#[tokio::test]
async fn test_close_finality() {
    let state = setup().await;
    let planner = agent("auth", "planner");

    claim(&state, &planner, &["a.py"], LockMode::Write).await.unwrap();
    release(&state, &planner, &["a.py"], "decided to use argon2 here").await.unwrap();

    let summary = state.close_session("peter", "auth").await.unwrap();
    assert_eq!(summary.modified_files, vec!["a.py"]);

    // Any coordination call after close fails, even though the ephemeral
    // state is gone: the durable row remembers the session was closed.
    let result = claim(&state, &planner, &["b.py"], LockMode::Write).await;
    assert!(matches!(result, Err(CoordError::SessionClosed)));
}

struct FailingClassifier;

#[async_trait]
impl Classifier for FailingClassifier {
    async fn classify(
        &self,
        _changes: &[ChangeEvent],
        _messages: &[AgentMessage],
    ) -> anyhow::Result<FactBuckets> {
        anyhow::bail!("classifier endpoint unavailable")
    }
}

#[tokio::test]
async fn test_close_with_unavailable_classifier_still_persists() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = Arc::new(SqliteLongTermStore::new(pool.clone()).await.unwrap());
    let state = create_coord_state_with(pool, Arc::new(FailingClassifier), store.clone())
        .await
        .unwrap();

    let planner = agent("auth", "planner");
    claim(&state, &planner, &["a.py"], LockMode::Write).await.unwrap();
    release(&state, &planner, &["a.py"], "reworked the login flow").await.unwrap();

    let summary = state.close_session("peter", "auth").await.unwrap();
    assert!(!summary.is_empty());
    assert_eq!(summary.modified_files, vec!["a.py"]);

    // At minimum the file-modification record made it to long-term storage.
    let written = store.count_for_session("peter", "auth").await.unwrap();
    assert!(written >= 1);
}

/// Store that fails its first write, then succeeds: models a transient
/// long-term-store outage across a close retry.
struct FlakyStore {
    attempts: AtomicUsize,
    written: AtomicUsize,
}

#[async_trait]
impl LongTermStore for FlakyStore {
    async fn write(
        &self,
        records: &[String],
        _user_id: &str,
        _metadata: &StoreMetadata,
    ) -> anyhow::Result<usize> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("store temporarily unreachable");
        }
        self.written.fetch_add(records.len(), Ordering::SeqCst);
        Ok(records.len())
    }
}

#[tokio::test]
async fn test_degraded_close_retries_without_double_write() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = Arc::new(FlakyStore {
        attempts: AtomicUsize::new(0),
        written: AtomicUsize::new(0),
    });
    let state = create_coord_state_with(pool, Arc::new(KeywordClassifier), store.clone())
        .await
        .unwrap();

    let planner = agent("auth", "planner");
    // One plain change event: exactly one record (modified files) to write.
    release(&state, &planner, &["a.py"], "touched a.py").await.unwrap();

    // First close: store down, close degraded, ephemeral state retained.
    let first = state.close_session("peter", "auth").await;
    assert!(matches!(first, Err(CoordError::Persistence(_))));

    // The session is closed for coordination purposes even while degraded.
    assert!(matches!(
        claim(&state, &planner, &["b.py"], LockMode::Write).await,
        Err(CoordError::SessionClosed)
    ));

    // Retry succeeds and writes the summary exactly once.
    let second = state.close_session("peter", "auth").await.unwrap();
    assert_eq!(second.modified_files, vec!["a.py"]);
    assert_eq!(store.written.load(Ordering::SeqCst), 1);

    // A third close finds nothing left to close.
    assert!(matches!(
        state.close_session("peter", "auth").await,
        Err(CoordError::NotFound(_))
    ));
}

/// Store slow enough that a second close can arrive while the first one's
/// summary write is still in flight.
struct SlowStore {
    written: AtomicUsize,
}

#[async_trait]
impl LongTermStore for SlowStore {
    async fn write(
        &self,
        records: &[String],
        _user_id: &str,
        _metadata: &StoreMetadata,
    ) -> anyhow::Result<usize> {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        self.written.fetch_add(records.len(), Ordering::SeqCst);
        Ok(records.len())
    }
}

#[tokio::test]
async fn test_concurrent_closes_write_summary_once() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = Arc::new(SlowStore {
        written: AtomicUsize::new(0),
    });
    let state = create_coord_state_with(pool, Arc::new(KeywordClassifier), store.clone())
        .await
        .unwrap();

    let planner = agent("auth", "planner");
    // One plain change event: exactly one record (modified files) to write.
    release(&state, &planner, &["a.py"], "touched a.py").await.unwrap();

    // Both closes race; only one may own the summary write, the other gets
    // SessionClosed instead of a second snapshot.
    let (first, second) = tokio::join!(
        state.close_session("peter", "auth"),
        state.close_session("peter", "auth"),
    );
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(loser, Err(CoordError::SessionClosed)));

    assert_eq!(store.written.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_oversized_time_parameters_are_clamped() {
    let state = setup().await;
    let planner = agent("auth", "planner");
    let impl_a = agent("auth", "impl_a");

    // A ridiculous TTL is capped, not a panic inside the session mutex.
    let granted = state
        .router
        .handle(
            &planner,
            CLIENT,
            None,
            CoordinationOp::ClaimFiles {
                paths: vec!["a.py".to_string()],
                mode: LockMode::Write,
                ttl_seconds: Some(i64::MAX),
            },
        )
        .await
        .unwrap();
    match granted {
        OpResult::Claimed(locks) => assert_eq!(locks[0].holder, "planner"),
        other => panic!("expected grant, got {:?}", other),
    }

    // A ridiculous look-back window means "everything", not overflow.
    release(&state, &planner, &["a.py"], "touched a.py").await.unwrap();
    let synced = state
        .router
        .handle(
            &impl_a,
            CLIENT,
            None,
            CoordinationOp::SyncCodebase {
                since_minutes: i64::MAX,
            },
        )
        .await
        .unwrap();
    match synced {
        OpResult::Changes(changes) => assert_eq!(changes.len(), 1),
        other => panic!("expected changes, got {:?}", other),
    }
}

#[tokio::test]
async fn test_direct_identifier_passes_through() {
    let state = setup().await;
    let result = state
        .router
        .handle("peter", CLIENT, None, CoordinationOp::SyncCodebase { since_minutes: 30 })
        .await
        .unwrap();
    match result {
        OpResult::Direct { user_id } => assert_eq!(user_id, "peter"),
        other => panic!("expected direct route, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unauthorized_client_is_indistinguishable_from_missing_tool() {
    let state = setup().await;
    let result = state
        .router
        .handle(
            &agent("auth", "planner"),
            "mystery-client",
            None,
            CoordinationOp::SyncCodebase { since_minutes: 30 },
        )
        .await;
    match result {
        Err(CoordError::ToolNotAvailable) => {
            assert_eq!(
                CoordError::ToolNotAvailable.to_string(),
                "tool not available"
            );
        }
        other => panic!("expected ToolNotAvailable, got {:?}", other),
    }
}
