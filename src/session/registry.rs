// src/session/registry.rs
// Tracks active sessions and their member agents. One handle per session,
// each with its own mutex, so unrelated sessions never contend. Session and
// agent rows are mirrored into sqlite so membership survives a restart;
// lock/log content is deliberately ephemeral.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{Agent, AgentMessage, AgentStatus, ChangeEvent, SessionState, SessionStatus};
use crate::config::CONFIG;
use crate::error::CoordError;
use crate::identity;

/// One live session entry. The mutex is the session's single serialization
/// point: every lock/log mutation goes through it.
pub struct SessionHandle {
    pub state: Mutex<SessionState>,
}

/// Immutable copy of a session's history, taken under the session mutex at
/// close time. Summarization and persistence run on this, outside the mutex.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub user_id: String,
    pub session_name: String,
    pub agents: Vec<Agent>,
    pub changes: Vec<ChangeEvent>,
    pub messages: Vec<AgentMessage>,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<(String, String), Arc<SessionHandle>>>,
    pool: SqlitePool,
}

impl SessionRegistry {
    pub async fn new(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, name)
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                user_id TEXT NOT NULL,
                session_name TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                PRIMARY KEY (user_id, session_name, agent_id)
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            pool,
        })
    }

    /// Idempotent registration: creates the session on first contact, adds
    /// the agent on its first call, and refreshes last-activity after that.
    /// The router calls this on every coordination operation, which is what
    /// keeps the liveness timestamps current without any heartbeat traffic.
    pub async fn register(
        &self,
        user_id: &str,
        session_name: &str,
        agent_id: &str,
        role: Option<&str>,
    ) -> Result<Agent, CoordError> {
        identity::validate_component(user_id)?;
        identity::validate_component(session_name)?;
        identity::validate_component(agent_id)?;

        let handle = self.get_or_create(user_id, session_name).await?;

        let (agent, session_created_at) = {
            let mut state = handle.state.lock().await;
            if state.is_closed() {
                return Err(CoordError::SessionClosed);
            }

            let agent = state
                .agents
                .entry(agent_id.to_string())
                .and_modify(|a| {
                    a.last_activity = Utc::now();
                    a.status = AgentStatus::Connected;
                    if let Some(r) = role {
                        a.role = r.to_string();
                    }
                })
                .or_insert_with(|| {
                    debug!(session = session_name, agent = agent_id, "agent joined session");
                    Agent::new(agent_id.to_string(), role.unwrap_or("agent").to_string())
                })
                .clone();
            (agent, state.created_at)
        };

        // Durable membership rows are best-effort: a sqlite hiccup must not
        // fail a coordination call.
        if let Err(e) = self
            .upsert_rows(user_id, session_name, &agent, session_created_at)
            .await
        {
            warn!("failed to persist session membership rows: {}", e);
        }

        Ok(agent)
    }

    pub async fn lookup(
        &self,
        user_id: &str,
        session_name: &str,
        agent_id: &str,
    ) -> Result<Agent, CoordError> {
        let handle = self.handle_for(user_id, session_name).await?;
        let state = handle.state.lock().await;
        state
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| CoordError::NotFound(format!("agent '{}'", agent_id)))
    }

    /// Member agents with liveness computed lazily from last-activity age.
    pub async fn list_agents(
        &self,
        user_id: &str,
        session_name: &str,
    ) -> Result<Vec<Agent>, CoordError> {
        let handle = self.handle_for(user_id, session_name).await?;
        let state = handle.state.lock().await;
        let now = Utc::now();
        let idle = CONFIG.agent_idle_timeout_seconds;
        Ok(state
            .agents
            .values()
            .map(|a| {
                let mut agent = a.clone();
                agent.status = a.effective_status(now, idle);
                agent
            })
            .collect())
    }

    pub async fn handle_for(
        &self,
        user_id: &str,
        session_name: &str,
    ) -> Result<Arc<SessionHandle>, CoordError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&(user_id.to_string(), session_name.to_string()))
            .cloned()
            .ok_or_else(|| CoordError::NotFound(format!("session '{}'", session_name)))
    }

    /// Flip the session to closed and snapshot its full history. After this
    /// returns, every further coordination call gets `SessionClosed`; no lock
    /// or log mutation can happen once the status flips under the mutex.
    ///
    /// Re-closing a degraded session (closed but never persisted) returns a
    /// fresh snapshot so the close can be retried. Re-closing a fully
    /// persisted session is rejected, and so is a close racing one already
    /// in flight; only one caller at a time may own the summary write.
    pub async fn begin_close(
        &self,
        user_id: &str,
        session_name: &str,
    ) -> Result<SessionSnapshot, CoordError> {
        let handle = self.handle_for(user_id, session_name).await?;
        let snapshot = {
            let mut state = handle.state.lock().await;
            if state.closing || (state.is_closed() && state.persisted) {
                return Err(CoordError::SessionClosed);
            }
            state.status = SessionStatus::Closed;
            state.closing = true;
            SessionSnapshot {
                user_id: state.user_id.clone(),
                session_name: state.name.clone(),
                agents: state.agents.values().cloned().collect(),
                changes: state.changes.full_history(),
                messages: state.messages.full_history(),
            }
        };

        if let Err(e) = sqlx::query(
            "UPDATE sessions SET status = ? WHERE user_id = ? AND name = ?",
        )
        .bind(SessionStatus::Closed.as_str())
        .bind(user_id)
        .bind(session_name)
        .execute(&self.pool)
        .await
        {
            warn!("failed to mark session row closed: {}", e);
        }

        info!(
            session = session_name,
            changes = snapshot.changes.len(),
            messages = snapshot.messages.len(),
            "session closing"
        );
        Ok(snapshot)
    }

    /// Record that the close summary reached long-term storage, then drop
    /// all ephemeral state. Durable rows stay behind (status closed) so
    /// membership history remains reconstructable.
    pub async fn finish_close(&self, user_id: &str, session_name: &str) {
        if let Ok(handle) = self.handle_for(user_id, session_name).await {
            let mut state = handle.state.lock().await;
            state.persisted = true;
            state.locks.clear();
        }
        let mut sessions = self.sessions.write().await;
        sessions.remove(&(user_id.to_string(), session_name.to_string()));
        debug!(session = session_name, "ephemeral session state discarded");
    }

    /// Clear the close-in-progress marker after a failed persist so the
    /// close can be retried. The session stays closed for coordination
    /// traffic and its history stays intact.
    pub async fn abort_close(&self, user_id: &str, session_name: &str) {
        if let Ok(handle) = self.handle_for(user_id, session_name).await {
            let mut state = handle.state.lock().await;
            state.closing = false;
        }
    }

    async fn get_or_create(
        &self,
        user_id: &str,
        session_name: &str,
    ) -> Result<Arc<SessionHandle>, CoordError> {
        let key = (user_id.to_string(), session_name.to_string());
        {
            let sessions = self.sessions.read().await;
            if let Some(handle) = sessions.get(&key) {
                return Ok(handle.clone());
            }
        }

        // Not live in memory. A durable row with status closed means this
        // name was closed for good; it must not come back as a new session.
        match sqlx::query_as::<_, (String,)>(
            "SELECT status FROM sessions WHERE user_id = ? AND name = ?",
        )
        .bind(user_id)
        .bind(session_name)
        .fetch_optional(&self.pool)
        .await
        {
            Ok(Some((status,))) if status == SessionStatus::Closed.as_str() => {
                return Err(CoordError::SessionClosed);
            }
            Ok(_) => {}
            Err(e) => warn!("session status lookup failed, assuming new session: {}", e),
        }

        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .entry(key)
            .or_insert_with(|| {
                info!(user = user_id, session = session_name, "session created");
                Arc::new(SessionHandle {
                    state: Mutex::new(SessionState::new(
                        user_id.to_string(),
                        session_name.to_string(),
                        CONFIG.change_log_capacity,
                        CONFIG.message_log_capacity,
                    )),
                })
            })
            .clone())
    }

    async fn upsert_rows(
        &self,
        user_id: &str,
        session_name: &str,
        agent: &Agent,
        created_at: chrono::DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (user_id, name, status, created_at)
            VALUES (?, ?, 'active', ?)
            ON CONFLICT (user_id, name) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(session_name)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO agents (user_id, session_name, agent_id, role, status, last_activity)
            VALUES (?, ?, ?, ?, 'connected', ?)
            ON CONFLICT (user_id, session_name, agent_id)
            DO UPDATE SET role = excluded.role, status = excluded.status,
                          last_activity = excluded.last_activity
            "#,
        )
        .bind(user_id)
        .bind(session_name)
        .bind(&agent.id)
        .bind(&agent.role)
        .bind(agent.last_activity.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
