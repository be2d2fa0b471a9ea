// src/router/mod.rs
// The single entry point for coordination traffic. Authorizes the caller
// against the capability table, parses the composite identifier, and
// dispatches to the registry/lock/event machinery. No business logic lives
// here beyond identity parsing and authorization.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::config::CONFIG;
use crate::error::CoordError;
use crate::identity::{self, Routed};
use crate::session::locks::ClaimOutcome;
use crate::session::{
    Agent, AgentMessage, ChangeEvent, LockMode, MessageKind, ResourceLock, SessionRegistry,
};

/// One coordination operation, as dispatched by the tool surface.
#[derive(Debug, Clone)]
pub enum CoordinationOp {
    ClaimFiles {
        paths: Vec<String>,
        mode: LockMode,
        ttl_seconds: Option<i64>,
    },
    ReleaseFiles {
        paths: Vec<String>,
        summary: String,
        structural: bool,
    },
    SyncCodebase {
        since_minutes: i64,
    },
    BroadcastMessage {
        body: String,
        kind: MessageKind,
        to: Option<String>,
    },
    GetAgentMessages {
        limit: usize,
    },
    ListAgents,
}

#[derive(Debug)]
pub enum OpResult {
    Claimed(Vec<ResourceLock>),
    Released { released: usize },
    Changes(Vec<ChangeEvent>),
    MessageSent { message_id: String },
    Messages(Vec<AgentMessage>),
    Status {
        agents: Vec<Agent>,
        locks: Vec<ResourceLock>,
    },
    /// Identifier carried no session marker: this is a regular single-agent
    /// call, to be handled by the host's normal pipeline.
    Direct { user_id: String },
}

/// Capability table keyed by normalized caller identity. A plain string
/// equality gate, not a credential; transport auth belongs in front of it.
pub struct CapabilityPolicy {
    coordination: HashSet<String>,
}

impl CapabilityPolicy {
    pub fn from_config() -> Self {
        Self {
            coordination: CONFIG.allowed_client_list().into_iter().collect(),
        }
    }

    pub fn with_allowed(clients: &[&str]) -> Self {
        Self {
            coordination: clients.iter().map(|c| c.trim().to_lowercase()).collect(),
        }
    }

    pub fn allows_coordination(&self, client_identity: &str) -> bool {
        self.coordination
            .contains(&client_identity.trim().to_lowercase())
    }
}

pub struct CoordinationRouter {
    registry: Arc<SessionRegistry>,
    policy: CapabilityPolicy,
}

impl CoordinationRouter {
    pub fn new(registry: Arc<SessionRegistry>, policy: CapabilityPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy_allows(&self, client_identity: &str) -> bool {
        self.policy.allows_coordination(client_identity)
    }

    /// Authorize, parse identity, dispatch. Unauthorized callers get
    /// `ToolNotAvailable`, indistinguishable from the tool not existing.
    pub async fn handle(
        &self,
        encoded_agent_id: &str,
        client_identity: &str,
        role: Option<&str>,
        op: CoordinationOp,
    ) -> Result<OpResult, CoordError> {
        if !self.policy.allows_coordination(client_identity) {
            return Err(CoordError::ToolNotAvailable);
        }

        let (user_id, session_name, agent_id) = match identity::parse(encoded_agent_id)? {
            Routed::Direct { user_id } => {
                debug!(user = user_id.as_str(), "no session marker, routing as regular call");
                return Ok(OpResult::Direct { user_id });
            }
            Routed::Coordination {
                user_id,
                session_name,
                agent_id,
            } => (user_id, session_name, agent_id),
        };

        // Every call re-registers: idempotent, and it refreshes the agent's
        // last-activity timestamp for lazy liveness.
        self.registry
            .register(&user_id, &session_name, &agent_id, role)
            .await?;

        if let CoordinationOp::ListAgents = op {
            let agents = self.registry.list_agents(&user_id, &session_name).await?;
            let handle = self.registry.handle_for(&user_id, &session_name).await?;
            let state = handle.state.lock().await;
            return Ok(OpResult::Status {
                agents,
                locks: state.active_locks(Utc::now()),
            });
        }

        let handle = self.registry.handle_for(&user_id, &session_name).await?;
        let mut state = handle.state.lock().await;
        // Re-check under the mutex: a close racing past register must win.
        if state.is_closed() {
            return Err(CoordError::SessionClosed);
        }
        let now = Utc::now();

        match op {
            CoordinationOp::ClaimFiles {
                paths,
                mode,
                ttl_seconds,
            } => {
                let ttl = ttl_seconds.unwrap_or(CONFIG.lock_ttl_seconds);
                match state.claim(&agent_id, &paths, mode, ttl, now) {
                    ClaimOutcome::Granted(locks) => Ok(OpResult::Claimed(locks)),
                    ClaimOutcome::Conflict(conflicts) => Err(CoordError::Conflict(conflicts)),
                }
            }
            CoordinationOp::ReleaseFiles {
                paths,
                summary,
                structural,
            } => {
                let released = state.release(&agent_id, &paths);
                // A release announces the edit to the rest of the session.
                if !summary.trim().is_empty() {
                    state.append_change(&agent_id, paths, summary, structural);
                }
                Ok(OpResult::Released { released })
            }
            CoordinationOp::SyncCodebase { since_minutes } => Ok(OpResult::Changes(
                state.sync_changes(&agent_id, since_minutes, now),
            )),
            CoordinationOp::BroadcastMessage { body, kind, to } => {
                let message = state.append_message(&agent_id, to, kind, body);
                Ok(OpResult::MessageSent {
                    message_id: message.id,
                })
            }
            CoordinationOp::GetAgentMessages { limit } => {
                Ok(OpResult::Messages(state.messages_for(&agent_id, limit)))
            }
            CoordinationOp::ListAgents => unreachable!("handled above"),
        }
    }
}
