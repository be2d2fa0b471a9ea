// src/session/mod.rs
// Ephemeral per-session state: agents, resource locks, bounded event logs.
// A session exclusively owns everything here; nothing escapes its mutex.

pub mod events;
pub mod locks;
pub mod registry;

pub use events::BoundedLog;
pub use registry::{SessionRegistry, SessionSnapshot};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Connected,
    Disconnected,
}

/// One participant process within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub role: String,
    pub status: AgentStatus,
    pub last_activity: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: String, role: String) -> Self {
        Self {
            id,
            role,
            status: AgentStatus::Connected,
            last_activity: Utc::now(),
        }
    }

    /// Liveness is a lazy staleness check at read time, mirroring lock expiry.
    pub fn effective_status(&self, now: DateTime<Utc>, idle_timeout_seconds: i64) -> AgentStatus {
        if now - self.last_activity > Duration::seconds(idle_timeout_seconds) {
            AgentStatus::Disconnected
        } else {
            self.status
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    Read,
    Write,
    Create,
    Delete,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Read => "read",
            LockMode::Write => "write",
            LockMode::Create => "create",
            LockMode::Delete => "delete",
        }
    }

    /// Read locks are compatible with each other; everything else excludes.
    pub fn is_shared(&self) -> bool {
        matches!(self, LockMode::Read)
    }
}

// Parse defensively from tool input; unknown modes become Write (exclusive).
impl FromStr for LockMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "read" => LockMode::Read,
            "write" | "edit" => LockMode::Write,
            "create" => LockMode::Create,
            "delete" => LockMode::Delete,
            _ => LockMode::Write,
        })
    }
}

/// Upper bound on a lock's lifetime. Caller-supplied TTLs are clamped into
/// `0..=MAX_LOCK_TTL_SECONDS`; expiry arithmetic never overflows.
pub const MAX_LOCK_TTL_SECONDS: i64 = 86_400;

/// A temporary claim on one resource path, held by one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    pub id: String,
    pub path: String,
    pub holder: String,
    pub mode: LockMode,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ResourceLock {
    pub fn new(
        path: String,
        holder: String,
        mode: LockMode,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let ttl = ttl_seconds.clamp(0, MAX_LOCK_TTL_SECONDS);
        Self {
            id: Uuid::new_v4().to_string(),
            path,
            holder,
            mode,
            acquired_at: now,
            expires_at: now + Duration::seconds(ttl),
        }
    }

    /// An expired lock is treated as absent everywhere it is consulted.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn expires_in_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// A change announcement from one agent, visible to the rest of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: String,
    pub agent_id: String,
    pub paths: Vec<String>,
    pub summary: String,
    pub structural: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Info,
    Warning,
    Question,
    Coordination,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Info => "info",
            MessageKind::Warning => "warning",
            MessageKind::Question => "question",
            MessageKind::Coordination => "coordination",
        }
    }
}

impl FromStr for MessageKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "warning" => MessageKind::Warning,
            "question" => MessageKind::Question,
            "coordination" => MessageKind::Coordination,
            _ => MessageKind::Info,
        })
    }
}

/// A directed or broadcast message between agents in one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub from: String,
    /// None = broadcast to every other agent in the session.
    pub to: Option<String>,
    pub kind: MessageKind,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// The full mutable state of one session, guarded by its handle's mutex.
#[derive(Debug)]
pub struct SessionState {
    pub user_id: String,
    pub name: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub agents: HashMap<String, Agent>,
    /// Active locks keyed by path. Multiple read locks may share a path.
    pub locks: HashMap<String, Vec<ResourceLock>>,
    pub changes: BoundedLog<ChangeEvent>,
    pub messages: BoundedLog<AgentMessage>,
    /// Set once the close summary has been written to long-term storage.
    /// Guards against double-writes when a degraded close is retried.
    pub persisted: bool,
    /// Set while a close is in flight: snapshot taken, summary not yet
    /// persisted. A second close arriving meanwhile is rejected.
    pub closing: bool,
}

impl SessionState {
    pub fn new(
        user_id: String,
        name: String,
        change_capacity: usize,
        message_capacity: usize,
    ) -> Self {
        Self {
            user_id,
            name,
            status: SessionStatus::Active,
            created_at: Utc::now(),
            agents: HashMap::new(),
            locks: HashMap::new(),
            changes: BoundedLog::new(change_capacity),
            messages: BoundedLog::new(message_capacity),
            persisted: false,
            closing: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == SessionStatus::Closed
    }
}
