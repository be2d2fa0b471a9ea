// src/mcp/tools/coordination.rs
// Coordination tool bodies. Each renders the router's result into the
// JSON-shaped responses the agents consume. Lock conflicts come back as
// success=false payloads, not protocol errors, so the calling agent can
// decide to wait, message the holder, or move on.

use serde_json::json;
use std::str::FromStr;

use crate::error::CoordError;
use crate::identity::{self, Routed};
use crate::mcp::{
    BroadcastMessageRequest, ClaimFilesRequest, CloseSessionRequest, GetAgentMessagesRequest,
    RelayServer, ReleaseFilesRequest, SessionStatusRequest, SyncCodebaseRequest,
};
use crate::router::{CoordinationOp, OpResult};
use crate::session::{LockMode, MessageKind};

fn render(value: serde_json::Value) -> String {
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}

/// Map a router error onto the tool boundary. Conflicts become structured
/// success=false payloads; everything else is a tool error string.
fn render_error(err: CoordError) -> Result<String, String> {
    match err {
        CoordError::Conflict(conflicts) => Ok(render(json!({
            "success": false,
            "conflicts": conflicts,
        }))),
        other => Err(other.to_tool_message()),
    }
}

/// The designed fallback for identifiers without a session marker: report
/// that coordination is inactive instead of failing the call.
fn direct_response(user_id: &str) -> String {
    render(json!({
        "success": true,
        "coordination": "inactive",
        "note": format!(
            "'{}' carries no session marker; running as a single-agent session",
            user_id
        ),
    }))
}

pub async fn claim_files(server: &RelayServer, req: ClaimFilesRequest) -> Result<String, String> {
    let mode = req
        .operation
        .as_deref()
        .map(|m| LockMode::from_str(m).unwrap_or(LockMode::Write))
        .unwrap_or(LockMode::Write);
    let op = CoordinationOp::ClaimFiles {
        paths: req.paths,
        mode,
        ttl_seconds: req.ttl_minutes.map(|m| m.saturating_mul(60)),
    };

    match server
        .state
        .router
        .handle(&req.agent_id, &server.client_identity, req.role.as_deref(), op)
        .await
    {
        Ok(OpResult::Claimed(locks)) => Ok(render(json!({
            "success": true,
            "locked": locks.iter().map(|l| json!({
                "path": l.path,
                "mode": l.mode,
                "lock_id": l.id,
                "expires_at": l.expires_at.to_rfc3339(),
            })).collect::<Vec<_>>(),
        }))),
        Ok(OpResult::Direct { user_id }) => Ok(direct_response(&user_id)),
        Ok(other) => Err(format!("unexpected claim result: {:?}", other)),
        Err(e) => render_error(e),
    }
}

pub async fn release_files(
    server: &RelayServer,
    req: ReleaseFilesRequest,
) -> Result<String, String> {
    let op = CoordinationOp::ReleaseFiles {
        paths: req.paths,
        summary: req.summary,
        structural: req.structural_changes.unwrap_or(false),
    };

    match server
        .state
        .router
        .handle(&req.agent_id, &server.client_identity, None, op)
        .await
    {
        Ok(OpResult::Released { released }) => Ok(render(json!({
            "success": true,
            "released": released,
        }))),
        Ok(OpResult::Direct { user_id }) => Ok(direct_response(&user_id)),
        Ok(other) => Err(format!("unexpected release result: {:?}", other)),
        Err(e) => render_error(e),
    }
}

pub async fn sync_codebase(
    server: &RelayServer,
    req: SyncCodebaseRequest,
) -> Result<String, String> {
    let op = CoordinationOp::SyncCodebase {
        since_minutes: req.since_minutes.unwrap_or(30),
    };

    match server
        .state
        .router
        .handle(&req.agent_id, &server.client_identity, None, op)
        .await
    {
        Ok(OpResult::Changes(changes)) => Ok(render(json!({
            "success": true,
            "recent_changes": changes.iter().map(|c| json!({
                "agent": c.agent_id,
                "paths": c.paths,
                "summary": c.summary,
                "structural": c.structural,
                "timestamp": c.timestamp.to_rfc3339(),
            })).collect::<Vec<_>>(),
        }))),
        Ok(OpResult::Direct { user_id }) => Ok(direct_response(&user_id)),
        Ok(other) => Err(format!("unexpected sync result: {:?}", other)),
        Err(e) => render_error(e),
    }
}

pub async fn broadcast_message(
    server: &RelayServer,
    req: BroadcastMessageRequest,
) -> Result<String, String> {
    let kind = req
        .message_type
        .as_deref()
        .map(|k| MessageKind::from_str(k).unwrap_or(MessageKind::Info))
        .unwrap_or(MessageKind::Info);
    let op = CoordinationOp::BroadcastMessage {
        body: req.message,
        kind,
        to: req.to_agent,
    };

    match server
        .state
        .router
        .handle(&req.agent_id, &server.client_identity, None, op)
        .await
    {
        Ok(OpResult::MessageSent { message_id }) => Ok(render(json!({
            "success": true,
            "message_id": message_id,
        }))),
        Ok(OpResult::Direct { user_id }) => Ok(direct_response(&user_id)),
        Ok(other) => Err(format!("unexpected broadcast result: {:?}", other)),
        Err(e) => render_error(e),
    }
}

pub async fn get_agent_messages(
    server: &RelayServer,
    req: GetAgentMessagesRequest,
) -> Result<String, String> {
    let op = CoordinationOp::GetAgentMessages {
        limit: req.limit.unwrap_or(20),
    };

    match server
        .state
        .router
        .handle(&req.agent_id, &server.client_identity, None, op)
        .await
    {
        Ok(OpResult::Messages(messages)) => Ok(render(json!({
            "success": true,
            "messages": messages.iter().map(|m| json!({
                "from": m.from,
                "to": m.to,
                "type": m.kind,
                "body": m.body,
                "timestamp": m.timestamp.to_rfc3339(),
            })).collect::<Vec<_>>(),
        }))),
        Ok(OpResult::Direct { user_id }) => Ok(direct_response(&user_id)),
        Ok(other) => Err(format!("unexpected messages result: {:?}", other)),
        Err(e) => render_error(e),
    }
}

pub async fn session_status(
    server: &RelayServer,
    req: SessionStatusRequest,
) -> Result<String, String> {
    match server
        .state
        .router
        .handle(
            &req.agent_id,
            &server.client_identity,
            None,
            CoordinationOp::ListAgents,
        )
        .await
    {
        Ok(OpResult::Status { agents, locks }) => Ok(render(json!({
            "success": true,
            "agents": agents.iter().map(|a| json!({
                "id": a.id,
                "role": a.role,
                "status": a.status,
                "last_activity": a.last_activity.to_rfc3339(),
            })).collect::<Vec<_>>(),
            "active_locks": locks.iter().map(|l| json!({
                "path": l.path,
                "holder": l.holder,
                "mode": l.mode,
                "expires_at": l.expires_at.to_rfc3339(),
            })).collect::<Vec<_>>(),
        }))),
        Ok(OpResult::Direct { user_id }) => Ok(direct_response(&user_id)),
        Ok(other) => Err(format!("unexpected status result: {:?}", other)),
        Err(e) => render_error(e),
    }
}

pub async fn close_session(
    server: &RelayServer,
    req: CloseSessionRequest,
) -> Result<String, String> {
    // Close goes straight to the registry contract rather than through an
    // op dispatch, but the same gate and identity rules apply.
    if !server
        .state
        .router
        .policy_allows(&server.client_identity)
    {
        return Err(CoordError::ToolNotAvailable.to_tool_message());
    }

    let (user_id, session_name) = match identity::parse(&req.agent_id) {
        Ok(Routed::Coordination {
            user_id,
            session_name,
            ..
        }) => (user_id, session_name),
        Ok(Routed::Direct { user_id }) => return Ok(direct_response(&user_id)),
        Err(e) => return Err(e.to_tool_message()),
    };

    match server.state.close_session(&user_id, &session_name).await {
        Ok(summary) => Ok(render(json!({
            "success": true,
            "session": summary.session_name,
            "decisions": summary.decisions.len(),
            "learnings": summary.learnings.len(),
            "collaboration_patterns": summary.collaboration_patterns.len(),
            "next_steps": summary.next_steps.len(),
            "modified_files": summary.modified_files,
            "events_processed": summary.event_count,
        }))),
        Err(e) => Err(e.to_tool_message()),
    }
}
