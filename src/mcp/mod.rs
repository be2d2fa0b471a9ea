// src/mcp/mod.rs
// MCP Server implementation

pub mod tools;

use crate::state::CoordState;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{ServerCapabilities, ServerInfo},
    schemars, tool, tool_router, ServerHandler,
};
use serde::Deserialize;
use std::sync::Arc;

/// MCP Server state
#[derive(Clone)]
pub struct RelayServer {
    pub state: Arc<CoordState>,
    /// Caller-type token checked against the capability table. Self-reported
    /// by the connecting client; a convenience gate, not a security boundary.
    pub client_identity: String,
    tool_router: ToolRouter<Self>,
}

impl RelayServer {
    pub fn new(state: Arc<CoordState>, client_identity: String) -> Self {
        Self {
            state,
            client_identity,
            tool_router: Self::tool_router(),
        }
    }
}

// Request types for tools with parameters
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ClaimFilesRequest {
    #[schemars(description = "Encoded agent identifier (user__session__name__agent)")]
    pub agent_id: String,
    #[schemars(description = "File paths to claim")]
    pub paths: Vec<String>,
    #[schemars(description = "Operation: read/write/create/delete")]
    pub operation: Option<String>,
    #[schemars(description = "Lock TTL in minutes (default 30)")]
    pub ttl_minutes: Option<i64>,
    #[schemars(description = "Agent role, e.g. planner/impl_a")]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ReleaseFilesRequest {
    #[schemars(description = "Encoded agent identifier (user__session__name__agent)")]
    pub agent_id: String,
    #[schemars(description = "File paths to release")]
    pub paths: Vec<String>,
    #[schemars(description = "Summary of the changes made")]
    pub summary: String,
    #[schemars(description = "Whether the changes were structural (moves, renames, splits)")]
    pub structural_changes: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SyncCodebaseRequest {
    #[schemars(description = "Encoded agent identifier (user__session__name__agent)")]
    pub agent_id: String,
    #[schemars(description = "Look-back window in minutes (default 30)")]
    pub since_minutes: Option<i64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct BroadcastMessageRequest {
    #[schemars(description = "Encoded agent identifier (user__session__name__agent)")]
    pub agent_id: String,
    #[schemars(description = "Message body")]
    pub message: String,
    #[schemars(description = "Type: info/warning/question/coordination")]
    pub message_type: Option<String>,
    #[schemars(description = "Target agent id (omit for broadcast)")]
    pub to_agent: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetAgentMessagesRequest {
    #[schemars(description = "Encoded agent identifier (user__session__name__agent)")]
    pub agent_id: String,
    #[schemars(description = "Max messages to return (default 20)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SessionStatusRequest {
    #[schemars(description = "Encoded agent identifier (user__session__name__agent)")]
    pub agent_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CloseSessionRequest {
    #[schemars(description = "Encoded agent identifier (user__session__name__agent)")]
    pub agent_id: String,
}

#[tool_router]
impl RelayServer {
    #[tool(
        description = "Claim exclusive or shared locks on files before editing them. All-or-nothing: on conflict nothing is locked and the holders are returned."
    )]
    async fn claim_files(
        &self,
        Parameters(req): Parameters<ClaimFilesRequest>,
    ) -> Result<String, String> {
        tools::coordination::claim_files(self, req).await
    }

    #[tool(
        description = "Release file locks and announce the changes made to the rest of the session."
    )]
    async fn release_files(
        &self,
        Parameters(req): Parameters<ReleaseFilesRequest>,
    ) -> Result<String, String> {
        tools::coordination::release_files(self, req).await
    }

    #[tool(description = "Get recent changes made by other agents in this session.")]
    async fn sync_codebase(
        &self,
        Parameters(req): Parameters<SyncCodebaseRequest>,
    ) -> Result<String, String> {
        tools::coordination::sync_codebase(self, req).await
    }

    #[tool(description = "Send a message to another agent or broadcast to the whole session.")]
    async fn broadcast_message(
        &self,
        Parameters(req): Parameters<BroadcastMessageRequest>,
    ) -> Result<String, String> {
        tools::coordination::broadcast_message(self, req).await
    }

    #[tool(description = "Get messages addressed to you or broadcast by other agents.")]
    async fn get_agent_messages(
        &self,
        Parameters(req): Parameters<GetAgentMessagesRequest>,
    ) -> Result<String, String> {
        tools::coordination::get_agent_messages(self, req).await
    }

    #[tool(description = "List session members and their liveness.")]
    async fn session_status(
        &self,
        Parameters(req): Parameters<SessionStatusRequest>,
    ) -> Result<String, String> {
        tools::coordination::session_status(self, req).await
    }

    #[tool(
        description = "Close the session: summarize its history into long-term memory and discard ephemeral state."
    )]
    async fn close_session(
        &self,
        Parameters(req): Parameters<CloseSessionRequest>,
    ) -> Result<String, String> {
        tools::coordination::close_session(self, req).await
    }
}

impl ServerHandler for RelayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: rmcp::model::Implementation {
                name: "relay".into(),
                title: Some("Relay - Multi-agent session coordination for Claude Code".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Relay coordinates multiple Claude Code agents working on one codebase: \
                 claim files before editing, release them with a summary when done, \
                 sync to see other agents' changes, and message agents directly."
                    .into(),
            ),
        }
    }
}
