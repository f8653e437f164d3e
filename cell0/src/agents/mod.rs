//! Agent Mesh (spec §4.5, C4).
//!
//! Grounded on the teacher's `agents/identity.rs` persistent-identity
//! pattern (copy-on-write descriptors, JSON persistence) combined with a
//! routing/pub-sub layer the spec requires but the teacher's agent module
//! doesn't implement directly — built in the teacher's idiom (`Arc` +
//! `RwLock`/`dashmap`, typed errors, no hidden singletons).

mod mesh;
mod routing;

pub use mesh::{AgentHandle, AgentMesh, Fence};
pub use routing::RoutingStrategy;

use crate::error::CellResult;
use crate::types::CapabilityTag;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single unit of work dispatched to an agent (spec §4.4 EXECUTE ->
/// §4.5 `handle`).
#[derive(Debug, Clone)]
pub struct Intent {
    pub operation_id: String,
    pub session_id: String,
    pub capability: CapabilityTag,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub payload: Value,
}

/// Every agent implements this; the mesh owns routing, the agent owns only
/// the work of `handle`.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    async fn handle(&self, intent: Intent, fence: Fence) -> CellResult<AgentResult>;
}
