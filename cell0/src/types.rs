//! Shared data model (spec §3).
//!
//! Types that cross module boundaries live here; each subsystem otherwise
//! owns its private types. Ownership rules from §3 are enforced by API
//! surface, not by the type system: the Gateway is the only place that
//! mutates `Session`, the Agent Mesh is the only place that mutates
//! `AgentDescriptor`, etc.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One of the ten supported channel adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Whatsapp,
    Telegram,
    Discord,
    Slack,
    Signal,
    Matrix,
    GoogleChat,
    Teams,
    Bluebubbles,
    Webchat,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self).unwrap_or_default();
        write!(f, "{}", s.as_str().unwrap_or("unknown"))
    }
}

/// One of the 12 fixed top-level domains, plus catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    System,
    Finance,
    Health,
    Communication,
    Scheduling,
    Research,
    Development,
    Legal,
    Travel,
    Household,
    Learning,
    Security,
    CatchAll,
}

impl Domain {
    pub const ALL: [Domain; 13] = [
        Domain::System,
        Domain::Finance,
        Domain::Health,
        Domain::Communication,
        Domain::Scheduling,
        Domain::Research,
        Domain::Development,
        Domain::Legal,
        Domain::Travel,
        Domain::Household,
        Domain::Learning,
        Domain::Security,
        Domain::CatchAll,
    ];
}

/// An ordered attachment on an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub mime: String,
    pub size_bytes: u64,
    /// Opaque handle to fetch bytes lazily (object-store key, local path,
    /// adapter-native blob id). Never eagerly loaded into memory here.
    pub bytes_handle: Option<String>,
}

/// Text + attachments, in the order the sender attached them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Content {
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Canonical inbound event produced by every channel adapter (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: Channel,
    pub channel_message_id: String,
    /// Adapter-native sender id; resolved to a `sovereign_id` by the
    /// gateway's Sovereign Identity Verification before anything else runs.
    pub sender: String,
    pub conversation_key: String,
    pub content: Content,
    pub received_at: DateTime<Utc>,
    /// Opaque adapter payload, kept for audit, never re-parsed downstream.
    pub raw: serde_json::Value,
}

impl InboundMessage {
    pub fn canonicalized_text(&self) -> String {
        self.content.text.trim().to_lowercase()
    }
}

/// Policy profile a session operates under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyProfile {
    Restricted,
    Standard,
    Elevated,
    Admin,
}

/// One entry in a session's message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub role: Role,
    pub content: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
}

/// The fixed taxonomy an intent is classified into (spec §4.4 CLASSIFY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentType {
    SystemRead,
    SystemWrite,
    SystemExec,
    Communicate,
    Reason,
    Meta,
}

impl IntentType {
    /// Whether this type category is destructive by default (I5 / §4.4 APPLY).
    pub fn is_destructive_by_default(&self) -> bool {
        matches!(self, IntentType::SystemWrite | IntentType::SystemExec)
    }
}

/// Sandbox isolation level required to run a skill (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxClass {
    None,
    FilesystemJail,
    SubprocessJail,
    ContainerJail,
}

/// Capability tag used for agent routing and skill requirements.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapabilityTag(pub String);

impl From<&str> for CapabilityTag {
    fn from(s: &str) -> Self {
        CapabilityTag(s.to_string())
    }
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Proposed,
    Online,
    Degraded,
    Offline,
}

/// `{id, name, domain, capabilities, priority, loadFactor, status}` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    pub domain: Domain,
    pub capabilities: BTreeSet<CapabilityTag>,
    /// Per-capability priority; higher wins capability_priority routing ties.
    pub priority: i32,
    pub load_factor: f32,
    pub status: AgentStatus,
}

/// Meta-agent goal lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalState {
    Proposed,
    Active,
    Evaluating,
    Completed,
    Dropped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub domain: String,
    pub description: String,
    /// 1..10
    pub priority: u8,
    pub state: GoalState,
    pub parent_goal_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ethics verdict (spec §4.6, glossary "EthicsConsensus").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EthicsDecision {
    Allow,
    Deny,
    Defer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDecision {
    pub rule: String,
    pub decision: EthicsDecision,
    pub hard_veto: bool,
}

/// Append-only ethics audit line (spec §3 EthicsRecord).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthicsRecord {
    pub ts: DateTime<Utc>,
    pub operation_id: String,
    pub actor_agent_id: String,
    pub proposed_action: String,
    pub rule_decisions: Vec<RuleDecision>,
    pub decision: EthicsDecision,
    pub reason: String,
}
